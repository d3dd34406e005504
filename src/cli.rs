//! CLI module
//!
//! This module provides the command-line interface for the idea tree. Every
//! command except `serve` and `completions` runs either against a running
//! server or, with `--local`, directly against the data directory.

use std::collections::HashSet;
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::{
    api::{serve, Client, ClientConfig, CoreClient, HttpClientImpl, ServerConfig},
    command::{Command, CommandOutcome},
    core::{CoreConfig, TreeView},
    generator::{GeminiConfig, GeminiGenerator},
    models::{ExpandMode, Node, Position, PromptLog},
    store::FileStore,
    visibility::{children_map, root_ids},
    Core,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// API server URL
    #[arg(
        short,
        long,
        env = "THOUGHTREE_SERVER",
        default_value = "http://localhost:3000",
        global = true
    )]
    server: String,

    /// Work on the data directory directly instead of a running server
    #[arg(long, global = true)]
    local: bool,

    #[command(flatten)]
    engine: EngineArgs,
}

/// Settings for an in-process engine (`serve` and `--local`)
#[derive(Args, Debug, Clone)]
struct EngineArgs {
    /// Directory holding the tree, settings and prompt log
    #[arg(
        long,
        env = "THOUGHTREE_DATA_DIR",
        default_value = ".thoughtree",
        global = true
    )]
    data_dir: PathBuf,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,

    /// Gemini model name
    #[arg(
        long,
        env = "THOUGHTREE_MODEL",
        default_value = "gemini-3-flash-preview",
        global = true
    )]
    model: String,

    /// Upper bound on a single generator call, in seconds
    #[arg(
        long,
        env = "THOUGHTREE_TIMEOUT_SECS",
        default_value_t = 60,
        global = true
    )]
    timeout_secs: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the thoughtree API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },

    /// Print the visible tree
    Show {
        /// Include node ids
        #[arg(long)]
        ids: bool,
    },

    /// Add a new root idea
    #[command(name = "add-root")]
    AddRoot,

    /// Delete a node and all of its descendants
    Delete { id: String },

    /// Replace a node's text
    Edit { id: String, text: String },

    /// Make TARGET a child of SOURCE
    Connect { source: String, target: String },

    /// Collapse or expand a node's subtree in the view
    Collapse { id: String },

    /// Pin or unpin a node as global context
    Pin { id: String },

    /// Move a node to a canvas position
    Move { id: String, x: f64, y: f64 },

    /// Replace a node's children with generated ideas
    Expand {
        id: String,

        /// "why" for causes, "what" for components
        #[arg(short, long, default_value = "what")]
        mode: ExpandMode,

        /// Expand this text instead of the stored one
        #[arg(short, long)]
        text: Option<String>,
    },

    /// Rewrite a node's text more naturally
    Refine { id: String },

    /// Undo the last change
    Undo,

    /// Redo the last undone change
    Redo,

    /// Recompute every node position
    Layout,

    /// Remove every node
    Clear {
        /// Confirm the removal
        #[arg(long)]
        yes: bool,
    },

    /// Write the tree to a JSON file
    Export {
        /// Output path, defaults to tree-YYYY-MM-DD.json
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show or replace the instruction sent with every request
    Instruction {
        /// New instruction, omit to print the current one
        text: Option<String>,
    },

    /// Show the prompt log, newest first
    Logs {
        /// Number of entries to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,

        /// Print the full prompt of each entry
        #[arg(long)]
        full: bool,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(matches!(cli.command, Commands::Serve { .. }));

    match &cli.command {
        Commands::Serve { port } => {
            println!("Starting thoughtree API server on port {}...", port);
            let core = open_core(&cli.engine)?;

            // Create a server configuration with the specified port
            let config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };

            serve(core, config).await?;
            Ok(())
        }

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }

        command => {
            let client = create_client(&cli)?;
            execute(client.as_ref(), command).await
        }
    }
}

fn init_tracing(serving: bool) {
    let default = if serving { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn open_core(engine: &EngineArgs) -> Result<Core, Box<dyn Error>> {
    let store = FileStore::open(&engine.data_dir)?;
    let generator = GeminiGenerator::with_config(GeminiConfig {
        api_key: engine.api_key.clone(),
        model: engine.model.clone(),
        ..GeminiConfig::default()
    });
    let config = CoreConfig {
        request_timeout: Duration::from_secs(engine.timeout_secs),
    };
    Ok(Core::load(Arc::new(generator), Arc::new(store), config))
}

fn create_client(cli: &Cli) -> Result<Box<dyn Client>, Box<dyn Error>> {
    if cli.local {
        return Ok(Box::new(CoreClient::new(open_core(&cli.engine)?)));
    }
    let config = ClientConfig {
        base_url: cli.server.clone(),
    };
    Ok(Box::new(HttpClientImpl::with_config(config)))
}

async fn execute(client: &dyn Client, command: &Commands) -> Result<(), Box<dyn Error>> {
    let request = match command {
        Commands::Show { ids } => {
            let view = client.get_tree().await?;
            print_tree(&view, *ids);
            return Ok(());
        }
        Commands::Export { output } => {
            let export = client.export().await?;
            let path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&export.file_name));
            std::fs::write(&path, export.contents)?;
            println!("Exported tree to {}", path.display().to_string().bold());
            return Ok(());
        }
        Commands::Instruction { text: None } => {
            let settings = client.settings().await?;
            if settings.instruction.is_empty() {
                println!("{}", "No instruction set".dimmed());
            } else {
                println!("{}", settings.instruction);
            }
            return Ok(());
        }
        Commands::Logs { limit, full } => {
            let logs = client.logs().await?;
            print_logs(&logs, *limit, *full);
            return Ok(());
        }
        Commands::Clear { yes: false } => {
            return Err("refusing to clear the tree without --yes".into());
        }
        Commands::AddRoot => Command::AddRoot,
        Commands::Delete { id } => Command::DeleteNode { id: id.clone() },
        Commands::Edit { id, text } => Command::EditNode {
            id: id.clone(),
            text: text.clone(),
        },
        Commands::Connect { source, target } => Command::Connect {
            source_id: source.clone(),
            target_id: target.clone(),
        },
        Commands::Collapse { id } => Command::ToggleCollapse { id: id.clone() },
        Commands::Pin { id } => Command::TogglePin { id: id.clone() },
        Commands::Move { id, x, y } => Command::MoveNode {
            id: id.clone(),
            position: Position::new(*x, *y),
        },
        Commands::Expand { id, mode, text } => {
            println!("{}", format!("Expanding ({})...", mode).dimmed());
            Command::Expand {
                id: id.clone(),
                mode: *mode,
                text: text.clone(),
            }
        }
        Commands::Refine { id } => Command::Refine { id: id.clone() },
        Commands::Undo => Command::Undo,
        Commands::Redo => Command::Redo,
        Commands::Layout => Command::AutoLayout,
        Commands::Clear { yes: true } => Command::ClearAll { confirmed: true },
        Commands::Instruction { text: Some(text) } => Command::SetInstruction {
            instruction: text.clone(),
        },
        Commands::Serve { .. } | Commands::Completions { .. } => {
            return Err("command must run outside a client".into());
        }
    };

    let outcome = client.command(request).await?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &CommandOutcome) {
    match outcome {
        CommandOutcome::Created { node_id } => {
            println!("{} {}", "Created".green(), node_id.bold());
        }
        CommandOutcome::Applied { changed: true } => println!("{}", "Done".green()),
        CommandOutcome::Applied { changed: false } => println!("{}", "Nothing changed".yellow()),
        CommandOutcome::Connected { edge } => {
            println!(
                "{} {} -> {}",
                "Connected".green(),
                edge.source_id,
                edge.target_id
            );
        }
        CommandOutcome::Expanded { children } if children.is_empty() => {
            println!("{}", "Node no longer exists, nothing added".yellow());
        }
        CommandOutcome::Expanded { children } => {
            println!("{} {} ideas", "Added".green(), children.len());
            for child in children {
                println!("  • {}", child);
            }
        }
        CommandOutcome::Refined { text: Some(text) } => println!("{}", text),
        CommandOutcome::Refined { text: None } => println!("{}", "Node not found".yellow()),
        CommandOutcome::Settings { settings } => {
            println!("{} {}", "Instruction set:".green(), settings.instruction);
        }
    }
}

/// Prints the visible part of the forest with two spaces per depth
fn print_tree(view: &TreeView, show_ids: bool) {
    if root_ids(&view.nodes, &view.edges).is_empty() {
        println!("No ideas yet. Add one with 'thoughtree add-root'");
        return;
    }
    if let Some(status) = &view.status {
        println!("{}", status.italic().cyan());
    }
    for line in tree_lines(view, show_ids) {
        println!("{}", line);
    }
}

/// Visible nodes in depth-first order, each indented by its depth
fn tree_lines(view: &TreeView, show_ids: bool) -> Vec<String> {
    let children = children_map(&view.edges);
    let roots = root_ids(&view.nodes, &view.edges);
    let mut visited: HashSet<&str> = HashSet::new();
    let mut lines = Vec::new();
    let mut stack: Vec<(&str, usize)> = roots.into_iter().rev().map(|id| (id, 0)).collect();
    while let Some((id, depth)) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let Some(node) = view.nodes.iter().find(|n| n.id == id) else {
            continue;
        };
        if node.hidden {
            continue;
        }
        lines.push(format!("{}{}", "  ".repeat(depth), format_node(node, show_ids)));

        if !node.is_collapsed {
            if let Some(kids) = children.get(id) {
                stack.extend(kids.iter().rev().map(|kid| (*kid, depth + 1)));
            }
        }
    }
    lines
}

fn format_node(node: &Node, show_ids: bool) -> String {
    let mut line = String::new();
    if show_ids {
        line.push_str(&format!("{} ", format!("[{}]", node.id).dimmed()));
    }
    if let Some(mode) = node.generated_by {
        line.push_str(&format!("{} ", mode.as_str().blue()));
    }
    let text = if node.is_pinned {
        node.text.yellow().bold().to_string()
    } else {
        node.text.clone()
    };
    line.push_str(&text);
    if node.is_pinned {
        line.push_str(" 📌");
    }
    if node.is_expanding {
        line.push_str(&format!(" {}", "(working)".cyan()));
    }
    if node.is_collapsed && node.has_children {
        line.push_str(&format!(" {}", format!("[+{}]", node.descendant_count).dimmed()));
    }
    line
}

fn print_logs(logs: &[PromptLog], limit: usize, full: bool) {
    if logs.is_empty() {
        println!("{}", "No requests logged yet".dimmed());
        return;
    }
    for entry in logs.iter().take(limit) {
        let mode = entry.mode.map(|m| format!(" ({})", m)).unwrap_or_default();
        println!(
            "{} {}{} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
            format!("{:?}", entry.kind).to_lowercase().bold(),
            mode,
            entry.input_text
        );
        if full {
            println!("{}", entry.full_prompt_text);
        }
        println!("  → {}", entry.response_text);
    }
}
