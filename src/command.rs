//! The operations surface as data
//!
//! Every user-facing operation is a [`Command`]. Outer surfaces (HTTP, CLI)
//! build commands and hand them to [`Core::dispatch`].

use serde::{Deserialize, Serialize};

use crate::core::{Core, CoreError};
use crate::models::{Edge, ExpandMode, NodeId, Position, Settings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    AddRoot,
    DeleteNode {
        id: NodeId,
    },
    EditNode {
        id: NodeId,
        text: String,
    },
    Connect {
        source_id: NodeId,
        target_id: NodeId,
    },
    ToggleCollapse {
        id: NodeId,
    },
    TogglePin {
        id: NodeId,
    },
    MoveNode {
        id: NodeId,
        position: Position,
    },
    Expand {
        id: NodeId,
        mode: ExpandMode,
        /// Pending edit text to expand instead of the stored text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    Refine {
        id: NodeId,
    },
    Undo,
    Redo,
    AutoLayout,
    ClearAll {
        #[serde(default)]
        confirmed: bool,
    },
    SetInstruction {
        instruction: String,
    },
}

impl Command {
    /// Maps a keyboard chord such as `ctrl+shift+z` to its reserved command.
    ///
    /// Only undo and redo are reserved. Modifier names are case-insensitive;
    /// `cmd`, `meta` and `super` are treated alike.
    pub fn from_shortcut(chord: &str) -> Option<Command> {
        let mut ctrl = false;
        let mut shift = false;
        let mut key = None;

        for part in chord.split('+').map(|p| p.trim().to_ascii_lowercase()) {
            match part.as_str() {
                "ctrl" | "control" | "cmd" | "meta" | "super" => ctrl = true,
                "shift" => shift = true,
                "" => return None,
                _ if key.is_none() => key = Some(part),
                _ => return None,
            }
        }

        match (ctrl, shift, key?.as_str()) {
            (true, false, "z") => Some(Command::Undo),
            (true, true, "z") | (true, false, "y") => Some(Command::Redo),
            _ => None,
        }
    }
}

/// What a dispatched command produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// A node was created
    Created { node_id: NodeId },
    /// `changed` is false when the command was a no-op
    Applied { changed: bool },
    Connected { edge: Edge },
    Expanded { children: Vec<NodeId> },
    /// The node's text after refinement, `None` if the node is gone
    Refined { text: Option<String> },
    Settings { settings: Settings },
}

impl Core {
    /// Runs a single command against the live state
    pub async fn dispatch(&self, command: Command) -> Result<CommandOutcome, CoreError> {
        let applied = |changed| Ok(CommandOutcome::Applied { changed });

        match command {
            Command::AddRoot => Ok(CommandOutcome::Created {
                node_id: self.add_root(),
            }),
            Command::DeleteNode { id } => applied(self.delete_node(&id)),
            Command::EditNode { id, text } => applied(self.edit_node(&id, &text)),
            Command::Connect {
                source_id,
                target_id,
            } => {
                let edge = self.connect(&source_id, &target_id)?;
                Ok(CommandOutcome::Connected { edge })
            }
            Command::ToggleCollapse { id } => applied(self.toggle_collapse(&id)),
            Command::TogglePin { id } => applied(self.toggle_pin(&id)),
            Command::MoveNode { id, position } => applied(self.move_node(&id, position)),
            Command::Expand { id, mode, text } => {
                let children = self.expand(&id, mode, text.as_deref()).await?;
                Ok(CommandOutcome::Expanded { children })
            }
            Command::Refine { id } => Ok(CommandOutcome::Refined {
                text: self.refine(&id).await?,
            }),
            Command::Undo => applied(self.undo()),
            Command::Redo => applied(self.redo()),
            Command::AutoLayout => {
                self.auto_layout();
                applied(true)
            }
            Command::ClearAll { confirmed } => applied(self.clear_all(confirmed)),
            Command::SetInstruction { instruction } => Ok(CommandOutcome::Settings {
                settings: self.set_instruction(&instruction),
            }),
        }
    }
}
