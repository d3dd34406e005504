//! Example client for the thoughtree API
//!
//! Expects a server started with `thoughtree serve` and a configured API key.

use thoughtree::api::{Client, HttpClientImpl};
use thoughtree::command::{Command, CommandOutcome};
use thoughtree::models::ExpandMode;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Create a client with default configuration (localhost:3000)
    // You can customize with ClientConfig if needed
    let client = HttpClientImpl::new();
    println!("Thoughtree API Client Example");
    println!("-----------------------------");

    println!("\nFetching tree...");
    let tree = client.get_tree().await?;
    println!("Tree has {} nodes", tree.nodes.len());

    println!("\nAdding a root...");
    let root = match client.command(Command::AddRoot).await? {
        CommandOutcome::Created { node_id } => node_id,
        other => return Err(format!("unexpected outcome: {:?}", other).into()),
    };
    client
        .command(Command::EditNode {
            id: root.clone(),
            text: "Customers churn after the first month".to_string(),
        })
        .await?;
    println!("Added root {}", root);

    println!("\nAsking why...");
    let outcome = client
        .command(Command::Expand {
            id: root.clone(),
            mode: ExpandMode::Why,
            text: None,
        })
        .await?;
    if let CommandOutcome::Expanded { children } = outcome {
        let tree = client.get_tree().await?;
        for child in children {
            if let Some(node) = tree.nodes.iter().find(|n| n.id == child) {
                println!("  • {}", node.text);
            }
        }
    }

    println!("\nUndoing the expansion...");
    client.command(Command::Undo).await?;
    let status = client.status().await?;
    println!("Can redo: {}", status.can_redo);

    println!("\nAll operations completed successfully!");
    Ok(())
}
