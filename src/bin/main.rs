//! Binary entrypoint for the thoughtree tool

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    thoughtree::cli::run().await
}
