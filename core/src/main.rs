use anyhow::Result;
use clap::Parser;
use eosin_sync_core::{Controller, SyncConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config = SyncConfig::parse();
    let controller = Controller::start(config).await?;
    controller.run_until_shutdown().await;
    Ok(())
}
