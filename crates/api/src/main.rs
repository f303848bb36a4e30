//! Remote-Sensing Analysis Server - Main Entry Point

use api::{init_logging, run_server, AppConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging);

    info!("=== Remote-Sensing Analysis Server v{} ===", env!("CARGO_PKG_VERSION"));
    info!(
        "Model backend: {:?}, tile policy: {:?}",
        config.models.backend, config.tiles.policy
    );

    run_server(config).await
}
