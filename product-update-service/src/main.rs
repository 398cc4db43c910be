use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use product_update_service::{
    config::{Cli, Settings},
    service::Service,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(std::io::stdout().is_terminal())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let settings = Settings::resolve(&cli)?;

    let service = Service::bind(settings.clone()).await?;
    let addr = service.local_addr()?;
    info!("product update service listening on {}", addr);
    info!(
        workers = settings.workers,
        queue_capacity = settings.queue_capacity,
        store_shards = settings.store_shards,
        drain_timeout_ms = settings.drain_timeout_ms,
        "pipeline configured"
    );

    service.run_until_signal().await?;
    Ok(())
}
