use anyhow::Result;
use crossed_market_searcher::{bot::Searcher, config::Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    info!("Starting crossed market searcher");

    // Load configuration
    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Configuration loaded successfully");

    let mut searcher = Searcher::new(config).await.map_err(|e| {
        error!("Failed to initialize searcher: {}", e);
        e
    })?;

    // Handle graceful shutdown
    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown_signal.cancel();
        }
    });

    match searcher.run(shutdown).await {
        Ok(_) => info!("Searcher completed successfully"),
        Err(e) => error!("Searcher error: {}", e),
    }

    info!("Crossed market searcher shutdown complete");
    Ok(())
}
