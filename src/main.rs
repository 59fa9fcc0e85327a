use anyhow::Result;
use clap::Parser;
use codegate::config::Config;
use codegate::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Admission control and task execution in front of a text-generation backend.
#[derive(Debug, Parser)]
#[command(name = "codegate", version, about)]
struct Cli {
    /// Override BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("codegate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting codegate service");
    tracing::info!(
        bind_addr = %config.bind_addr,
        max_concurrent_tasks = config.max_concurrent_tasks,
        max_queue_size = config.max_queue_size,
        api_keys_configured = config.api_keys.is_some(),
        "Configuration loaded"
    );

    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
