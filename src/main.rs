use anyhow::Result;
use fixed_window_limiter::config::Config;
use fixed_window_limiter::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config =
        Config::load().map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("fixed_window_limiter={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let strategies: Vec<String> = config.strategies.iter().map(|s| s.to_string()).collect();
    tracing::info!("Starting fixed-window limiter");
    tracing::info!(
        "Configuration: bind_addr={}, redis_url={}, strategies=[{}]",
        config.bind_addr,
        config.redis_url,
        strategies.join(", ")
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
