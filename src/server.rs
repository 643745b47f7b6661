use crate::config::Config;
use crate::error::ThrottlerResult;
use crate::handlers::{
    check_rate_limit, get_usage, health_check, list_strategies, remove_limit, set_limit, AppState,
    SharedState,
};
use crate::limiter::Limiter;
use crate::middleware::logging_middleware;
use crate::store::{CounterStore, MemoryStore, RedisStore};
use crate::strategy::StrategySet;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP router around a limiter
pub fn create_app(limiter: Limiter) -> Router {
    let shared_state: SharedState = Arc::new(AppState { limiter });

    Router::new()
        .route("/limits/:identity/check", post(check_rate_limit))
        .route(
            "/limits/:identity/:strategy",
            get(get_usage).put(set_limit).delete(remove_limit),
        )
        .route("/strategies", get(list_strategies))
        .route("/health", get(health_check))
        .with_state(shared_state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
}

impl Server {
    pub async fn new(config: Config) -> ThrottlerResult<Self> {
        let store: Arc<dyn CounterStore> = if config.redis_url.is_empty() {
            tracing::warn!("REDIS_URL is empty, counting in local-only memory mode");
            Arc::new(MemoryStore::new())
        } else {
            Arc::new(RedisStore::connect(&config.redis_url).await?)
        };

        let strategies = StrategySet::new(config.strategies.clone())?;
        let limiter = Limiter::new(store, strategies).await?;

        Ok(Self {
            app: create_app(limiter),
            bind_addr: config.bind_addr,
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Limiter server listening on {}", self.bind_addr);
        tracing::info!("Health check available at /health");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
