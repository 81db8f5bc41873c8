//! Gateway server setup
//!
//! Provides the WebSocket endpoint, the HTTP endpoints and server bootstrap.

mod endpoints;
mod handler;
mod state;

pub use endpoints::DispatchRequest;
pub use handler::{gateway_handler, GatewayQuery, USER_ID_HEADER};
pub use state::GatewayState;

use crate::router::EventRouter;
use axum::{
    routing::{get, post},
    Router,
};
use courier_cache::{InMemoryBus, MessageBus, RedisBus};
use courier_common::{AppError, GatewayConfig};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/metrics", get(endpoints::current_metrics))
        .route("/metrics/history", get(endpoints::metrics_history))
        .route("/internal/dispatch", post(endpoints::dispatch_event))
        .route("/health", get(endpoints::health_check))
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Redis bus when configured, otherwise a standalone in-process bus
pub async fn connect_bus(config: &GatewayConfig) -> Result<Arc<dyn MessageBus>, AppError> {
    match &config.redis {
        Some(redis) => {
            tracing::info!("Connecting to Redis...");
            let bus = RedisBus::connect(redis).await.map_err(AppError::cache)?;
            Ok(Arc::new(bus))
        }
        None => {
            tracing::info!("No REDIS_URL set, running as a single instance");
            Ok(Arc::new(InMemoryBus::standalone()))
        }
    }
}

/// Serve until `signal` resolves, then drain and close every session
pub async fn serve<F>(listener: TcpListener, state: GatewayState, signal: F) -> Result<(), AppError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let router = Arc::clone(state.router());
    let app = create_app(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            signal.await;
            tracing::info!("Shutdown signal received");
            // Upgraded sockets are not tracked by the HTTP server; close them first
            router.shutdown().await;
        })
        .await
        .map_err(|e| AppError::Server(e.to_string()))
}

/// Run the complete gateway server with configuration
pub async fn run(config: GatewayConfig) -> Result<(), AppError> {
    let addr = config.server.address();

    let bus = connect_bus(&config).await?;
    let router = EventRouter::new(&config, bus);
    router.start();

    let listener = TcpListener::bind(&addr).await.map_err(|e| AppError::Bind {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!("Gateway listening on ws://{}/gateway", addr);

    let state = GatewayState::new(Arc::clone(&router), config);
    serve(listener, state, shutdown_signal()).await?;

    // No-op if the graceful path already ran
    router.shutdown().await;
    Ok(())
}

/// Resolve on Ctrl-C or, on unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
