//! Courier gateway entry point
//!
//! Run with:
//! ```bash
//! cargo run -p courier-gateway
//! ```
//!
//! Configuration is loaded from environment variables.

use courier_common::{try_init_tracing_with_config, GatewayConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Configuration picks the log format, so load it before tracing starts
    let config = GatewayConfig::from_env();

    let env = config.as_ref().map(|c| c.app.env).unwrap_or_default();
    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        env = ?config.app.env,
        port = config.server.port,
        redis = config.redis.is_some(),
        "Starting courier gateway..."
    );

    if let Err(e) = courier_gateway::run(config).await {
        error!(error = %e, code = e.error_code(), "Gateway failed");
        std::process::exit(1);
    }

    info!("Gateway stopped");
}
