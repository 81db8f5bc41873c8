//! # courier-common
//!
//! Shared utilities including identifiers, configuration, error handling, and telemetry.

pub mod config;
pub mod error;
pub mod ids;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppSettings, ConfigError, Environment, GatewayConfig, MetricsConfig, RealtimeConfig,
    RedisConfig, ScalingConfig, ServerConfig,
};
pub use error::{AppError, AppResult, ErrorResponse};
pub use ids::{EventType, InstanceId, SessionId, UnknownEventType, UserId};
pub use telemetry::{
    init_tracing, init_tracing_with_config, try_init_tracing, try_init_tracing_with_config,
    TracingConfig, TracingError,
};
