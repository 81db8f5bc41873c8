//! Gateway configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use serde::Deserialize;
use std::env;
use std::str::FromStr;

/// Main gateway configuration
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub app: AppSettings,
    pub server: ServerConfig,
    /// Shared pub/sub backend; `None` runs the gateway as a single instance
    pub redis: Option<RedisConfig>,
    /// Identifier of this process among its peers (random when unset)
    pub instance_id: Option<String>,
    pub realtime: RealtimeConfig,
    pub metrics: MetricsConfig,
    pub scaling: ScalingConfig,
}

/// General application settings
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_env")]
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Self::Production),
            "staging" => Ok(Self::Staging),
            "development" => Ok(Self::Development),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
    #[serde(default = "default_redis_max_connections")]
    pub max_connections: u32,
    /// Pub/sub channel shared by all gateway instances
    #[serde(default = "default_relay_channel")]
    pub relay_channel: String,
}

/// Connection lifecycle and admission limits
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
    #[serde(default = "default_max_events_per_second")]
    pub max_events_per_second: u32,
    /// Token bucket capacity; equals `max_events_per_second` unless overridden
    #[serde(default = "default_max_events_per_second")]
    pub rate_limit_burst: u32,
    #[serde(default = "default_bucket_idle_grace_ms")]
    pub bucket_idle_grace_ms: u64,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            max_connections_per_user: default_max_connections_per_user(),
            max_events_per_second: default_max_events_per_second(),
            rate_limit_burst: default_max_events_per_second(),
            bucket_idle_grace_ms: default_bucket_idle_grace_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            connect_timeout_ms: default_connect_timeout_ms(),
            outbound_queue_size: default_outbound_queue_size(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

/// Rolling metrics window
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_window_size_ms")]
    pub window_size_ms: u64,
    #[serde(default = "default_snapshot_interval_ms")]
    pub snapshot_interval_ms: u64,
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size_ms: default_window_size_ms(),
            snapshot_interval_ms: default_snapshot_interval_ms(),
            max_snapshots: default_max_snapshots(),
        }
    }
}

/// Cross-instance relay
#[derive(Debug, Clone, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            publish_timeout_ms: default_publish_timeout_ms(),
        }
    }
}

// Default value functions
fn default_app_name() -> String {
    "courier-gateway".to_string()
}

fn default_env() -> Environment {
    Environment::Development
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_redis_max_connections() -> u32 {
    10
}

fn default_relay_channel() -> String {
    "courier:relay".to_string()
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn default_ping_timeout_ms() -> u64 {
    20_000
}

fn default_max_connections_per_user() -> usize {
    5
}

fn default_max_events_per_second() -> u32 {
    50
}

fn default_bucket_idle_grace_ms() -> u64 {
    60_000
}

fn default_max_payload_bytes() -> usize {
    1_048_576 // 1 MB
}

fn default_connect_timeout_ms() -> u64 {
    45_000
}

fn default_outbound_queue_size() -> usize {
    100
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_window_size_ms() -> u64 {
    60_000
}

fn default_snapshot_interval_ms() -> u64 {
    1_000
}

fn default_max_snapshots() -> usize {
    60
}

fn default_publish_timeout_ms() -> u64 {
    5_000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: default_app_name(),
                env: default_env(),
            },
            server: ServerConfig::default(),
            redis: None,
            instance_id: None,
            realtime: RealtimeConfig::default(),
            metrics: MetricsConfig::default(),
            scaling: ScalingConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if a variable is set to a value that cannot be parsed
    /// or if the resulting configuration is inconsistent.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_events_per_second = parse_or(&lookup, "MAX_EVENTS_PER_SECOND", default_max_events_per_second)?;
        let window_size_ms = parse_or(&lookup, "WINDOW_SIZE_MS", default_window_size_ms)?;
        let snapshot_interval_ms = parse_or(&lookup, "SNAPSHOT_INTERVAL_MS", default_snapshot_interval_ms)?;
        let derived_snapshots = if snapshot_interval_ms == 0 {
            0
        } else {
            (window_size_ms / snapshot_interval_ms) as usize
        };

        let config = Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: parse_or(&lookup, "APP_ENV", default_env)?,
            },
            server: ServerConfig {
                host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
                port: parse_or(&lookup, "GATEWAY_PORT", default_port)?,
            },
            redis: match lookup("REDIS_URL") {
                Some(url) if !url.trim().is_empty() => Some(RedisConfig {
                    url,
                    max_connections: parse_or(&lookup, "REDIS_MAX_CONNECTIONS", default_redis_max_connections)?,
                    relay_channel: lookup("RELAY_CHANNEL").unwrap_or_else(default_relay_channel),
                }),
                _ => None,
            },
            instance_id: lookup("INSTANCE_ID").filter(|s| !s.trim().is_empty()),
            realtime: RealtimeConfig {
                ping_interval_ms: parse_or(&lookup, "PING_INTERVAL_MS", default_ping_interval_ms)?,
                ping_timeout_ms: parse_or(&lookup, "PING_TIMEOUT_MS", default_ping_timeout_ms)?,
                max_connections_per_user: parse_or(
                    &lookup,
                    "MAX_CONNECTIONS_PER_USER",
                    default_max_connections_per_user,
                )?,
                max_events_per_second,
                rate_limit_burst: parse_or(&lookup, "RATE_LIMIT_BURST", || max_events_per_second)?,
                bucket_idle_grace_ms: parse_or(&lookup, "BUCKET_IDLE_GRACE_MS", default_bucket_idle_grace_ms)?,
                max_payload_bytes: parse_or(&lookup, "MAX_HTTP_BUFFER_SIZE", default_max_payload_bytes)?,
                connect_timeout_ms: parse_or(&lookup, "CONNECT_TIMEOUT_MS", default_connect_timeout_ms)?,
                outbound_queue_size: parse_or(&lookup, "OUTBOUND_QUEUE_SIZE", default_outbound_queue_size)?,
                shutdown_grace_ms: parse_or(&lookup, "SHUTDOWN_GRACE_MS", default_shutdown_grace_ms)?,
            },
            metrics: MetricsConfig {
                window_size_ms,
                snapshot_interval_ms,
                max_snapshots: parse_or(&lookup, "MAX_SNAPSHOTS", || derived_snapshots)?,
            },
            scaling: ScalingConfig {
                publish_timeout_ms: parse_or(
                    &lookup,
                    "SCALING_ADAPTER_PUBLISH_TIMEOUT_MS",
                    default_publish_timeout_ms,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would stall timers or admit nothing
    ///
    /// Production deployments run more than one instance, so the relay bus
    /// is required there.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.env.is_production() && self.redis.is_none() {
            return Err(ConfigError::MissingVar("REDIS_URL"));
        }

        let checks: [(&'static str, bool); 9] = [
            ("PING_INTERVAL_MS", self.realtime.ping_interval_ms == 0),
            ("PING_TIMEOUT_MS", self.realtime.ping_timeout_ms == 0),
            ("MAX_CONNECTIONS_PER_USER", self.realtime.max_connections_per_user == 0),
            ("MAX_EVENTS_PER_SECOND", self.realtime.max_events_per_second == 0),
            ("RATE_LIMIT_BURST", self.realtime.rate_limit_burst == 0),
            ("OUTBOUND_QUEUE_SIZE", self.realtime.outbound_queue_size == 0),
            ("SNAPSHOT_INTERVAL_MS", self.metrics.snapshot_interval_ms == 0),
            ("MAX_SNAPSHOTS", self.metrics.max_snapshots == 0),
            ("SCALING_ADAPTER_PUBLISH_TIMEOUT_MS", self.scaling.publish_timeout_ms == 0),
        ];

        match checks.iter().find(|(_, invalid)| *invalid) {
            Some((name, _)) => Err(ConfigError::InvalidValue(name, "must be greater than zero".to_string())),
            None => Ok(()),
        }
    }
}

fn parse_or<F, T, D>(lookup: &F, key: &'static str, default: D) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
    D: FnOnce() -> T,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(key, e.to_string())),
        None => Ok(default()),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_environment_is_production() {
        assert!(!Environment::Development.is_production());
        assert!(!Environment::Staging.is_production());
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_server_address() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        };
        assert_eq!(config.address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_defaults_without_env() {
        let config = GatewayConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.realtime.ping_interval_ms, 25_000);
        assert_eq!(config.realtime.ping_timeout_ms, 20_000);
        assert_eq!(config.realtime.max_connections_per_user, 5);
        assert_eq!(config.realtime.max_events_per_second, 50);
        assert_eq!(config.realtime.rate_limit_burst, 50);
        assert_eq!(config.realtime.max_payload_bytes, 1_048_576);
        assert_eq!(config.realtime.connect_timeout_ms, 45_000);
        assert_eq!(config.metrics.window_size_ms, 60_000);
        assert_eq!(config.metrics.snapshot_interval_ms, 1_000);
        assert_eq!(config.metrics.max_snapshots, 60);
        assert_eq!(config.scaling.publish_timeout_ms, 5_000);
        assert!(config.redis.is_none());
        assert!(config.instance_id.is_none());
    }

    #[test]
    fn test_burst_follows_rate_unless_set() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("MAX_EVENTS_PER_SECOND", "20")])).unwrap();
        assert_eq!(config.realtime.rate_limit_burst, 20);

        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("MAX_EVENTS_PER_SECOND", "20"),
            ("RATE_LIMIT_BURST", "5"),
        ]))
        .unwrap();
        assert_eq!(config.realtime.rate_limit_burst, 5);
    }

    #[test]
    fn test_max_snapshots_derived_from_window() {
        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("WINDOW_SIZE_MS", "30000"),
            ("SNAPSHOT_INTERVAL_MS", "500"),
        ]))
        .unwrap();
        assert_eq!(config.metrics.max_snapshots, 60);

        let config = GatewayConfig::from_lookup(lookup_from(&[("MAX_SNAPSHOTS", "10")])).unwrap();
        assert_eq!(config.metrics.max_snapshots, 10);
    }

    #[test]
    fn test_redis_section_is_optional() {
        let config = GatewayConfig::from_lookup(lookup_from(&[("REDIS_URL", "redis://cache:6379")])).unwrap();
        let redis = config.redis.unwrap();
        assert_eq!(redis.url, "redis://cache:6379");
        assert_eq!(redis.relay_channel, "courier:relay");
        assert_eq!(redis.max_connections, 10);
    }

    #[test]
    fn test_production_requires_redis() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("APP_ENV", "production")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("REDIS_URL")));

        let err =
            GatewayConfig::from_lookup(lookup_from(&[("APP_ENV", "production"), ("REDIS_URL", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("REDIS_URL")));

        let config = GatewayConfig::from_lookup(lookup_from(&[
            ("APP_ENV", "production"),
            ("REDIS_URL", "redis://cache:6379"),
        ]))
        .unwrap();
        assert!(config.redis.is_some());
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("PING_INTERVAL_MS", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("PING_INTERVAL_MS", _)));
    }

    #[test]
    fn test_zero_values_rejected() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("MAX_CONNECTIONS_PER_USER", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("MAX_CONNECTIONS_PER_USER", _)));

        let err = GatewayConfig::from_lookup(lookup_from(&[("SNAPSHOT_INTERVAL_MS", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("SNAPSHOT_INTERVAL_MS", _)));
    }

    #[test]
    fn test_unknown_environment_rejected() {
        let err = GatewayConfig::from_lookup(lookup_from(&[("APP_ENV", "qa")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("APP_ENV", _)));
    }
}
