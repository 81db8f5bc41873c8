//! Metric records served by the metrics endpoints

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Counters over one fixed time slice
///
/// Connected clients is a point-in-time gauge, not a running total.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    pub taken_at: DateTime<Utc>,
    pub slice_ms: u64,
    pub connected_clients: usize,
    pub events_processed: u64,
    pub rate_limit_rejections: u64,
    pub events_per_second: f64,
    pub average_latency_ms: f64,
}

/// Document served on `GET /metrics`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub connections: ConnectionMetrics,
    pub performance: PerformanceMetrics,
    pub server: ServerMetrics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    pub current: usize,
    pub peak: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub events_per_second: f64,
    pub average_latency_ms: f64,
    pub total_events_processed: u64,
    pub rate_limit_rejections: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetrics {
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
}

/// Document served on `GET /metrics/history`, oldest snapshot first
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsHistory {
    pub window_size_ms: u64,
    pub snapshot_interval_ms: u64,
    pub snapshots: Vec<MetricSnapshot>,
}
