//! Rolling-window operational metrics

mod aggregator;
mod snapshot;

pub use aggregator::{ConnectionGauge, MetricKind, MetricsAggregator, MetricsError};
pub use snapshot::{
    ConnectionMetrics, MetricSnapshot, MetricsHistory, MetricsReport, PerformanceMetrics, ServerMetrics,
};
