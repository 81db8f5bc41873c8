//! Metrics aggregator
//!
//! Event counters are plain atomics. The latency sum and its sample count
//! sit behind one short lock so a sample never lands in two slices. A timer
//! folds them into an immutable `MetricSnapshot` every snapshot
//! interval and keeps the most recent `max_snapshots` of them.

use super::snapshot::{
    ConnectionMetrics, MetricSnapshot, MetricsHistory, MetricsReport, PerformanceMetrics, ServerMetrics,
};
use chrono::{DateTime, Utc};
use courier_common::MetricsConfig;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Source of the live connection count
pub trait ConnectionGauge: Send + Sync {
    fn connected(&self) -> usize;

    /// All-time maximum of `connected`
    fn peak(&self) -> usize;
}

/// What a recorded sample counts as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Event admitted and routed
    Processed,
    /// Event refused by the rate limiter
    Rejected,
}

/// Snapshot failures; logged and skipped, never propagated to delivery
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Snapshot slice has zero length")]
    EmptySlice,
}

/// Latency accumulated since the last snapshot boundary
#[derive(Debug, Default, Clone, Copy)]
struct LatencySlice {
    sum_us: u64,
    samples: u64,
}

impl LatencySlice {
    fn average_ms(self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.sum_us as f64 / self.samples as f64 / 1000.0
    }
}

/// Rolling-window metrics
pub struct MetricsAggregator {
    gauge: Arc<dyn ConnectionGauge>,

    // Since the last snapshot boundary
    events: AtomicU64,
    rejections: AtomicU64,
    latency: Mutex<LatencySlice>,

    // All-time
    total_events: AtomicU64,
    total_rejections: AtomicU64,

    window: Mutex<VecDeque<MetricSnapshot>>,
    slice_started: Mutex<Instant>,
    max_snapshots: usize,
    snapshot_interval: Duration,
    window_size: Duration,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    #[must_use]
    pub fn new(gauge: Arc<dyn ConnectionGauge>, config: &MetricsConfig) -> Self {
        let now = Instant::now();
        Self {
            gauge,
            events: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            latency: Mutex::new(LatencySlice::default()),
            total_events: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(config.max_snapshots)),
            slice_started: Mutex::new(now),
            max_snapshots: config.max_snapshots,
            snapshot_interval: Duration::from_millis(config.snapshot_interval_ms),
            window_size: Duration::from_millis(config.window_size_ms),
            started: now,
            started_at: Utc::now(),
        }
    }

    /// Count one event and its latency
    pub fn record(&self, kind: MetricKind, latency: Duration) {
        match kind {
            MetricKind::Processed => {
                self.events.fetch_add(1, Ordering::Relaxed);
                self.total_events.fetch_add(1, Ordering::Relaxed);
                let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
                let mut latency = self.latency.lock();
                latency.sum_us = latency.sum_us.saturating_add(micros);
                latency.samples += 1;
            }
            MetricKind::Rejected => {
                self.rejections.fetch_add(1, Ordering::Relaxed);
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Close the current slice into a snapshot and reset the running counters
    pub fn take_snapshot(&self) -> Result<MetricSnapshot, MetricsError> {
        let mut slice_started = self.slice_started.lock();
        let now = Instant::now();
        let slice = now.saturating_duration_since(*slice_started);
        if slice.is_zero() {
            return Err(MetricsError::EmptySlice);
        }
        *slice_started = now;

        let events = self.events.swap(0, Ordering::Relaxed);
        let rejections = self.rejections.swap(0, Ordering::Relaxed);
        let latency = std::mem::take(&mut *self.latency.lock());
        drop(slice_started);

        let snapshot = MetricSnapshot {
            taken_at: Utc::now(),
            slice_ms: u64::try_from(slice.as_millis()).unwrap_or(u64::MAX),
            connected_clients: self.gauge.connected(),
            events_processed: events,
            rate_limit_rejections: rejections,
            events_per_second: events as f64 / slice.as_secs_f64(),
            average_latency_ms: latency.average_ms(),
        };

        let mut window = self.window.lock();
        window.push_back(snapshot.clone());
        while window.len() > self.max_snapshots {
            window.pop_front();
        }

        Ok(snapshot)
    }

    /// Most recent snapshot
    #[must_use]
    pub fn latest(&self) -> Option<MetricSnapshot> {
        self.window.lock().back().cloned()
    }

    /// Retained snapshots, oldest first
    #[must_use]
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        self.window.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn history(&self) -> MetricsHistory {
        MetricsHistory {
            window_size_ms: u64::try_from(self.window_size.as_millis()).unwrap_or(u64::MAX),
            snapshot_interval_ms: u64::try_from(self.snapshot_interval.as_millis()).unwrap_or(u64::MAX),
            snapshots: self.snapshots(),
        }
    }

    #[must_use]
    pub fn total_events_processed(&self) -> u64 {
        self.total_events.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Current figures; rates come from the latest snapshot only
    #[must_use]
    pub fn current_metrics(&self) -> MetricsReport {
        let (events_per_second, average_latency_ms) = self
            .window
            .lock()
            .back()
            .map_or((0.0, 0.0), |s| (s.events_per_second, s.average_latency_ms));

        MetricsReport {
            connections: ConnectionMetrics {
                current: self.gauge.connected(),
                peak: self.gauge.peak(),
            },
            performance: PerformanceMetrics {
                events_per_second,
                average_latency_ms,
                total_events_processed: self.total_events_processed(),
                rate_limit_rejections: self.total_rejections(),
            },
            server: ServerMetrics {
                uptime_seconds: self.started.elapsed().as_secs(),
                started_at: self.started_at,
            },
        }
    }

    /// Snapshot every interval until `shutdown` flips to true
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.snapshot_interval.max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.take_snapshot() {
                            tracing::warn!(error = %e, "Metrics snapshot skipped");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Metrics aggregator stopped");
        })
    }
}

impl std::fmt::Debug for MetricsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsAggregator")
            .field("snapshots", &self.window.lock().len())
            .field("max_snapshots", &self.max_snapshots)
            .field("total_events", &self.total_events_processed())
            .finish()
    }
}
