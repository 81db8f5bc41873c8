//! Event router
//!
//! Single entry point for business logic: `dispatch` admits an event against
//! the sender's rate limit, delivers it to the target's local sessions or
//! relays it to the instance holding the target, and reports where it went.
//! The router also owns the lifecycle of every background task.

use super::delivery::DeliveryResult;
use crate::connection::{ConnectionRegistry, PresenceEvent};
use crate::error::GatewayResult;
use crate::heartbeat::HeartbeatMonitor;
use crate::limiter::RateLimiter;
use crate::metrics::{ConnectionGauge, MetricKind, MetricsAggregator};
use crate::protocol::CloseCode;
use crate::scaling::{RelayHandler, RelayMessage, ScalingAdapter};
use courier_cache::MessageBus;
use courier_common::{EventType, GatewayConfig, InstanceId, RealtimeConfig, UserId};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How often shutdown checks whether outbound queues have drained
const DRAIN_POLL: Duration = Duration::from_millis(10);

/// Composition root of the realtime core
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    limiter: Arc<RateLimiter>,
    metrics: Arc<MetricsAggregator>,
    scaling: Arc<ScalingAdapter>,
    heartbeat: Arc<HeartbeatMonitor>,
    realtime: RealtimeConfig,

    /// Taken by `start`; created up front so no transition is missed
    presence_rx: Mutex<Option<broadcast::Receiver<PresenceEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl EventRouter {
    /// Wire up all components over the given bus backend
    #[must_use]
    pub fn new(config: &GatewayConfig, bus: Arc<dyn MessageBus>) -> Arc<Self> {
        let instance_id = config
            .instance_id
            .as_deref()
            .map_or_else(InstanceId::generate, InstanceId::new);

        let registry = Arc::new(ConnectionRegistry::from_config(&config.realtime));
        let gauge: Arc<dyn ConnectionGauge> = registry.clone();
        let presence_rx = registry.subscribe_presence();
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(instance = %instance_id, "Event router created");

        Arc::new(Self {
            limiter: Arc::new(RateLimiter::from_config(&config.realtime)),
            metrics: Arc::new(MetricsAggregator::new(gauge, &config.metrics)),
            scaling: Arc::new(ScalingAdapter::from_config(bus, instance_id, &config.scaling)),
            heartbeat: Arc::new(HeartbeatMonitor::from_config(registry.clone(), &config.realtime)),
            registry,
            realtime: config.realtime.clone(),
            presence_rx: Mutex::new(Some(presence_rx)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    #[must_use]
    pub fn scaling(&self) -> &Arc<ScalingAdapter> {
        &self.scaling
    }

    #[must_use]
    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        self.scaling.instance_id()
    }

    #[must_use]
    pub fn realtime_config(&self) -> &RealtimeConfig {
        &self.realtime
    }

    /// Spawn the background tasks: relay subscription, presence sync,
    /// heartbeat sweeps, metric snapshots and rate-bucket collection
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::warn!("Event router is already running");
            return;
        }

        let mut tasks = Vec::with_capacity(5);

        let registry = Arc::clone(&self.registry);
        let handler: RelayHandler = Arc::new(move |message: RelayMessage| {
            deliver_relayed(&registry, &message);
        });
        tasks.push(self.scaling.subscribe(handler, self.shutdown_tx.subscribe()));

        if let Some(presence_rx) = self.presence_rx.lock().take() {
            tasks.push(self.spawn_presence_sync(presence_rx));
        }

        tasks.push(Arc::clone(&self.heartbeat).start(self.shutdown_tx.subscribe()));
        tasks.push(Arc::clone(&self.metrics).start(self.shutdown_tx.subscribe()));
        tasks.push(
            Arc::clone(&self.limiter).start_gc(Arc::clone(&self.registry), self.shutdown_tx.subscribe()),
        );

        self.tasks.lock().extend(tasks);
        tracing::info!(instance = %self.instance_id(), "Event router started");
    }

    /// Check an event against the sender's rate limit, counting rejections
    pub fn admit(&self, sender: &UserId, event_type: &EventType) -> GatewayResult<()> {
        self.limiter.try_admit(sender, event_type).inspect_err(|_| {
            self.metrics.record(MetricKind::Rejected, Duration::ZERO);
        })
    }

    /// Route one event from `sender` to every session of `target`
    ///
    /// Rate-limit rejections and relay failures are returned as errors;
    /// a target with no session anywhere is `Ok(DeliveryResult::Undelivered)`.
    pub async fn dispatch(
        &self,
        sender: &UserId,
        event_type: EventType,
        target: &UserId,
        payload: Value,
    ) -> GatewayResult<DeliveryResult> {
        let started = Instant::now();
        self.admit(sender, &event_type)?;

        let result = self.route(&event_type, target, payload).await;
        self.metrics.record(MetricKind::Processed, started.elapsed());

        match &result {
            Ok(outcome) => tracing::trace!(
                sender = %sender,
                target_user = %target,
                event_type = %event_type,
                outcome = ?outcome,
                "Event dispatched"
            ),
            Err(e) => tracing::warn!(
                sender = %sender,
                target_user = %target,
                event_type = %event_type,
                error = %e,
                "Event dispatch failed"
            ),
        }

        result
    }

    async fn route(&self, event_type: &EventType, target: &UserId, payload: Value) -> GatewayResult<DeliveryResult> {
        let local = if self.registry.is_local(target) {
            // Sessions that fail here are torn down by the registry
            self.registry.deliver(target, event_type, &payload).delivered
        } else {
            0
        };

        // Other instances may hold sessions of the same user
        let relay_seq = match self.scaling.relay(target, *event_type, payload).await {
            Ok(seq) => seq,
            Err(e) if local > 0 => {
                tracing::warn!(target_user = %target, error = %e, "Relay failed after local delivery");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(match (local, relay_seq) {
            (0, None) => DeliveryResult::Undelivered,
            (0, Some(seq)) => DeliveryResult::Relayed { seq },
            (sessions, relay_seq) => DeliveryResult::Delivered { sessions, relay_seq },
        })
    }

    fn spawn_presence_sync(&self, mut presence_rx: broadcast::Receiver<PresenceEvent>) -> JoinHandle<()> {
        let scaling = Arc::clone(&self.scaling);
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = presence_rx.recv() => match received {
                        Ok(event) => sync_presence(&scaling, &event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(lagged = n, "Presence sync lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            // Flush transitions produced by the final close-all
                            while let Ok(event) = presence_rx.try_recv() {
                                sync_presence(&scaling, &event).await;
                            }
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Presence sync stopped");
        })
    }

    /// Stop accepting sessions, drain outbound queues for up to the grace
    /// period, close what is left and stop every background task
    pub async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.registry.stop_accepting();
        tracing::info!(sessions = self.registry.session_count(), "Draining sessions");

        let deadline = Instant::now() + Duration::from_millis(self.realtime.shutdown_grace_ms);
        while self.registry.pending_frames() > 0 && Instant::now() < deadline {
            tokio::time::sleep(DRAIN_POLL).await;
        }

        let pending = self.registry.pending_frames();
        let closed = self.registry.close_all(CloseCode::ServerShutdown);
        if pending > 0 {
            tracing::warn!(pending, "Grace period elapsed with frames still queued");
        }

        let _ = self.shutdown_tx.send(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        if let Err(e) = self.scaling.shutdown().await {
            tracing::warn!(error = %e, "Bus shutdown failed");
        }

        tracing::info!(closed, "Event router stopped");
    }
}

async fn sync_presence(scaling: &ScalingAdapter, event: &PresenceEvent) {
    let result = match event {
        PresenceEvent::Online { user_id, .. } => scaling.mark_online(user_id).await,
        PresenceEvent::Offline { user_id, .. } => scaling.mark_offline(user_id).await,
    };

    if let Err(e) = result {
        tracing::warn!(
            user_id = %event.user_id(),
            online = event.is_online(),
            error = %e,
            "Presence update failed"
        );
    }
}

fn deliver_relayed(registry: &ConnectionRegistry, message: &RelayMessage) {
    if !registry.is_local(&message.target_user_id) {
        tracing::trace!(
            target_user = %message.target_user_id,
            origin = %message.origin_instance,
            "Relay target not connected here"
        );
        return;
    }

    let outcome = registry.deliver(&message.target_user_id, &message.event_type, &message.payload);
    tracing::trace!(
        target_user = %message.target_user_id,
        origin = %message.origin_instance,
        seq = message.seq,
        delivered = outcome.delivered,
        "Relay message delivered"
    );
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("instance_id", self.instance_id())
            .field("registry", &self.registry)
            .field("started", &self.started.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish()
    }
}
