//! Connection registry
//!
//! Tracks all live sessions using DashMap for thread-safe access and owns
//! every session's transport handle. Nothing outside the registry writes to
//! or closes a session directly; callers refer to sessions by id.

use super::presence::PresenceEvent;
use super::session::{SessionEntry, SessionInfo, TransportHandle, TransportKind};
use crate::error::{GatewayError, GatewayResult};
use crate::metrics::ConnectionGauge;
use crate::protocol::{CloseCode, GatewayMessage};
use chrono::{DateTime, Utc};
use courier_common::{EventType, RealtimeConfig, SessionId, UserId};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Presence events buffered per subscriber before it lags
const PRESENCE_BUFFER: usize = 1024;

/// Outcome of delivering one event to a user's local sessions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDelivery {
    /// Sessions the event was queued on
    pub delivered: usize,
    /// Sessions torn down because their queue was full or closed
    pub failed: Vec<SessionId>,
}

/// Registry of live sessions on this instance
pub struct ConnectionRegistry {
    /// Sessions by session ID
    sessions: DashMap<SessionId, Arc<SessionEntry>>,

    /// User ID to session IDs mapping
    user_sessions: DashMap<UserId, HashSet<SessionId>>,

    /// Time each user's last session went away
    last_seen: DashMap<UserId, DateTime<Utc>>,

    max_sessions_per_user: usize,
    accepting: AtomicBool,
    peak: AtomicUsize,
    presence_tx: broadcast::Sender<PresenceEvent>,
}

impl ConnectionRegistry {
    /// Create a registry allowing `max_sessions_per_user` concurrent sessions per user
    #[must_use]
    pub fn new(max_sessions_per_user: usize) -> Self {
        let (presence_tx, _) = broadcast::channel(PRESENCE_BUFFER);
        Self {
            sessions: DashMap::new(),
            user_sessions: DashMap::new(),
            last_seen: DashMap::new(),
            max_sessions_per_user,
            accepting: AtomicBool::new(true),
            peak: AtomicUsize::new(0),
            presence_tx,
        }
    }

    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(config.max_connections_per_user)
    }

    /// Receive online/offline transitions
    pub fn subscribe_presence(&self) -> broadcast::Receiver<PresenceEvent> {
        self.presence_tx.subscribe()
    }

    #[must_use]
    pub fn max_sessions_per_user(&self) -> usize {
        self.max_sessions_per_user
    }

    /// Register a new session for an authenticated user
    ///
    /// Fails with `ConnectionLimitExceeded` when the user already holds the
    /// maximum number of sessions; existing sessions are left untouched.
    pub fn register(
        &self,
        user_id: UserId,
        session_id: SessionId,
        handle: TransportHandle,
        transport: TransportKind,
    ) -> GatewayResult<SessionInfo> {
        if !self.is_accepting() {
            return Err(GatewayError::ShuttingDown);
        }

        let entry = Arc::new(SessionEntry::new(
            session_id.clone(),
            user_id.clone(),
            transport,
            handle,
        ));

        {
            // The user's entry stays locked until the presence event is out,
            // so online/offline transitions for one user are emitted in order
            let mut user_sessions = self.user_sessions.entry(user_id.clone()).or_default();
            if user_sessions.len() >= self.max_sessions_per_user {
                return Err(GatewayError::ConnectionLimitExceeded {
                    user_id,
                    limit: self.max_sessions_per_user,
                });
            }

            let first = user_sessions.is_empty();
            user_sessions.insert(session_id.clone());
            self.sessions.insert(session_id.clone(), Arc::clone(&entry));

            if first {
                let _ = self.presence_tx.send(PresenceEvent::Online {
                    user_id: user_id.clone(),
                    session_id: session_id.clone(),
                    at: Utc::now(),
                });
                tracing::info!(user_id = %user_id, "User came online");
            }
        }

        self.peak.fetch_max(self.sessions.len(), Ordering::SeqCst);

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            transport = ?transport,
            "Session registered"
        );

        Ok(entry.info())
    }

    /// Remove a session, dropping its transport handle
    ///
    /// Idempotent: returns `None` if the session is already gone.
    pub fn unregister(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.remove_entry(session_id).map(|entry| entry.info())
    }

    /// Send a close frame to a session and remove it
    pub fn close(&self, session_id: &SessionId, code: CloseCode) -> Option<SessionInfo> {
        let entry = self.remove_entry(session_id)?;
        entry.request_close(code);

        tracing::debug!(
            session_id = %session_id,
            close_code = code.as_u16(),
            "Session closed"
        );

        Some(entry.info())
    }

    fn remove_entry(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        let (_, entry) = self.sessions.remove(session_id)?;
        let user_id = entry.user_id();

        let went_offline = match self.user_sessions.get_mut(user_id) {
            Some(mut user_sessions) => {
                user_sessions.remove(session_id);
                let empty = user_sessions.is_empty();
                if empty {
                    let now = Utc::now();
                    self.last_seen.insert(user_id.clone(), now);
                    let _ = self.presence_tx.send(PresenceEvent::Offline {
                        user_id: user_id.clone(),
                        at: now,
                    });
                }
                empty
            }
            None => false,
        };

        if went_offline {
            // Only drop the entry if no session slipped in meanwhile
            self.user_sessions.remove_if(user_id, |_, sessions| sessions.is_empty());
            tracing::info!(user_id = %user_id, "User went offline");
        }

        tracing::debug!(
            session_id = %session_id,
            user_id = %user_id,
            "Session unregistered"
        );

        Some(entry)
    }

    /// Copy of a user's sessions
    #[must_use]
    pub fn sessions_for(&self, user_id: &UserId) -> Vec<SessionInfo> {
        self.entries_for(user_id).iter().map(|entry| entry.info()).collect()
    }

    /// Copy of one session
    #[must_use]
    pub fn session(&self, session_id: &SessionId) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.info())
    }

    /// Whether the user holds any session on this instance
    #[must_use]
    pub fn is_local(&self, user_id: &UserId) -> bool {
        self.user_sessions
            .get(user_id)
            .is_some_and(|sessions| !sessions.is_empty())
    }

    /// Number of live sessions
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of users with at least one session
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.user_sessions.len()
    }

    /// Highest number of simultaneous sessions seen
    #[must_use]
    pub fn peak_sessions(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// When the user last went offline on this instance
    #[must_use]
    pub fn last_seen(&self, user_id: &UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(user_id).map(|at| *at)
    }

    /// Record inbound activity, returning the session to `Alive`
    pub fn touch(&self, session_id: &SessionId) -> bool {
        match self.sessions.get(session_id) {
            Some(entry) => {
                entry.with_liveness(|liveness| liveness.record_activity(Instant::now()));
                true
            }
            None => false,
        }
    }

    /// Queue an event on every local session of the user
    ///
    /// A session whose queue is full or closed is torn down on the spot.
    pub fn deliver(&self, user_id: &UserId, event_type: &EventType, data: &Value) -> LocalDelivery {
        let mut outcome = LocalDelivery::default();

        for entry in self.entries_for(user_id) {
            if entry.enqueue_dispatch(event_type, data) {
                outcome.delivered += 1;
                tracing::trace!(
                    session_id = %entry.session_id(),
                    event_type = %event_type,
                    "Event queued"
                );
            } else {
                self.fail_session(&entry);
                outcome.failed.push(entry.session_id().clone());
            }
        }

        outcome
    }

    /// Queue a single frame on one session
    pub fn send_to_session(&self, session_id: &SessionId, message: GatewayMessage) -> GatewayResult<()> {
        let entry = self
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(&entry))
            .ok_or_else(|| GatewayError::TransportWriteFailure {
                session_id: session_id.clone(),
            })?;

        if entry.enqueue(message) {
            Ok(())
        } else {
            self.fail_session(&entry);
            Err(GatewayError::TransportWriteFailure {
                session_id: session_id.clone(),
            })
        }
    }

    fn fail_session(&self, entry: &SessionEntry) {
        tracing::warn!(
            session_id = %entry.session_id(),
            user_id = %entry.user_id(),
            "Transport write failed, tearing down session"
        );
        self.close(entry.session_id(), CloseCode::SlowConsumer);
    }

    /// Refuse all further registrations
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Frames queued across all sessions and not yet written
    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.sessions.iter().map(|entry| entry.pending()).sum()
    }

    /// Close every session with `code`, returning how many were closed
    pub fn close_all(&self, code: CloseCode) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        ids.iter()
            .filter(|session_id| self.close(session_id, code).is_some())
            .count()
    }

    /// Snapshot of all session records
    pub(crate) fn entries(&self) -> Vec<Arc<SessionEntry>> {
        self.sessions.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    fn entries_for(&self, user_id: &UserId) -> Vec<Arc<SessionEntry>> {
        // Copy the ids first so no user_sessions guard is held while reading sessions
        let ids: Vec<SessionId> = match self.user_sessions.get(user_id) {
            Some(sessions) => sessions.iter().cloned().collect(),
            None => return Vec::new(),
        };

        ids.iter()
            .filter_map(|session_id| self.sessions.get(session_id).map(|entry| Arc::clone(&entry)))
            .collect()
    }
}

impl ConnectionGauge for ConnectionRegistry {
    fn connected(&self) -> usize {
        self.session_count()
    }

    fn peak(&self) -> usize {
        self.peak_sessions()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &self.sessions.len())
            .field("users", &self.user_sessions.len())
            .field("max_sessions_per_user", &self.max_sessions_per_user)
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
