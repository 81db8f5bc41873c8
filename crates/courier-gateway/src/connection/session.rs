//! Session state
//!
//! A session is one live connection. Its outbound queue is the only way to
//! reach the socket; the queue's single consumer is the socket writer task.

use crate::heartbeat::{HeartbeatState, Liveness};
use crate::protocol::{CloseCode, GatewayMessage};
use chrono::{DateTime, Utc};
use courier_common::{EventType, SessionId, UserId};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Negotiated transport of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    WebSocket,
    /// Sessions attached by an embedder over a non-socket transport
    Channel,
}

/// Frame handed to a session's writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Message(GatewayMessage),
    /// Close the socket with this code; nothing is written after it
    Close(CloseCode),
}

/// Sending half of a session's outbound path
///
/// Owned by the connection registry once the session is registered. Messages
/// go through a bounded queue; a close request travels on its own channel so
/// it still gets through when the queue is full.
#[derive(Debug)]
pub struct TransportHandle {
    tx: mpsc::Sender<GatewayMessage>,
    close: watch::Sender<Option<CloseCode>>,
}

impl TransportHandle {
    /// Create an outbound path whose queue holds `capacity` messages
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, OutboundReceiver) {
        let (tx, frames) = mpsc::channel(capacity.max(1));
        let (close, close_rx) = watch::channel(None);
        (
            Self { tx, close },
            OutboundReceiver {
                frames,
                close: close_rx,
                finished: false,
            },
        )
    }

    fn try_send(&self, message: GatewayMessage) -> bool {
        if self.close.borrow().is_some() {
            return false;
        }
        self.tx.try_send(message).is_ok()
    }

    /// First close code wins; later requests are ignored
    fn request_close(&self, code: CloseCode) {
        self.close.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(code);
            true
        });
    }

    /// Messages queued but not yet taken by the writer
    fn pending(&self) -> usize {
        if self.tx.is_closed() {
            return 0;
        }
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Receiving half of a session's outbound path, held by the writer task
#[derive(Debug)]
pub struct OutboundReceiver {
    frames: mpsc::Receiver<GatewayMessage>,
    close: watch::Receiver<Option<CloseCode>>,
    finished: bool,
}

impl OutboundReceiver {
    /// Next frame to write
    ///
    /// A close request overtakes anything still queued and is the last frame
    /// returned. `None` once the close was handed out, or once the registry
    /// dropped the session and the queue is drained.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(frame) = self.take_close() {
                return Some(frame);
            }

            tokio::select! {
                biased;
                // Disabled once the handle is gone; the queue then drains to None
                Ok(()) = self.close.changed() => {}
                message = self.frames.recv() => return message.map(OutboundFrame::Message),
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        if self.finished {
            return None;
        }
        self.take_close()
            .or_else(|| self.frames.try_recv().ok().map(OutboundFrame::Message))
    }

    fn take_close(&mut self) -> Option<OutboundFrame> {
        let code = (*self.close.borrow_and_update())?;
        self.finished = true;
        Some(OutboundFrame::Close(code))
    }
}

/// Read-only copy of a session's state
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub transport: TransportKind,
    pub connected_at: DateTime<Utc>,
    pub last_activity: Instant,
    pub heartbeat: HeartbeatState,
}

struct LiveState {
    liveness: Liveness,
    sequence: u64,
}

/// Registry-owned session record
pub(crate) struct SessionEntry {
    session_id: SessionId,
    user_id: UserId,
    transport: TransportKind,
    connected_at: DateTime<Utc>,
    handle: TransportHandle,
    state: Mutex<LiveState>,
}

impl SessionEntry {
    pub(crate) fn new(
        session_id: SessionId,
        user_id: UserId,
        transport: TransportKind,
        handle: TransportHandle,
    ) -> Self {
        Self {
            session_id,
            user_id,
            transport,
            connected_at: Utc::now(),
            handle,
            state: Mutex::new(LiveState {
                liveness: Liveness::new(Instant::now()),
                sequence: 0,
            }),
        }
    }

    pub(crate) fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub(crate) fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub(crate) fn info(&self) -> SessionInfo {
        let state = self.state.lock();
        SessionInfo {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            transport: self.transport,
            connected_at: self.connected_at,
            last_activity: state.liveness.last_activity(),
            heartbeat: state.liveness.state(),
        }
    }

    /// Queue a Dispatch frame with the next sequence number
    ///
    /// Sequence assignment and enqueue happen under one lock so frames leave
    /// in sequence order.
    pub(crate) fn enqueue_dispatch(&self, event_type: &EventType, data: &Value) -> bool {
        let mut state = self.state.lock();
        let next = state.sequence + 1;
        let frame = GatewayMessage::dispatch(event_type, next, data.clone());
        if self.handle.try_send(frame) {
            state.sequence = next;
            true
        } else {
            false
        }
    }

    /// Queue a non-sequenced frame
    pub(crate) fn enqueue(&self, message: GatewayMessage) -> bool {
        let _state = self.state.lock();
        self.handle.try_send(message)
    }

    /// Ask the writer to close the socket, ahead of anything still queued
    pub(crate) fn request_close(&self, code: CloseCode) {
        let _state = self.state.lock();
        self.handle.request_close(code);
    }

    pub(crate) fn pending(&self) -> usize {
        self.handle.pending()
    }

    pub(crate) fn with_liveness<R>(&self, f: impl FnOnce(&mut Liveness) -> R) -> R {
        f(&mut self.state.lock().liveness)
    }
}

impl std::fmt::Debug for SessionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEntry")
            .field("session_id", &self.session_id)
            .field("user_id", &self.user_id)
            .field("transport", &self.transport)
            .field("pending", &self.pending())
            .finish()
    }
}
