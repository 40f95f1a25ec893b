//! Frame transports
//!
//! A transport delivers the frames of one stream. Two variants exist:
//! [`PullTransport`] re-requests single stills, [`PushTransport`] holds a
//! WebSocket on which the server pushes binary frames and JSON status text.
//! Both run their delivery loop on a background task and report through a
//! channel of [`TransportEvent`]s owned by whoever created the transport.

use crate::cancel::{CancelHandle, CancelToken};
use crate::device::{Frame, StreamParameters};
use crate::error::CamLinkError;
use crate::protocol::ServerMessage;
use crate::retry::RetryPolicy;
use crate::service::SnapshotSource;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod pull;
pub mod push;

pub use pull::{PullTransport, PullTransportConfig};
pub use push::{PushTransport, PushTransportConfig};

/// Delivery mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Repeatedly fetched single image
    Pull,
    /// Persistent WebSocket with pushed frames
    Push,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Pull => f.write_str("pull"),
            TransportKind::Push => f.write_str("push"),
        }
    }
}

/// What a transport is asked to stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTarget {
    /// Device id
    pub camera_id: String,
    /// Client id of the session
    pub client_id: String,
    /// Negotiated parameters
    pub params: StreamParameters,
}

/// Events emitted by a transport
#[derive(Debug)]
pub enum TransportEvent {
    /// A frame arrived
    Frame(Frame),
    /// The server sent a status or control message
    Status(ServerMessage),
    /// A failed attempt is being retried
    Reconnecting {
        /// Retry number
        attempt: u32,
        /// Backoff before the retry
        delay: Duration,
    },
    /// The stream failed for good after it had been confirmed
    Failed(CamLinkError),
}

impl TransportEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            TransportEvent::Frame(_) => "frame",
            TransportEvent::Status(_) => "status",
            TransportEvent::Reconnecting { .. } => "reconnecting",
            TransportEvent::Failed(_) => "failed",
        }
    }
}

/// Sender side of a transport's event channel, silenced on cancellation
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancelToken,
}

impl EventSink {
    /// Wrap a sender so nothing is emitted once `cancel` fires
    pub fn new(tx: mpsc::UnboundedSender<TransportEvent>, cancel: CancelToken) -> Self {
        Self { tx, cancel }
    }

    /// Emit an event. Returns `false` if it was dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        if self.cancel.is_cancelled() {
            debug!("Dropping {} event after cancellation", event.event_type());
            return false;
        }
        self.tx.send(event).is_ok()
    }

    /// Whether the receiving side is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Trait for transport implementations
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start streaming `target`.
    ///
    /// Resolves once the first frame has been observed. Connection failures
    /// are retried according to the transport's [`RetryPolicy`]; exhaustion
    /// yields [`CamLinkError::RetryExhausted`]. Dropping the returned future
    /// leaves the background worker running until [`disconnect`](Self::disconnect).
    async fn connect(&mut self, target: &StreamTarget) -> Result<(), CamLinkError>;

    /// Stop streaming.
    ///
    /// Resolves once the worker acknowledged teardown or the teardown
    /// timeout expired and the worker was aborted. No event is emitted after
    /// this returns. Idempotent.
    async fn disconnect(&mut self) -> Result<(), CamLinkError>;

    /// Delivery mechanism of this transport
    fn kind(&self) -> TransportKind;

    /// Unique id of this transport instance
    fn id(&self) -> Uuid;

    /// Check if a confirmed stream is running
    fn is_connected(&self) -> bool;

    /// Ask for a frame now instead of at the next period.
    ///
    /// Transports whose frames are pushed by the server ask for a status
    /// report instead.
    fn refresh(&self) {}
}

/// Creates transports for the session controller
pub trait TransportFactory: Send + Sync {
    /// Build a transport that reports to `events`
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn Transport>;
}

/// Factory for the built-in pull and push transports
pub struct DefaultTransportFactory {
    kind: TransportKind,
    snapshots: Arc<dyn SnapshotSource>,
    pull: PullTransportConfig,
    push: PushTransportConfig,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DefaultTransportFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultTransportFactory")
            .field("kind", &self.kind)
            .field("pull", &self.pull)
            .field("push", &self.push)
            .field("policy", &self.policy)
            .finish()
    }
}

impl DefaultTransportFactory {
    /// Create a factory
    pub fn new(
        kind: TransportKind,
        snapshots: Arc<dyn SnapshotSource>,
        pull: PullTransportConfig,
        push: PushTransportConfig,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            kind,
            snapshots,
            pull,
            push,
            policy,
        }
    }

    /// Kind of transport this factory builds
    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn Transport> {
        match self.kind {
            TransportKind::Pull => Box::new(PullTransport::new(
                self.snapshots.clone(),
                self.pull.clone(),
                self.policy.clone(),
                events,
            )),
            TransportKind::Push => Box::new(PushTransport::new(
                self.push.clone(),
                self.policy.clone(),
                events,
            )),
        }
    }
}

/// Confirmation channel between `connect` and the worker
pub(crate) type Confirm = oneshot::Sender<Result<(), CamLinkError>>;

/// Resolve a pending `connect` if it is still waiting
pub(crate) fn confirm(slot: &mut Option<Confirm>, result: Result<(), CamLinkError>) -> bool {
    match slot.take() {
        Some(tx) => {
            let _ = tx.send(result);
            true
        }
        None => false,
    }
}

/// Background worker of a transport
#[derive(Debug)]
pub(crate) struct Worker {
    cancel: CancelHandle,
    handle: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn new(cancel: CancelHandle, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }

    /// Cancel the worker and wait for it, aborting after `teardown`
    pub(crate) async fn shutdown(self, teardown: Duration) {
        let Worker { cancel, mut handle } = self;
        cancel.cancel();
        match tokio::time::timeout(teardown, &mut handle).await {
            Ok(_) => debug!("Transport worker stopped"),
            Err(_) => {
                warn!(
                    "Transport worker did not stop within {:?}, aborting",
                    teardown
                );
                handle.abort();
                let _ = handle.await;
            }
        }
    }
}

/// Wait for the worker's confirmation
pub(crate) async fn await_confirmation(
    rx: oneshot::Receiver<Result<(), CamLinkError>>,
) -> Result<(), CamLinkError> {
    rx.await.unwrap_or_else(|_| {
        Err(CamLinkError::Cancelled {
            operation: "connect".to_string(),
        })
    })
}
