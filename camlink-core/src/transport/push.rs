//! Push transport: one WebSocket carrying binary frames and JSON status text

use super::{
    await_confirmation, confirm, Confirm, EventSink, StreamTarget, Transport, TransportEvent,
    TransportKind, Worker,
};
use crate::cancel::{CancelHandle, CancelToken};
use crate::device::Frame;
use crate::error::CamLinkError;
use crate::protocol::{ControlMessage, PushMessage};
use crate::retry::{backoff, RetryDecision, RetryPolicy};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use tungstenite::Message;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Push transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushTransportConfig {
    /// WebSocket endpoint, e.g. `ws://camera.local:8080/ws/camera`
    pub url: String,
    /// Window in which a connection must produce its first frame
    #[serde(with = "crate::serde_millis")]
    pub confirm_timeout: Duration,
    /// Bound on the close handshake and worker shutdown
    #[serde(with = "crate::serde_millis")]
    pub teardown_timeout: Duration,
}

impl Default for PushTransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws/camera".to_string(),
            confirm_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(3),
        }
    }
}

impl PushTransportConfig {
    /// Configuration for `url` with default timeouts
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Holds one long-lived WebSocket on which the server pushes frames
pub struct PushTransport {
    id: Uuid,
    config: PushTransportConfig,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: Arc<AtomicBool>,
    requests: Option<mpsc::UnboundedSender<ControlMessage>>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for PushTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushTransport")
            .field("id", &self.id)
            .field("url", &self.config.url)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl PushTransport {
    /// Create a push transport reporting to `events`
    pub fn new(
        config: PushTransportConfig,
        policy: RetryPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            policy,
            events,
            connected: Arc::new(AtomicBool::new(false)),
            requests: None,
            worker: None,
        }
    }
}

#[async_trait]
impl Transport for PushTransport {
    async fn connect(&mut self, target: &StreamTarget) -> Result<(), CamLinkError> {
        if self.worker.is_some() {
            self.disconnect().await?;
        }
        info!(
            "Push transport {} connecting to {} for {}",
            self.id, self.config.url, target.camera_id
        );

        let (cancel, token) = CancelHandle::new();
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        self.requests = Some(requests_tx);
        let worker = PushWorker {
            config: self.config.clone(),
            policy: self.policy.clone(),
            camera_id: target.camera_id.clone(),
            sink: EventSink::new(self.events.clone(), token.clone()),
            cancel: token,
            connected: self.connected.clone(),
            requests: requests_rx,
            sequence: 0,
        };
        let handle = tokio::spawn(worker.run(confirm_tx));
        self.worker = Some(Worker::new(cancel, handle));

        await_confirmation(confirm_rx).await
    }

    async fn disconnect(&mut self) -> Result<(), CamLinkError> {
        self.connected.store(false, Ordering::SeqCst);
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            debug!("Push transport {} disconnecting", self.id);
            // The worker runs the close handshake itself; allow it that long plus slack.
            worker
                .shutdown(self.config.teardown_timeout + Duration::from_millis(500))
                .await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Frames arrive unasked; ask the server for a status report instead
    fn refresh(&self) {
        if let Some(requests) = &self.requests {
            let _ = requests.send(ControlMessage::GetStatus);
        }
    }
}

/// How one WebSocket connection ended
enum SessionEnd {
    /// Controller asked to stop
    Cancelled,
    /// Connection failed or dropped
    Failed(CamLinkError),
}

struct PushWorker {
    config: PushTransportConfig,
    policy: RetryPolicy,
    camera_id: String,
    sink: EventSink,
    cancel: CancelToken,
    connected: Arc<AtomicBool>,
    requests: mpsc::UnboundedReceiver<ControlMessage>,
    sequence: u64,
}

impl PushWorker {
    async fn run(mut self, confirm_tx: Confirm) {
        let mut pending = Some(confirm_tx);
        let mut failures: u32 = 0;

        loop {
            let error = match self.session(&mut pending, &mut failures).await {
                SessionEnd::Cancelled => break,
                SessionEnd::Failed(e) => e,
            };
            self.connected.store(false, Ordering::SeqCst);

            failures += 1;
            match self.policy.decide(failures) {
                RetryDecision::Retry { attempt, delay } => {
                    warn!(
                        "Push connection for {} failed ({}), retry {} in {:?}",
                        self.camera_id, error, attempt, delay
                    );
                    self.sink
                        .emit(TransportEvent::Reconnecting { attempt, delay });
                    if !backoff(delay, &self.cancel).await {
                        break;
                    }
                }
                RetryDecision::GiveUp { attempts } => {
                    let err = CamLinkError::RetryExhausted {
                        attempts,
                        last_error: error.to_string(),
                    };
                    warn!("Push stream for {} gave up: {}", self.camera_id, err);
                    if let Some(tx) = pending.take() {
                        let _ = tx.send(Err(err));
                    } else {
                        self.sink.emit(TransportEvent::Failed(err));
                    }
                    return;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        confirm(
            &mut pending,
            Err(CamLinkError::Cancelled {
                operation: "connect".to_string(),
            }),
        );
        debug!("Push worker for {} exited", self.camera_id);
    }

    /// Run one connection until it is cancelled or fails
    async fn session(&mut self, pending: &mut Option<Confirm>, failures: &mut u32) -> SessionEnd {
        let deadline = Instant::now() + self.config.confirm_timeout;
        let cancel = self.cancel.clone();

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            r = tokio::time::timeout_at(deadline, connect_async(self.config.url.as_str())) => r,
        };
        let mut ws = match opened {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                return SessionEnd::Failed(CamLinkError::request_failed(
                    "push_connect",
                    format!("WebSocket connection failed: {}", e),
                ))
            }
            Err(_) => return SessionEnd::Failed(self.confirm_timeout_error()),
        };
        debug!("WebSocket open to {}", self.config.url);

        let start = ControlMessage::StartCamera {
            camera_id: self.camera_id.clone(),
        };
        if let Err(e) = send_control(&mut ws, &start).await {
            return SessionEnd::Failed(e);
        }

        let mut first_frame_seen = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.close_gracefully(ws).await;
                    return SessionEnd::Cancelled;
                }
                Some(request) = self.requests.recv() => {
                    if let Err(e) = send_control(&mut ws, &request).await {
                        return SessionEnd::Failed(e);
                    }
                    continue;
                }
                r = read_until(&mut ws, (!first_frame_seen).then_some(deadline)) => r,
            };

            let message = match next {
                Ok(Some(message)) => message,
                Ok(None) => {
                    return SessionEnd::Failed(CamLinkError::StreamLost {
                        reason: "push channel closed by server".to_string(),
                    })
                }
                Err(ReadError::Deadline) => {
                    return SessionEnd::Failed(self.confirm_timeout_error())
                }
                Err(ReadError::Stream(e)) => return SessionEnd::Failed(e),
            };

            let incoming = match message {
                Message::Binary(payload) => PushMessage::from_binary(payload),
                Message::Text(text) => PushMessage::from_text(&text),
                Message::Close(frame) => {
                    debug!("Server closed push channel: {:?}", frame);
                    return SessionEnd::Failed(CamLinkError::StreamLost {
                        reason: "push channel closed by server".to_string(),
                    });
                }
                // Ping/Pong are answered by tungstenite itself
                _ => continue,
            };

            match incoming {
                PushMessage::Frame(payload) => {
                    self.sequence += 1;
                    if !self
                        .sink
                        .emit(TransportEvent::Frame(Frame::new(payload, self.sequence)))
                    {
                        self.close_gracefully(ws).await;
                        return SessionEnd::Cancelled;
                    }
                    if !first_frame_seen {
                        first_frame_seen = true;
                        *failures = 0;
                        self.connected.store(true, Ordering::SeqCst);
                        if confirm(pending, Ok(())) {
                            info!("Push stream confirmed for {}", self.camera_id);
                        } else {
                            info!("Push stream for {} recovered", self.camera_id);
                        }
                    }
                }
                PushMessage::Control(msg) => {
                    debug!("Push status message: {}", msg.message_type());
                    self.sink.emit(TransportEvent::Status(msg));
                }
                PushMessage::Unrecognized(_) => {}
            }
        }
    }

    fn confirm_timeout_error(&self) -> CamLinkError {
        CamLinkError::Timeout {
            operation: "push_first_frame".to_string(),
            duration: self.config.confirm_timeout,
        }
    }

    /// Send `stop_camera` and a close frame, then wait for the close acknowledgment
    async fn close_gracefully(&self, mut ws: WsStream) {
        let teardown = self.config.teardown_timeout;
        let handshake = async {
            let _ = send_control(&mut ws, &ControlMessage::StopCamera).await;
            if let Err(e) = ws.close(None).await {
                debug!("Close frame not sent: {}", e);
                return;
            }
            while let Some(Ok(msg)) = ws.next().await {
                if msg.is_close() {
                    break;
                }
            }
        };
        if tokio::time::timeout(teardown, handshake).await.is_err() {
            warn!("Push channel close not acknowledged within {:?}", teardown);
        } else {
            debug!("Push channel closed for {}", self.camera_id);
        }
    }
}

async fn send_control(ws: &mut WsStream, message: &ControlMessage) -> Result<(), CamLinkError> {
    let json = serde_json::to_string(message).map_err(|e| CamLinkError::InvalidMessage {
        message: format!("{:?}", message),
        source: e.into(),
    })?;
    ws.send(Message::Text(json))
        .await
        .map_err(|e| CamLinkError::request_failed("push_control", e))
}

enum ReadError {
    Deadline,
    Stream(CamLinkError),
}

/// Next message, bounded by `deadline` while a first frame is still awaited
async fn read_until(
    ws: &mut WsStream,
    deadline: Option<Instant>,
) -> Result<Option<Message>, ReadError> {
    let next = match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, ws.next())
            .await
            .map_err(|_| ReadError::Deadline)?,
        None => ws.next().await,
    };
    match next {
        Some(Ok(message)) => Ok(Some(message)),
        Some(Err(e)) => Err(ReadError::Stream(CamLinkError::StreamLost {
            reason: format!("push channel error: {}", e),
        })),
        None => Ok(None),
    }
}
