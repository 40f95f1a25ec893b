//! Pull transport: periodic or on-demand single image refresh

use super::{
    await_confirmation, confirm, Confirm, EventSink, StreamTarget, Transport, TransportEvent,
    TransportKind, Worker,
};
use crate::cancel::{CancelHandle, CancelToken};
use crate::device::Frame;
use crate::error::CamLinkError;
use crate::retry::{backoff, RetryDecision, RetryPolicy};
use crate::service::{unix_millis, SnapshotRequest, SnapshotSource};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pull transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PullTransportConfig {
    /// Fixed refresh period; derived from the target fps when absent
    #[serde(with = "crate::serde_millis::option")]
    pub refresh_interval: Option<Duration>,
    /// Bound on a single image request
    #[serde(with = "crate::serde_millis")]
    pub fetch_timeout: Duration,
    /// Bound on worker shutdown
    #[serde(with = "crate::serde_millis")]
    pub teardown_timeout: Duration,
}

impl Default for PullTransportConfig {
    fn default() -> Self {
        Self {
            refresh_interval: None,
            fetch_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(3),
        }
    }
}

impl PullTransportConfig {
    /// Refresh period for a stream at `fps`
    pub fn interval_for(&self, fps: u32) -> Duration {
        self.refresh_interval
            .unwrap_or_else(|| Duration::from_millis(1000 / u64::from(fps.max(1))))
    }
}

/// Re-requests a single still image on a timer or on demand
pub struct PullTransport {
    id: Uuid,
    source: Arc<dyn SnapshotSource>,
    config: PullTransportConfig,
    policy: RetryPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    refresh: Arc<Notify>,
    connected: Arc<AtomicBool>,
    worker: Option<Worker>,
}

impl std::fmt::Debug for PullTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullTransport")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl PullTransport {
    /// Create a pull transport reporting to `events`
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        config: PullTransportConfig,
        policy: RetryPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            config,
            policy,
            events,
            refresh: Arc::new(Notify::new()),
            connected: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }
}

#[async_trait]
impl Transport for PullTransport {
    async fn connect(&mut self, target: &StreamTarget) -> Result<(), CamLinkError> {
        if self.worker.is_some() {
            self.disconnect().await?;
        }
        info!(
            "Pull transport {} connecting to {}",
            self.id, target.camera_id
        );

        let (cancel, token) = CancelHandle::new();
        let (confirm_tx, confirm_rx) = oneshot::channel();
        let worker = PullWorker {
            source: self.source.clone(),
            target: target.clone(),
            interval: self.config.interval_for(target.params.fps),
            fetch_timeout: self.config.fetch_timeout,
            policy: self.policy.clone(),
            sink: EventSink::new(self.events.clone(), token.clone()),
            cancel: token,
            refresh: self.refresh.clone(),
            connected: self.connected.clone(),
            last_token: 0,
        };
        let handle = tokio::spawn(worker.run(confirm_tx));
        self.worker = Some(Worker::new(cancel, handle));

        await_confirmation(confirm_rx).await
    }

    async fn disconnect(&mut self) -> Result<(), CamLinkError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            debug!("Pull transport {} disconnecting", self.id);
            worker.shutdown(self.config.teardown_timeout).await;
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Pull
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn refresh(&self) {
        self.refresh.notify_one();
    }
}

struct PullWorker {
    source: Arc<dyn SnapshotSource>,
    target: StreamTarget,
    interval: Duration,
    fetch_timeout: Duration,
    policy: RetryPolicy,
    sink: EventSink,
    cancel: CancelToken,
    refresh: Arc<Notify>,
    connected: Arc<AtomicBool>,
    last_token: u64,
}

impl PullWorker {
    /// Strictly increasing cache-busting token
    fn next_token(&mut self) -> u64 {
        let token = unix_millis().max(self.last_token + 1);
        self.last_token = token;
        token
    }

    async fn fetch(&mut self, retry: Option<u32>) -> Result<Bytes, CamLinkError> {
        let request = SnapshotRequest {
            camera_id: self.target.camera_id.clone(),
            client_id: self.target.client_id.clone(),
            cache_token: self.next_token(),
            retry,
        };
        let payload = tokio::time::timeout(self.fetch_timeout, self.source.fetch_frame(&request))
            .await
            .map_err(|_| CamLinkError::Timeout {
                operation: "fetch_frame".to_string(),
                duration: self.fetch_timeout,
            })??;
        image::guess_format(&payload).map_err(|e| CamLinkError::DecodeFailed {
            reason: format!("snapshot is not an image: {}", e),
        })?;
        Ok(payload)
    }

    async fn run(mut self, confirm_tx: Confirm) {
        let cancel = self.cancel.clone();
        let mut pending = Some(confirm_tx);
        let mut failures: u32 = 0;
        let mut sequence: u64 = 0;

        loop {
            let retry = (failures > 0).then_some(failures);
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.fetch(retry) => r,
            };

            match result {
                Ok(payload) => {
                    failures = 0;
                    sequence += 1;
                    if !self.sink.emit(TransportEvent::Frame(Frame::new(payload, sequence))) {
                        break;
                    }
                    if confirm(&mut pending, Ok(())) {
                        self.connected.store(true, Ordering::SeqCst);
                        info!("Pull stream confirmed for {}", self.target.camera_id);
                    }
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = self.refresh.notified() => debug!("On-demand refresh"),
                        _ = tokio::time::sleep(self.interval) => {}
                    }
                }
                Err(e) => {
                    failures += 1;
                    match self.policy.decide(failures) {
                        RetryDecision::Retry { attempt, delay } => {
                            warn!(
                                "Snapshot fetch failed ({}), retry {} in {:?}",
                                e, attempt, delay
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
                                last_error: e.to_string(),
                            };
                            warn!("Pull stream for {} gave up: {}", self.target.camera_id, err);
                            self.connected.store(false, Ordering::SeqCst);
                            if let Some(tx) = pending.take() {
                                let _ = tx.send(Err(err));
                            } else {
                                self.sink.emit(TransportEvent::Failed(err));
                            }
                            return;
                        }
                    }
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
        debug!("Pull worker for {} exited", self.target.camera_id);
    }
}
