//! Reconciliation of local and server-reported stream status
//!
//! The service is asked periodically whether it sees our stream. While the
//! session is streaming and the service disagrees, the displayed status is
//! projected from the locally assumed parameters. After
//! `disagreement_threshold` consecutive disagreeing polls the stream is
//! declared lost and the session moves to `Error`. A failed status query
//! counts as a disagreeing poll.

use crate::config::ReconcilerConfig;
use crate::session::{SessionController, SessionSnapshot};
use camlink_core::{CameraService, ConnectionStatus, Resolution};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Connection status as it should be shown to the user
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayedStatus {
    /// Whether a stream is considered alive
    pub connected: bool,
    /// Client id the stream belongs to
    pub client_id: Option<String>,
    /// Negotiated resolution
    pub resolution: Option<Resolution>,
    /// Negotiated frame rate
    pub fps: Option<f64>,
    /// Projected from local assumptions rather than reported by the server
    pub optimistic: bool,
}

impl DisplayedStatus {
    /// Status as reported by the server, gaps filled from the session
    fn reported(status: &ConnectionStatus, snapshot: Option<&SessionSnapshot>) -> Self {
        let params = snapshot.and_then(|s| s.params.as_ref());
        let resolution = match (status.width, status.height) {
            (Some(width), Some(height)) => Some(Resolution::new(width, height)),
            _ => params.map(|p| p.resolution()),
        };
        Self {
            connected: status.is_connected,
            client_id: status
                .client_id
                .clone()
                .or_else(|| snapshot.map(|s| s.client_id.clone())),
            resolution,
            fps: status.fps.or_else(|| params.map(|p| f64::from(p.fps))),
            optimistic: false,
        }
    }

    /// Status projected from what the session believes
    fn assumed(snapshot: &SessionSnapshot) -> Self {
        Self {
            connected: true,
            client_id: Some(snapshot.client_id.clone()),
            resolution: snapshot.params.as_ref().map(|p| p.resolution()),
            fps: snapshot.params.as_ref().map(|p| f64::from(p.fps)),
            optimistic: true,
        }
    }

    /// `Connected` or `Disconnected`
    pub fn connection_text(&self) -> &'static str {
        if self.connected {
            "Connected"
        } else {
            "Disconnected"
        }
    }

    /// Client id or `--`
    pub fn client_text(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| "--".to_string())
    }

    /// e.g. `1920 x 1080`, or `--`
    pub fn resolution_text(&self) -> String {
        self.resolution
            .map(|r| r.to_string())
            .unwrap_or_else(|| "--".to_string())
    }

    /// e.g. `30.0 FPS`, or `--`
    pub fn fps_text(&self) -> String {
        self.fps
            .map(|fps| format!("{:.1} FPS", fps))
            .unwrap_or_else(|| "--".to_string())
    }
}

impl fmt::Display for DisplayedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | {} | {} | {}",
            self.connection_text(),
            self.client_text(),
            self.resolution_text(),
            self.fps_text()
        )
    }
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Session is not streaming; nothing to reconcile
    NotStreaming,
    /// Server confirms the stream
    InSync,
    /// Server disagrees; status shown optimistically
    Disagreement {
        /// Consecutive disagreeing polls
        consecutive: u32,
    },
    /// Threshold reached, session moved to `Error`
    StreamLost,
}

#[derive(Debug, Default)]
struct Tracker {
    transport_id: Option<Uuid>,
    disagreements: u32,
}

struct Inner {
    controller: SessionController,
    service: Arc<dyn CameraService>,
    config: ReconcilerConfig,
    tracker: parking_lot::Mutex<Tracker>,
    displayed: watch::Sender<DisplayedStatus>,
}

/// Periodic status poller for the active device
#[derive(Clone)]
pub struct StatusReconciler {
    inner: Arc<Inner>,
    task: Arc<parking_lot::Mutex<Option<JoinHandle<()>>>>,
}

impl fmt::Debug for StatusReconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReconciler")
            .field("config", &self.inner.config)
            .field("displayed", &*self.inner.displayed.borrow())
            .finish()
    }
}

impl StatusReconciler {
    /// Create a stopped reconciler for `controller`
    pub fn new(
        controller: SessionController,
        service: Arc<dyn CameraService>,
        config: ReconcilerConfig,
    ) -> Self {
        let (displayed, _) = watch::channel(DisplayedStatus::default());
        Self {
            inner: Arc::new(Inner {
                controller,
                service,
                config,
                tracker: parking_lot::Mutex::new(Tracker::default()),
                displayed,
            }),
            task: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    /// Status currently shown
    pub fn displayed(&self) -> DisplayedStatus {
        self.inner.displayed.borrow().clone()
    }

    /// Watch the displayed status
    pub fn subscribe(&self) -> watch::Receiver<DisplayedStatus> {
        self.inner.displayed.subscribe()
    }

    /// Consecutive disagreeing polls for the current stream
    pub fn disagreements(&self) -> u32 {
        self.inner.tracker.lock().disagreements
    }

    /// Query the service once and act on the answer
    pub async fn poll_once(&self) -> ReconcileOutcome {
        self.inner.poll_once().await
    }

    /// Poll every `poll_interval` until stopped. No-op if already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        let period = self.inner.config.poll_interval;
        *task = Some(tokio::spawn(run(inner, period)));
    }

    /// Stop polling
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }

    /// Whether the poller is running
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().map_or(false, |t| !t.is_finished())
    }
}

async fn run(inner: Weak<Inner>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let outcome = inner.poll_once().await;
        debug!("Status poll: {:?}", outcome);
    }
}

impl Inner {
    async fn poll_once(&self) -> ReconcileOutcome {
        let snapshot = self.controller.snapshot();
        let Some(device_id) = snapshot.device_id.clone() else {
            self.reset_tracker(None);
            self.displayed.send_replace(DisplayedStatus::default());
            return ReconcileOutcome::NotStreaming;
        };

        let result = self.service.connection_status(&device_id).await;

        let transport_id = match snapshot.transport_id {
            Some(id) if snapshot.state.is_streaming() => id,
            _ => {
                self.reset_tracker(None);
                let shown = match &result {
                    Ok(status) => DisplayedStatus::reported(status, None),
                    Err(e) => {
                        debug!("Status query failed while not streaming: {}", e);
                        DisplayedStatus::default()
                    }
                };
                self.displayed.send_replace(shown);
                return ReconcileOutcome::NotStreaming;
            }
        };

        if let Ok(status) = &result {
            if status.is_connected {
                self.reset_tracker(Some(transport_id));
                self.displayed
                    .send_replace(DisplayedStatus::reported(status, Some(&snapshot)));
                return ReconcileOutcome::InSync;
            }
        }

        let consecutive = {
            let mut tracker = self.tracker.lock();
            if tracker.transport_id != Some(transport_id) {
                tracker.transport_id = Some(transport_id);
                tracker.disagreements = 0;
            }
            tracker.disagreements += 1;
            tracker.disagreements
        };
        let reason = match &result {
            Ok(_) => "server reports no active stream".to_string(),
            Err(e) => format!("status query failed: {}", e),
        };
        warn!(
            camera_id = %device_id,
            consecutive,
            threshold = self.config.disagreement_threshold,
            "Status disagreement: {}",
            reason
        );

        if consecutive < self.config.disagreement_threshold {
            self.displayed
                .send_replace(DisplayedStatus::assumed(&snapshot));
            return ReconcileOutcome::Disagreement { consecutive };
        }

        self.reset_tracker(None);
        let reason = format!("{} for {} consecutive polls", reason, consecutive);
        let escalated = self
            .controller
            .report_stream_lost(transport_id, &reason)
            .await;
        self.displayed.send_replace(DisplayedStatus::default());
        if escalated {
            ReconcileOutcome::StreamLost
        } else {
            ReconcileOutcome::NotStreaming
        }
    }

    fn reset_tracker(&self, transport_id: Option<Uuid>) {
        let mut tracker = self.tracker.lock();
        tracker.transport_id = transport_id;
        tracker.disagreements = 0;
    }
}
