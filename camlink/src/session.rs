//! The camera session controller
//!
//! [`SessionController`] owns the single [`Session`] and drives it along the
//! [`SessionState`] graph. Lifecycle calls are serialized on one async lock,
//! so at most one transport is ever alive. A pending preview start can be
//! cancelled from outside that lock; once cancelled it produces no further
//! transitions or callbacks.
//!
//! Frames flow transport -> pump task -> [`FramePipeline`] -> sink. The pump
//! holds only a weak reference back to the controller and escalates fatal
//! stream failures by taking the lifecycle lock like any other caller.

use crate::event::PresentationSink;
use crate::state::SessionState;
use camlink_core::{
    generate_client_id, CamLinkError, CameraDevice, CameraService, CancelHandle, CancelToken,
    CaptureResult, ErrorKind, RecordingArtifact, RecordingOptions, StreamParameters,
    StreamTarget, Transport, TransportEvent, TransportFactory,
};
use camlink_media::{
    FrameOutcome, FramePipeline, FrameSink, PipelineConfig, PipelineMetrics, RasterFrame,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Read-only view of the session, published on every change
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Lifecycle state
    pub state: SessionState,
    /// Selected device
    pub device_id: Option<String>,
    /// Parameters of the last successful open
    pub params: Option<StreamParameters>,
    /// Client id presented to the service
    pub client_id: String,
    /// Live transport, if any
    pub transport_id: Option<Uuid>,
    /// When the current recording started
    pub recording_since: Option<DateTime<Utc>>,
    /// Retry number of an ongoing reconnect, 0 when frames are flowing
    pub reconnect_attempt: u32,
}

/// The single mutable aggregate. Only touched under the lifecycle lock.
struct Session {
    device: Option<CameraDevice>,
    params: Option<StreamParameters>,
    device_open: bool,
    /// Server-side recording in progress. Outlives an escalation to
    /// `Error` so that `reset` still stops it.
    recording: bool,
    transport: Option<Box<dyn Transport>>,
    pump: Option<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct Shared {
    service: Arc<dyn CameraService>,
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn PresentationSink>,
    pipeline: PipelineConfig,
    session: Mutex<Session>,
    snapshot: watch::Sender<SessionSnapshot>,
    pending: parking_lot::Mutex<Option<CancelHandle>>,
}

/// Session state machine for one camera.
///
/// Cheap to clone; clones drive the same session.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("snapshot", &*self.shared.snapshot.borrow())
            .finish()
    }
}

impl SessionController {
    /// Create a controller in `Idle`
    pub fn new(
        service: Arc<dyn CameraService>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn PresentationSink>,
        pipeline: PipelineConfig,
    ) -> Self {
        let (snapshot, _) = watch::channel(SessionSnapshot {
            state: SessionState::Idle,
            device_id: None,
            params: None,
            client_id: generate_client_id(),
            transport_id: None,
            recording_since: None,
            reconnect_attempt: 0,
        });
        Self {
            shared: Arc::new(Shared {
                service,
                factory,
                sink,
                pipeline,
                session: Mutex::new(Session {
                    device: None,
                    params: None,
                    device_open: false,
                    recording: false,
                    transport: None,
                    pump: None,
                }),
                snapshot,
                pending: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.shared.snapshot.borrow().state.clone()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    /// Watch the session without taking the lifecycle lock
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Client id presented to the service
    pub fn client_id(&self) -> String {
        self.shared.snapshot.borrow().client_id.clone()
    }

    /// How long the current recording has been running
    pub fn recording_elapsed(&self) -> Option<Duration> {
        let since = self.shared.snapshot.borrow().recording_since?;
        (Utc::now() - since).to_std().ok()
    }

    /// Choose the device to work with. Legal only in `Idle`.
    pub async fn select_device(&self, device: CameraDevice) -> Result<(), CamLinkError> {
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        if state != SessionState::Idle {
            return Err(reject("select_device", &state));
        }
        info!("📷 Selected device {} ({})", device.id, device.name);
        let id = device.id.clone();
        session.device = Some(device);
        self.shared.snapshot.send_modify(|s| s.device_id = Some(id));
        Ok(())
    }

    /// Open the selected device with `params`. Legal in `Idle` and `Open`.
    ///
    /// On failure the previous state is restored; nothing is retried.
    pub async fn open(&self, params: StreamParameters) -> Result<(), CamLinkError> {
        let mut session = self.shared.session.lock().await;
        let prior = self.state();
        if !matches!(prior, SessionState::Idle | SessionState::Open) {
            return Err(reject("open", &prior));
        }
        let device_id = match &session.device {
            Some(device) => device.id.clone(),
            None => {
                return Err(CamLinkError::InvalidTransition {
                    operation: "open".to_string(),
                    state: format!("{} without a selected device", prior.name()),
                })
            }
        };

        self.transition(SessionState::Opening);
        match self.shared.service.open_device(&device_id, &params).await {
            Ok(()) => {
                info!(
                    camera_id = %device_id,
                    "Opened {} {}x{} @ {} fps",
                    params.format, params.width, params.height, params.fps
                );
                session.params = Some(params.clone());
                session.device_open = true;
                self.shared.snapshot.send_modify(|s| s.params = Some(params));
                self.transition(SessionState::Open);
                Ok(())
            }
            Err(e) => {
                warn!(camera_id = %device_id, "Open failed: {}", e);
                self.transition(prior);
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Start the preview stream. Legal only in `Open`.
    ///
    /// Resolves once the first frame arrived and the session is
    /// `Previewing`. Any failure tears down back to `Open` and is reported;
    /// only the transport retries. A concurrent [`stop_preview`](Self::stop_preview)
    /// or [`reset`](Self::reset) cancels the attempt and this returns
    /// [`CamLinkError::Cancelled`].
    pub async fn start_preview(&self) -> Result<(), CamLinkError> {
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        if state != SessionState::Open {
            return Err(reject("start_preview", &state));
        }
        let (device_id, params) = match (&session.device, &session.params) {
            (Some(device), Some(params)) => (device.id.clone(), params.clone()),
            _ => return Err(reject("start_preview", &state)),
        };

        let (handle, token) = CancelHandle::new();
        *self.shared.pending.lock() = Some(handle);
        self.transition(SessionState::StartingPreview);

        let result = self
            .start_stream(&mut session, &device_id, &params, &token)
            .await;
        let cancelled = token.is_cancelled();
        drop(self.shared.pending.lock().take());

        match result {
            Ok(()) => Ok(()),
            Err(e) if cancelled => {
                info!(camera_id = %device_id, "Preview start cancelled");
                Err(e)
            }
            Err(e) => {
                warn!(camera_id = %device_id, "Preview start failed: {}", e);
                if let Err(stop) = self.shared.service.stop_preview().await {
                    debug!("stop_preview after failed start: {}", stop);
                }
                self.transition(SessionState::Open);
                self.report(&e);
                Err(e)
            }
        }
    }

    async fn start_stream(
        &self,
        session: &mut Session,
        device_id: &str,
        params: &StreamParameters,
        token: &CancelToken,
    ) -> Result<(), CamLinkError> {
        if !session.device_open {
            cancellable(
                token,
                "open_device",
                self.shared.service.open_device(device_id, params),
            )
            .await?;
            session.device_open = true;
        }
        cancellable(token, "start_preview", self.shared.service.start_preview()).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut transport = self.shared.factory.create(tx);
        let target = StreamTarget {
            camera_id: device_id.to_string(),
            client_id: self.client_id(),
            params: params.clone(),
        };
        info!(
            camera_id = %device_id,
            transport_id = %transport.id(),
            "🔌 Connecting {} transport",
            transport.kind()
        );

        let connected = cancellable(token, "connect", transport.connect(&target))
            .await
            .and_then(|()| {
                if token.is_cancelled() {
                    Err(CamLinkError::Cancelled {
                        operation: "connect".to_string(),
                    })
                } else {
                    Ok(())
                }
            });
        if let Err(e) = connected {
            if let Err(disconnect) = transport.disconnect().await {
                warn!("Disconnect after failed connect: {}", disconnect);
            }
            return Err(e);
        }

        let transport_id = transport.id();
        session.transport = Some(transport);
        self.shared.snapshot.send_modify(|s| {
            s.transport_id = Some(transport_id);
            s.reconnect_attempt = 0;
        });
        self.transition(SessionState::Previewing);
        session.pump = Some(self.spawn_pump(transport_id, rx));
        Ok(())
    }

    /// Capture a still. Legal in `Previewing` and `Recording`; state is unchanged.
    pub async fn capture(&self) -> Result<CaptureResult, CamLinkError> {
        let _session = self.shared.session.lock().await;
        let state = self.state();
        if !state.is_streaming() {
            return Err(reject("capture", &state));
        }
        match self.shared.service.capture().await {
            Ok(result) => {
                info!("📸 Captured {}", result.artifact);
                Ok(result)
            }
            Err(e) => {
                warn!("Capture failed: {}", e);
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Start recording. Legal only in `Previewing`.
    pub async fn start_recording(&self, options: &RecordingOptions) -> Result<(), CamLinkError> {
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        if state != SessionState::Previewing {
            return Err(reject("start_recording", &state));
        }
        match self.shared.service.start_recording(options).await {
            Ok(()) => {
                info!(
                    "⏺ Recording {} via {} at {} bps",
                    options.format, options.encoder, options.bitrate
                );
                session.recording = true;
                self.shared
                    .snapshot
                    .send_modify(|s| s.recording_since = Some(Utc::now()));
                self.transition(SessionState::Recording);
                Ok(())
            }
            Err(e) => {
                warn!("Start recording failed: {}", e);
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Stop recording. Legal only in `Recording`.
    pub async fn stop_recording(&self) -> Result<RecordingArtifact, CamLinkError> {
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        if state != SessionState::Recording {
            return Err(reject("stop_recording", &state));
        }
        match self.shared.service.stop_recording().await {
            Ok(artifact) => {
                info!("Recording saved to {}", artifact.path);
                session.recording = false;
                self.shared.snapshot.send_modify(|s| s.recording_since = None);
                self.transition(SessionState::Previewing);
                Ok(artifact)
            }
            Err(e) => {
                warn!("Stop recording failed: {}", e);
                self.report(&e);
                Err(e)
            }
        }
    }

    /// Stop the preview and release the device on the service.
    ///
    /// Legal in `StartingPreview`, `Previewing` and `Recording`; a no-op in
    /// `Idle` and `Open`. Recording is stopped first, the transport is torn
    /// down, then preview-stop and device-close are requested. Service
    /// failures along the way are reported but do not keep the session
    /// from reaching `Open`.
    pub async fn stop_preview(&self) -> Result<(), CamLinkError> {
        if self.state() == SessionState::StartingPreview {
            self.cancel_pending();
        }
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        match &state {
            SessionState::Idle | SessionState::Open => return Ok(()),
            SessionState::StartingPreview | SessionState::Previewing | SessionState::Recording => {}
            other => return Err(reject("stop_preview", other)),
        }

        self.transition(SessionState::StoppingPreview);
        if state == SessionState::Recording {
            if let Err(e) = self.shared.service.stop_recording().await {
                warn!("Stop recording during stop_preview failed: {}", e);
                self.report(&e);
            }
            session.recording = false;
            self.shared.snapshot.send_modify(|s| s.recording_since = None);
        }
        self.teardown_transport(&mut session).await;
        if let Err(e) = self.shared.service.stop_preview().await {
            warn!("Stop preview request failed: {}", e);
            self.report(&e);
        }
        if let Err(e) = self.shared.service.close_device().await {
            warn!("Close device request failed: {}", e);
            self.report(&e);
        }
        session.device_open = false;
        self.transition(SessionState::Open);
        Ok(())
    }

    /// Return to `Idle` from any state, tearing everything down.
    ///
    /// Service cleanup is best effort and only logged. The device selection
    /// is cleared.
    pub async fn reset(&self) -> Result<(), CamLinkError> {
        self.cancel_pending();
        let mut session = self.shared.session.lock().await;
        let state = self.state();
        if state == SessionState::Idle && session.device.is_none() {
            return Ok(());
        }

        self.teardown_transport(&mut session).await;
        let service = &self.shared.service;
        if session.recording {
            if let Err(e) = service.stop_recording().await {
                warn!("Reset: stop recording failed: {}", e);
            }
        }
        let streaming = matches!(
            state,
            SessionState::StartingPreview | SessionState::Previewing | SessionState::Recording
        );
        if streaming || (state.is_error() && session.device_open) {
            if let Err(e) = service.stop_preview().await {
                warn!("Reset: stop preview failed: {}", e);
            }
        }
        if session.device_open {
            if let Err(e) = service.close_device().await {
                warn!("Reset: close device failed: {}", e);
            }
        }

        session.device = None;
        session.params = None;
        session.device_open = false;
        session.recording = false;
        self.shared.snapshot.send_modify(|s| {
            s.device_id = None;
            s.params = None;
            s.recording_since = None;
        });
        self.transition(SessionState::Idle);
        info!("Session reset");
        Ok(())
    }

    /// Ask the live transport for a frame now
    pub async fn request_frame(&self) {
        let session = self.shared.session.lock().await;
        if let Some(transport) = &session.transport {
            transport.refresh();
        }
    }

    /// Declare the stream of `transport_id` lost.
    ///
    /// Moves a streaming session to `Error` with kind `StreamLost`. Ignored,
    /// returning `false`, when that transport is no longer the live one.
    pub async fn report_stream_lost(&self, transport_id: Uuid, reason: &str) -> bool {
        self.escalate_if_current(
            transport_id,
            CamLinkError::StreamLost {
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn escalate_if_current(&self, transport_id: Uuid, err: CamLinkError) -> bool {
        let mut session = self.shared.session.lock().await;
        let live = session.transport.as_ref().map(|t| t.id());
        if live != Some(transport_id) || !self.state().is_streaming() {
            debug!("Ignoring failure from stale transport {}: {}", transport_id, err);
            return false;
        }
        self.escalate(&mut session, err).await;
        true
    }

    async fn escalate(&self, session: &mut Session, err: CamLinkError) {
        error!(kind = %err.kind(), "Session failed: {}", err);
        self.teardown_transport(session).await;
        self.shared.snapshot.send_modify(|s| s.recording_since = None);
        self.transition(SessionState::Error(err.diagnostic()));
        self.report(&err);
    }

    async fn teardown_transport(&self, session: &mut Session) {
        if let Some(pump) = session.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        if let Some(mut transport) = session.transport.take() {
            if let Err(e) = transport.disconnect().await {
                warn!("Transport disconnect failed: {}", e);
            }
            debug!("Transport {} torn down", transport.id());
        }
        self.shared.snapshot.send_modify(|s| {
            s.transport_id = None;
            s.reconnect_attempt = 0;
        });
    }

    fn cancel_pending(&self) {
        if let Some(handle) = self.shared.pending.lock().take() {
            debug!("Cancelling pending preview start");
            handle.cancel();
        }
    }

    /// Must be called with the lifecycle lock held
    fn transition(&self, next: SessionState) {
        let old = self.state();
        if old == next {
            return;
        }
        debug_assert!(
            old.can_transition_to(&next) || next == SessionState::Idle,
            "illegal transition {} -> {}",
            old,
            next
        );
        info!("Session {} -> {}", old, next);
        let published = next.clone();
        self.shared.snapshot.send_modify(|s| s.state = published);
        self.shared.sink.on_state_change(&old, &next);
    }

    fn report(&self, err: &CamLinkError) {
        self.shared.sink.on_error(err.kind(), &err.to_string());
    }

    fn spawn_pump(
        &self,
        transport_id: Uuid,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let sink = self.shared.sink.clone();
        let pipeline = FramePipeline::new(
            self.shared.pipeline.clone(),
            Arc::new(PipelineOutput(sink.clone())),
        );
        tokio::spawn(pump(
            Arc::downgrade(&self.shared),
            transport_id,
            events,
            pipeline,
            sink,
        ))
    }
}

fn reject(operation: &str, state: &SessionState) -> CamLinkError {
    CamLinkError::InvalidTransition {
        operation: operation.to_string(),
        state: state.name().to_string(),
    }
}

async fn cancellable<T, F>(
    token: &CancelToken,
    operation: &str,
    future: F,
) -> Result<T, CamLinkError>
where
    F: Future<Output = Result<T, CamLinkError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CamLinkError::Cancelled {
            operation: operation.to_string(),
        }),
        result = future => result,
    }
}

struct PipelineOutput(Arc<dyn PresentationSink>);

impl FrameSink for PipelineOutput {
    fn on_frame(&self, frame: RasterFrame) {
        self.0.on_frame(frame);
    }

    fn on_metrics(&self, metrics: PipelineMetrics) {
        self.0.on_metrics(metrics);
    }
}

/// Feed transport events through the pipeline until a fatal failure
async fn pump(
    shared: Weak<Shared>,
    transport_id: Uuid,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    mut pipeline: FramePipeline,
    sink: Arc<dyn PresentationSink>,
) {
    while let Some(event) = events.recv().await {
        let failure = match event {
            TransportEvent::Frame(frame) => match pipeline.process(frame) {
                FrameOutcome::Rendered => {
                    if let Some(shared) = shared.upgrade() {
                        shared.snapshot.send_if_modified(|s| {
                            std::mem::replace(&mut s.reconnect_attempt, 0) != 0
                        });
                    }
                    None
                }
                FrameOutcome::Dropped { .. } => None,
                FrameOutcome::SustainedFailure {
                    consecutive,
                    last_error,
                } => Some(CamLinkError::StreamLost {
                    reason: format!(
                        "{} consecutive frames failed to decode, last: {}",
                        consecutive, last_error
                    ),
                }),
            },
            TransportEvent::Status(message) => {
                debug!(
                    "Server {} message: {}",
                    message.message_type(),
                    message.detail().unwrap_or("-")
                );
                if message.is_error() {
                    sink.on_error(
                        ErrorKind::RequestFailed,
                        message.detail().unwrap_or("server reported an error"),
                    );
                }
                None
            }
            TransportEvent::Reconnecting { attempt, delay } => {
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Stream interrupted, reconnecting"
                );
                if let Some(shared) = shared.upgrade() {
                    shared.snapshot.send_modify(|s| s.reconnect_attempt = attempt);
                }
                None
            }
            TransportEvent::Failed(err) if err.is_terminal() => Some(err),
            TransportEvent::Failed(err) => Some(CamLinkError::StreamLost {
                reason: err.to_string(),
            }),
        };

        if let Some(err) = failure {
            if let Some(shared) = shared.upgrade() {
                let controller = SessionController { shared };
                tokio::spawn(async move {
                    controller.escalate_if_current(transport_id, err).await;
                });
            }
            return;
        }
    }
    debug!("Transport {} event channel closed", transport_id);
}
