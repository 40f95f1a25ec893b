//! In-memory camera service, snapshot source, transport factory and sink
//! shared by the controller tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use camlink::*;
use camlink_core::{
    Frame, ServerMessage, SnapshotRequest, SnapshotSource, StreamTarget, TransportEvent,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn png_bytes(width: u32, height: u32) -> Bytes {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 120, 200, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    Bytes::from(out.into_inner())
}

/// JPEG signature followed by garbage
pub fn corrupt_jpeg() -> Bytes {
    Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0xDE, 0xAD, 0xBE, 0xEF])
}

pub fn cam0() -> CameraDevice {
    CameraDevice::new("cam0", "USB Camera").with_format(
        "MJPG",
        vec![Resolution::new(1920, 1080), Resolution::new(640, 480)],
    )
}

pub fn vga() -> StreamParameters {
    StreamParameters::new("MJPG", 640, 480, 30)
}

/// Camera service that records calls and fails the operations it is told to
#[derive(Default)]
pub struct MockService {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, String>>,
    statuses: Mutex<VecDeque<Result<ConnectionStatus, String>>>,
}

impl MockService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail(&self, operation: &str, reason: &str) {
        self.failures
            .lock()
            .insert(operation.to_string(), reason.to_string());
    }

    pub fn heal(&self, operation: &str) {
        self.failures.lock().remove(operation);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        self.calls.lock().iter().filter(|c| *c == operation).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Queue status answers; once drained, the service reports connected
    pub fn push_status(&self, status: Result<ConnectionStatus, String>) {
        self.statuses.lock().push_back(status);
    }

    fn record(&self, operation: &str) -> Result<(), CamLinkError> {
        self.calls.lock().push(operation.to_string());
        match self.failures.lock().get(operation) {
            Some(reason) => Err(CamLinkError::request_failed(operation, reason)),
            None => Ok(()),
        }
    }
}

pub fn connected(width: u32, height: u32, fps: f64) -> ConnectionStatus {
    ConnectionStatus {
        is_connected: true,
        client_id: Some("client_1".to_string()),
        width: Some(width),
        height: Some(height),
        fps: Some(fps),
    }
}

pub fn disconnected() -> ConnectionStatus {
    ConnectionStatus::default()
}

#[async_trait]
impl CameraService for MockService {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CamLinkError> {
        self.record("list_devices")?;
        Ok(vec![cam0()])
    }

    async fn open_device(&self, _id: &str, _params: &StreamParameters) -> Result<(), CamLinkError> {
        self.record("open_device")
    }

    async fn close_device(&self) -> Result<(), CamLinkError> {
        self.record("close_device")
    }

    async fn start_preview(&self) -> Result<(), CamLinkError> {
        self.record("start_preview")
    }

    async fn stop_preview(&self) -> Result<(), CamLinkError> {
        self.record("stop_preview")
    }

    async fn capture(&self) -> Result<CaptureResult, CamLinkError> {
        self.record("capture")?;
        Ok(CaptureResult {
            artifact: "capture_20261016_090000.jpg".to_string(),
        })
    }

    async fn start_recording(&self, _options: &RecordingOptions) -> Result<(), CamLinkError> {
        self.record("start_recording")
    }

    async fn stop_recording(&self) -> Result<RecordingArtifact, CamLinkError> {
        self.record("stop_recording")?;
        Ok(RecordingArtifact {
            path: "/recordings/rec_1.mp4".to_string(),
        })
    }

    async fn connection_status(&self, _id: &str) -> Result<ConnectionStatus, CamLinkError> {
        self.record("connection_status")?;
        match self.statuses.lock().pop_front() {
            Some(Ok(status)) => Ok(status),
            Some(Err(reason)) => Err(CamLinkError::request_failed("connection_status", reason)),
            None => Ok(connected(640, 480, 30.0)),
        }
    }
}

/// Snapshot endpoint that either always fails or always serves a PNG
pub struct MockSnapshots {
    frame: Option<Bytes>,
    fetches: AtomicUsize,
}

impl MockSnapshots {
    pub fn serving(frame: Bytes) -> Arc<Self> {
        Arc::new(Self {
            frame: Some(frame),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            frame: None,
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for MockSnapshots {
    async fn fetch_frame(&self, _request: &SnapshotRequest) -> Result<Bytes, CamLinkError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match &self.frame {
            Some(frame) => Ok(frame.clone()),
            None => Err(CamLinkError::request_failed(
                "fetch_frame",
                "HTTP 503: Service Unavailable",
            )),
        }
    }
}

/// How a scripted transport's `connect` behaves
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Wait `delay`, emit one PNG frame, resolve
    FirstFrame { delay: Duration },
    /// Resolve with retry exhaustion
    Exhausted,
    /// Never resolve
    Hang,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

/// Factory for scripted transports; keeps the event sender of the latest one
pub struct MockFactory {
    script: Mutex<ConnectScript>,
    counters: Arc<Counters>,
    latest: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl MockFactory {
    pub fn new(script: ConnectScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            counters: Arc::new(Counters::default()),
            latest: Mutex::new(None),
        })
    }

    pub fn set_script(&self, script: ConnectScript) {
        *self.script.lock() = script;
    }

    pub fn created(&self) -> usize {
        self.counters.created.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.counters.max_live.load(Ordering::SeqCst)
    }

    /// Send an event as the latest transport. `false` if nobody listens.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match self.latest.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn inject_frame(&self, payload: Bytes, sequence: u64) -> bool {
        self.inject(TransportEvent::Frame(Frame::new(payload, sequence)))
    }

    pub fn inject_server_error(&self, message: &str) -> bool {
        self.inject(TransportEvent::Status(ServerMessage::Error {
            message: Some(message.to_string()),
        }))
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, events: mpsc::UnboundedSender<TransportEvent>) -> Box<dyn Transport> {
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        *self.latest.lock() = Some(events.clone());
        Box::new(MockTransport {
            id: Uuid::new_v4(),
            script: self.script.lock().clone(),
            events,
            counters: self.counters.clone(),
            counted: false,
            connected: false,
        })
    }
}

struct MockTransport {
    id: Uuid,
    script: ConnectScript,
    events: mpsc::UnboundedSender<TransportEvent>,
    counters: Arc<Counters>,
    counted: bool,
    connected: bool,
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, _target: &StreamTarget) -> Result<(), CamLinkError> {
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        self.counted = true;
        match self.script.clone() {
            ConnectScript::FirstFrame { delay } => {
                tokio::time::sleep(delay).await;
                let _ = self
                    .events
                    .send(TransportEvent::Frame(Frame::new(png_bytes(8, 6), 1)));
                self.connected = true;
                Ok(())
            }
            ConnectScript::Exhausted => Err(CamLinkError::RetryExhausted {
                attempts: 4,
                last_error: "HTTP 503: Service Unavailable".to_string(),
            }),
            ConnectScript::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), CamLinkError> {
        if std::mem::replace(&mut self.counted, false) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        self.connected = false;
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Push
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Sink that keeps every callback
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SessionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.events.lock().clone()
    }

    pub fn transitions(&self) -> Vec<(SessionState, SessionState)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::StateChanged { old, new } => Some((old.clone(), new.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn frames(&self) -> Vec<RasterFrame> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Frame(frame) => Some(frame.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(ErrorKind, String)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Error { kind, message } => Some((*kind, message.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl PresentationSink for RecordingSink {
    fn on_frame(&self, frame: RasterFrame) {
        self.events.lock().push(SessionEvent::Frame(frame));
    }

    fn on_state_change(&self, old: &SessionState, new: &SessionState) {
        self.events.lock().push(SessionEvent::StateChanged {
            old: old.clone(),
            new: new.clone(),
        });
    }

    fn on_error(&self, kind: ErrorKind, message: &str) {
        self.events.lock().push(SessionEvent::Error {
            kind,
            message: message.to_string(),
        });
    }

    fn on_metrics(&self, metrics: PipelineMetrics) {
        self.events.lock().push(SessionEvent::Metrics(metrics));
    }
}

/// Poll `condition` until it holds, failing after thirty (virtual) seconds
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub struct Harness {
    pub service: Arc<MockService>,
    pub factory: Arc<MockFactory>,
    pub sink: Arc<RecordingSink>,
    pub controller: SessionController,
}

/// Controller over the mock service and a scripted transport factory
pub fn harness(script: ConnectScript) -> Harness {
    let service = MockService::new();
    let factory = MockFactory::new(script);
    let sink = RecordingSink::new();
    let controller = SessionController::new(
        service.clone(),
        factory.clone(),
        sink.clone(),
        PipelineConfig::default(),
    );
    Harness {
        service,
        factory,
        sink,
        controller,
    }
}

impl Harness {
    /// Select cam0, open at 640x480 and start the preview
    pub async fn previewing(&self) {
        self.controller.select_device(cam0()).await.unwrap();
        self.controller.open(vga()).await.unwrap();
        self.controller.start_preview().await.unwrap();
        assert_eq!(self.controller.state(), SessionState::Previewing);
    }
}
