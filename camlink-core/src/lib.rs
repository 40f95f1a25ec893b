//! # camlink core
//!
//! Client side contract against a remote camera service: the device data
//! model, the HTTP service client, the device catalog, the retry policy and
//! the two frame transports (pull and push).

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod catalog;
pub mod device;
pub mod error;
pub mod protocol;
pub mod retry;
pub mod serde_millis;
pub mod service;
pub mod transport;

// Re-export main types
pub use cancel::{CancelHandle, CancelToken};
pub use catalog::{DeviceCatalog, DEFAULT_FPS, PREFERRED_FORMAT};
pub use device::{
    CameraDevice, CaptureResult, ConnectionStatus, Frame, RecordingArtifact, RecordingOptions,
    Resolution, StreamParameters,
};
pub use error::{CamLinkError, Diagnostic, ErrorKind};
pub use protocol::{ControlMessage, PushMessage, ServerMessage};
pub use retry::{backoff, RetryDecision, RetryPolicy};
pub use service::{
    generate_client_id, ApiResponse, CameraService, HttpCameraService, SnapshotRequest,
    SnapshotSource,
};
pub use transport::{
    DefaultTransportFactory, EventSink, PullTransport, PullTransportConfig, PushTransport,
    PushTransportConfig, StreamTarget, Transport, TransportEvent, TransportFactory, TransportKind,
};
