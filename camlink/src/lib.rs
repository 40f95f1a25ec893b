//! # camlink
//!
//! Client-side controller for a camera attached to a remote service.
//!
//! camlink selects and opens a device, starts a live preview over either a
//! pull transport (repeatedly fetched stills) or a push transport (WebSocket
//! frames), captures stills and records video. Flaky links are handled by a
//! bounded retry policy on the stream connection; the lifecycle itself is an
//! explicit state machine that rejects illegal calls.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camlink::{CamLink, ControllerConfig, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), camlink::CamLinkError> {
//!     let config = ControllerConfig::lan().with_service_url("http://camera.local:8080");
//!     let (camlink, mut events) = CamLink::with_event_stream(config)?;
//!
//!     camlink.select_device_by_id("/dev/video0").await?;
//!     camlink.open_default().await?;
//!     camlink.controller().start_preview().await?;
//!
//!     while let Some(event) = events.next().await {
//!         if let SessionEvent::Frame(frame) = event {
//!             println!("frame {} ({}x{})", frame.sequence, frame.width, frame.height);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use camlink_core::{
    CamLinkError, CameraDevice, CameraService, CaptureResult, ConnectionStatus, DeviceCatalog,
    Diagnostic, ErrorKind, HttpCameraService, RecordingArtifact, RecordingOptions, Resolution,
    RetryPolicy, StreamParameters, Transport, TransportFactory, TransportKind,
};
pub use camlink_media::{PipelineConfig, PipelineMetrics, RasterFrame};

#[cfg(feature = "diagnostics")]
pub use camlink_diagnostics::{init_logging, SystemInfo, SystemMonitor, SystemStatsClient};

// Public API modules
pub mod config;
pub mod event;
pub mod reconciler;
pub mod session;
pub mod state;

// Re-export main API types
pub use config::{ControllerConfig, ReconcilerConfig};
pub use event::{
    ChannelSink, EventFilter, EventStream, FilteredEventStream, NullSink, PresentationSink,
    SessionEvent,
};
pub use reconciler::{DisplayedStatus, ReconcileOutcome, StatusReconciler};
pub use session::{SessionController, SessionSnapshot};
pub use state::SessionState;

use camlink_core::DefaultTransportFactory;
use std::sync::Arc;
use tracing::info;

/// Main entry point: the HTTP service client, device catalog, session
/// controller and status reconciler wired from one [`ControllerConfig`]
#[derive(Debug, Clone)]
pub struct CamLink {
    config: ControllerConfig,
    service: Arc<HttpCameraService>,
    catalog: Arc<DeviceCatalog>,
    controller: SessionController,
    reconciler: StatusReconciler,
}

impl CamLink {
    /// Build from `config`, reporting to `sink`
    pub fn new(config: ControllerConfig, sink: Arc<dyn PresentationSink>) -> Result<Self, CamLinkError> {
        config.validate()?;
        let service = Arc::new(HttpCameraService::new(
            &config.service_url,
            config.request_timeout,
        )?);
        let factory = Arc::new(DefaultTransportFactory::new(
            config.transport,
            service.clone(),
            config.pull.clone(),
            config.push.clone(),
            config.retry.clone(),
        ));
        let catalog = Arc::new(DeviceCatalog::new(service.clone()));
        let controller =
            SessionController::new(service.clone(), factory, sink, config.pipeline.clone());
        let reconciler = StatusReconciler::new(
            controller.clone(),
            service.clone(),
            config.reconciler.clone(),
        );
        info!(
            "camlink ready: {} via {} transport",
            config.service_url, config.transport
        );
        Ok(Self {
            config,
            service,
            catalog,
            controller,
            reconciler,
        })
    }

    /// Build from `config` with session output delivered as an [`EventStream`]
    pub fn with_event_stream(config: ControllerConfig) -> Result<(Self, EventStream), CamLinkError> {
        let (sink, events) = ChannelSink::new();
        Ok((Self::new(config, Arc::new(sink))?, events))
    }

    /// Active configuration
    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// HTTP client for the camera service
    pub fn service(&self) -> &Arc<HttpCameraService> {
        &self.service
    }

    /// Device catalog
    pub fn catalog(&self) -> &DeviceCatalog {
        &self.catalog
    }

    /// Session controller
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Status reconciler; call [`StatusReconciler::start`] to begin polling
    pub fn reconciler(&self) -> &StatusReconciler {
        &self.reconciler
    }

    /// Select a device by id, refreshing the catalog if it is not known yet
    pub async fn select_device_by_id(&self, id: &str) -> Result<(), CamLinkError> {
        let device = match self.catalog.device(id) {
            Some(device) => device,
            None => {
                self.catalog.refresh().await?;
                self.catalog.device(id).ok_or_else(|| {
                    CamLinkError::request_failed("select_device", format!("unknown device {}", id))
                })?
            }
        };
        self.controller.select_device(device).await
    }

    /// Open the selected device with the catalog's default parameters
    pub async fn open_default(&self) -> Result<(), CamLinkError> {
        let id = self.controller.snapshot().device_id.ok_or_else(|| {
            CamLinkError::InvalidTransition {
                operation: "open".to_string(),
                state: "Idle without a selected device".to_string(),
            }
        })?;
        let params = self.catalog.default_parameters(&id).ok_or_else(|| {
            CamLinkError::request_failed("open", format!("{} lists no formats", id))
        })?;
        self.controller.open(params).await
    }

    /// Start recording with the configured default options
    pub async fn start_recording(&self) -> Result<(), CamLinkError> {
        self.controller.start_recording(&self.config.recording).await
    }

    /// Client for the service's host telemetry endpoint
    #[cfg(feature = "diagnostics")]
    pub fn system_stats(&self) -> Result<SystemStatsClient, CamLinkError> {
        SystemStatsClient::new(&self.config.service_url, self.config.request_timeout)
    }

    /// Stop polling and return the session to `Idle`
    pub async fn shutdown(&self) -> Result<(), CamLinkError> {
        self.reconciler.stop();
        self.controller.reset().await
    }
}
