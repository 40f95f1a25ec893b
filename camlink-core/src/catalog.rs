//! Cached device listing

use crate::device::{CameraDevice, Resolution, StreamParameters};
use crate::error::CamLinkError;
use crate::service::CameraService;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

/// Format preferred when a device offers it
pub const PREFERRED_FORMAT: &str = "MJPG";

/// Frame rate used when the caller does not choose one
pub const DEFAULT_FPS: u32 = 30;

/// Fetches and caches the device list. Pure query, no state machine.
pub struct DeviceCatalog {
    service: Arc<dyn CameraService>,
    devices: RwLock<Vec<CameraDevice>>,
}

impl std::fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field("devices", &self.devices.read().len())
            .finish()
    }
}

impl DeviceCatalog {
    /// Create an empty catalog backed by `service`
    pub fn new(service: Arc<dyn CameraService>) -> Self {
        Self {
            service,
            devices: RwLock::new(Vec::new()),
        }
    }

    /// Replace the cached list with a fresh one from the service.
    ///
    /// On failure the previous list is kept.
    pub async fn refresh(&self) -> Result<Vec<CameraDevice>, CamLinkError> {
        let devices = self.service.list_devices().await?;
        info!("Device catalog refreshed: {} device(s)", devices.len());
        *self.devices.write() = devices.clone();
        Ok(devices)
    }

    /// Cached devices
    pub fn devices(&self) -> Vec<CameraDevice> {
        self.devices.read().clone()
    }

    /// Cached device by id
    pub fn device(&self, id: &str) -> Option<CameraDevice> {
        self.devices.read().iter().find(|d| d.id == id).cloned()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Formats offered by a device
    pub fn formats(&self, id: &str) -> Vec<String> {
        self.device(id)
            .map(|d| d.format_names().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Resolutions a device offers for `format`
    pub fn supported_resolutions(&self, id: &str, format: &str) -> Vec<Resolution> {
        self.device(id)
            .map(|d| d.resolutions(format).to_vec())
            .unwrap_or_default()
    }

    /// MJPG when offered, otherwise the first listed format
    pub fn preferred_format(&self, id: &str) -> Option<String> {
        let device = self.device(id)?;
        if device.has_format(PREFERRED_FORMAT) {
            return Some(PREFERRED_FORMAT.to_string());
        }
        let first = device.format_names().next().map(str::to_string);
        first
    }

    /// Preferred format, its first resolution and [`DEFAULT_FPS`]
    pub fn default_parameters(&self, id: &str) -> Option<StreamParameters> {
        let format = self.preferred_format(id)?;
        let first = *self.supported_resolutions(id, &format).first()?;
        Some(StreamParameters::new(
            format,
            first.width,
            first.height,
            DEFAULT_FPS,
        ))
    }

    /// Whether `params` names a format and resolution the device lists
    pub fn supports(&self, id: &str, params: &StreamParameters) -> bool {
        self.supported_resolutions(id, &params.format)
            .contains(&params.resolution())
    }
}
