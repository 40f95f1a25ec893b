//! Device catalog tests against an in-memory service

use async_trait::async_trait;
use camlink_core::*;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

struct ListingService {
    devices: Mutex<Result<Vec<CameraDevice>, String>>,
}

impl ListingService {
    fn new(devices: Vec<CameraDevice>) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(Ok(devices)),
        })
    }

    fn fail_with(&self, reason: &str) {
        *self.devices.lock() = Err(reason.to_string());
    }
}

#[async_trait]
impl CameraService for ListingService {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CamLinkError> {
        self.devices
            .lock()
            .clone()
            .map_err(|reason| CamLinkError::request_failed("list_devices", reason))
    }

    async fn open_device(&self, _: &str, _: &StreamParameters) -> Result<(), CamLinkError> {
        Ok(())
    }

    async fn close_device(&self) -> Result<(), CamLinkError> {
        Ok(())
    }

    async fn start_preview(&self) -> Result<(), CamLinkError> {
        Ok(())
    }

    async fn stop_preview(&self) -> Result<(), CamLinkError> {
        Ok(())
    }

    async fn capture(&self) -> Result<CaptureResult, CamLinkError> {
        Ok(CaptureResult {
            artifact: "still.jpg".to_string(),
        })
    }

    async fn start_recording(&self, _: &RecordingOptions) -> Result<(), CamLinkError> {
        Ok(())
    }

    async fn stop_recording(&self) -> Result<RecordingArtifact, CamLinkError> {
        Ok(RecordingArtifact {
            path: "rec.mp4".to_string(),
        })
    }

    async fn connection_status(&self, _: &str) -> Result<ConnectionStatus, CamLinkError> {
        Ok(ConnectionStatus::default())
    }
}

fn devices() -> Vec<CameraDevice> {
    vec![
        CameraDevice::new("cam0", "Front").with_format(
            "MJPG",
            vec![Resolution::new(1920, 1080), Resolution::new(640, 480)],
        ),
        CameraDevice::new("cam1", "Rear")
            .with_format("YUYV", vec![Resolution::new(1280, 720)])
            .with_format("NV12", vec![Resolution::new(640, 360)]),
    ]
}

#[tokio::test]
async fn test_refresh_and_lookup() {
    let catalog = DeviceCatalog::new(ListingService::new(devices()));
    assert!(catalog.is_empty());

    let listed = assert_ok!(catalog.refresh().await);
    assert_eq!(listed.len(), 2);
    assert_eq!(catalog.device("cam0").unwrap().name, "Front");
    assert!(catalog.device("cam9").is_none());
    assert_eq!(
        catalog.supported_resolutions("cam0", "MJPG"),
        vec![Resolution::new(1920, 1080), Resolution::new(640, 480)]
    );
    assert!(catalog.supported_resolutions("cam0", "YUYV").is_empty());
}

#[tokio::test]
async fn test_preferred_format_and_defaults() {
    let catalog = DeviceCatalog::new(ListingService::new(devices()));
    catalog.refresh().await.unwrap();

    assert_eq!(catalog.preferred_format("cam0").as_deref(), Some("MJPG"));
    // No MJPG: first listed format
    assert_eq!(catalog.preferred_format("cam1").as_deref(), Some("YUYV"));
    assert_eq!(catalog.formats("cam1"), vec!["YUYV", "NV12"]);

    let params = catalog.default_parameters("cam0").unwrap();
    assert_eq!(params, StreamParameters::new("MJPG", 1920, 1080, DEFAULT_FPS));
    assert!(catalog.supports("cam0", &StreamParameters::new("MJPG", 640, 480, 30)));
    assert!(!catalog.supports("cam0", &StreamParameters::new("MJPG", 800, 600, 30)));
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_list() {
    let service = ListingService::new(devices());
    let catalog = DeviceCatalog::new(service.clone());
    catalog.refresh().await.unwrap();

    service.fail_with("HTTP 500");
    let err = assert_err!(catalog.refresh().await);
    assert_eq!(err.kind(), ErrorKind::RequestFailed);
    assert_eq!(catalog.devices().len(), 2);
}
