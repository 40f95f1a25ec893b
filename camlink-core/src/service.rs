//! Remote camera service contract and its HTTP implementation

use crate::device::{
    CameraDevice, CaptureResult, ConnectionStatus, RecordingArtifact, RecordingOptions,
    StreamParameters,
};
use crate::error::CamLinkError;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Device lifecycle operations offered by the remote service
#[async_trait]
pub trait CameraService: Send + Sync {
    /// List available devices
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CamLinkError>;

    /// Open `device_id` with the given parameters
    async fn open_device(
        &self,
        device_id: &str,
        params: &StreamParameters,
    ) -> Result<(), CamLinkError>;

    /// Close the open device
    async fn close_device(&self) -> Result<(), CamLinkError>;

    /// Start server side preview
    async fn start_preview(&self) -> Result<(), CamLinkError>;

    /// Stop server side preview. Safe to call when already stopped.
    async fn stop_preview(&self) -> Result<(), CamLinkError>;

    /// Capture a still
    async fn capture(&self) -> Result<CaptureResult, CamLinkError>;

    /// Start recording
    async fn start_recording(&self, options: &RecordingOptions) -> Result<(), CamLinkError>;

    /// Stop recording
    async fn stop_recording(&self) -> Result<RecordingArtifact, CamLinkError>;

    /// Query the server's view of the stream for `device_id`
    async fn connection_status(&self, device_id: &str) -> Result<ConnectionStatus, CamLinkError>;
}

/// One pull request for a still image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// Target device
    pub camera_id: String,
    /// Client id of the session
    pub client_id: String,
    /// Strictly increasing cache-busting token
    pub cache_token: u64,
    /// Retry number, absent on a first attempt
    pub retry: Option<u32>,
}

/// Source of single still images, used by the pull transport
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch one encoded image
    async fn fetch_frame(&self, request: &SnapshotRequest) -> Result<Bytes, CamLinkError>;
}

/// Generate a client id of the form `client-<random>-<unix ms>`
pub fn generate_client_id() -> String {
    format!("client-{}-{}", uuid::Uuid::new_v4().simple(), unix_millis())
}

/// Milliseconds since the unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Response envelope used by the service.
///
/// Success is signalled either as `"success": true` or `"status": "success"`;
/// failure text arrives in `error` or `message`.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    /// Boolean success flag
    #[serde(default)]
    pub success: Option<bool>,
    /// String status flag
    #[serde(default)]
    pub status: Option<String>,
    /// Error text
    #[serde(default)]
    pub error: Option<String>,
    /// Informational or error text
    #[serde(default)]
    pub message: Option<String>,
    /// Operation specific fields
    #[serde(flatten)]
    pub body: T,
}

impl<T> ApiResponse<T> {
    /// Whether the envelope reports success
    pub fn is_success(&self) -> bool {
        match (self.success, self.status.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(status)) => status.eq_ignore_ascii_case("success"),
            (None, None) => self.error.is_none(),
        }
    }

    /// Failure text, if any
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "service reported failure".to_string())
    }

    /// Convert to the body or a [`CamLinkError::RequestFailed`]
    pub fn into_result(self, operation: &str) -> Result<T, CamLinkError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(CamLinkError::request_failed(operation, self.failure_reason()))
        }
    }
}

/// Body with no interesting fields
#[derive(Debug, Default, Deserialize)]
pub struct Empty {}

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(default)]
    cameras: Vec<CameraDevice>,
}

#[derive(Debug, Deserialize)]
struct CaptureBody {
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StopRecordingBody {
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenRequest<'a> {
    device_path: &'a str,
    format: &'a str,
    width: u32,
    height: u32,
    fps: u32,
}

#[derive(Debug, Serialize)]
struct CaptureRequest {
    quality: u8,
}

/// HTTP client for the camera service
#[derive(Debug, Clone)]
pub struct HttpCameraService {
    http: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpCameraService {
    /// Create a client for `base_url` with a per request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CamLinkError> {
        let base_url = Url::parse(base_url).map_err(|e| CamLinkError::Configuration {
            field: "service_url".to_string(),
            reason: format!("{}: {}", base_url, e),
        })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CamLinkError::Configuration {
                field: "http_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    /// Base URL requests are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn map_send_error(&self, operation: &str, e: reqwest::Error) -> CamLinkError {
        if e.is_timeout() {
            CamLinkError::Timeout {
                operation: operation.to_string(),
                duration: self.timeout,
            }
        } else {
            CamLinkError::request_failed(operation, e)
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, CamLinkError> {
        self.base_url
            .join(path)
            .map_err(|e| CamLinkError::Configuration {
                field: "service_url".to_string(),
                reason: format!("cannot join {}: {}", path, e),
            })
    }

    async fn post<B, T>(&self, operation: &str, path: &str, body: Option<&B>) -> Result<T, CamLinkError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("POST {} ({})", url, operation);
        let mut request = self.http.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| self.map_send_error(operation, e))?;
        decode_envelope(operation, response).await
    }

    async fn get<T>(&self, operation: &str, path: &str, query: &[(&str, String)]) -> Result<T, CamLinkError>
    where
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!("GET {} ({})", url, operation);
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.map_send_error(operation, e))?;
        decode_envelope(operation, response).await
    }
}


async fn decode_envelope<T: DeserializeOwned>(
    operation: &str,
    response: reqwest::Response,
) -> Result<T, CamLinkError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| CamLinkError::request_failed(operation, e))?;

    if !status.is_success() {
        let detail = serde_json::from_str::<ApiResponse<Empty>>(&text)
            .map(|env| env.failure_reason())
            .unwrap_or_else(|_| status_text(status));
        warn!("{} failed with HTTP {}: {}", operation, status.as_u16(), detail);
        return Err(CamLinkError::request_failed(
            operation,
            format!("HTTP {}: {}", status.as_u16(), detail),
        ));
    }

    let envelope: ApiResponse<T> = serde_json::from_str(&text)
        .map_err(|e| CamLinkError::request_failed(operation, format!("malformed response: {}", e)))?;
    envelope.into_result(operation)
}

fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| status.as_str().to_string())
}

#[async_trait]
impl CameraService for HttpCameraService {
    async fn list_devices(&self) -> Result<Vec<CameraDevice>, CamLinkError> {
        let list: DeviceList = self.get("list_devices", "api/cameras", &[]).await?;
        Ok(list.cameras)
    }

    async fn open_device(
        &self,
        device_id: &str,
        params: &StreamParameters,
    ) -> Result<(), CamLinkError> {
        let body = OpenRequest {
            device_path: device_id,
            format: &params.format,
            width: params.width,
            height: params.height,
            fps: params.fps,
        };
        let _: Empty = self.post("open_device", "api/cameras/open", Some(&body)).await?;
        Ok(())
    }

    async fn close_device(&self) -> Result<(), CamLinkError> {
        let _: Empty = self
            .post::<(), _>("close_device", "api/cameras/close", None)
            .await?;
        Ok(())
    }

    async fn start_preview(&self) -> Result<(), CamLinkError> {
        let _: Empty = self
            .post::<(), _>("start_preview", "api/cameras/start_preview", None)
            .await?;
        Ok(())
    }

    async fn stop_preview(&self) -> Result<(), CamLinkError> {
        let _: Empty = self
            .post::<(), _>("stop_preview", "api/cameras/stop_preview", None)
            .await?;
        Ok(())
    }

    async fn capture(&self) -> Result<CaptureResult, CamLinkError> {
        let body: CaptureBody = self
            .post("capture", "api/cameras/capture", Some(&CaptureRequest { quality: 90 }))
            .await?;
        let artifact = body
            .filename
            .or(body.file_path)
            .ok_or_else(|| CamLinkError::request_failed("capture", "response carries no filename"))?;
        Ok(CaptureResult { artifact })
    }

    async fn start_recording(&self, options: &RecordingOptions) -> Result<(), CamLinkError> {
        let _: Empty = self
            .post("start_recording", "api/cameras/start_recording", Some(options))
            .await?;
        Ok(())
    }

    async fn stop_recording(&self) -> Result<RecordingArtifact, CamLinkError> {
        let body: StopRecordingBody = self
            .post::<(), _>("stop_recording", "api/cameras/stop_recording", None)
            .await?;
        let path = body.file_path.or(body.filename).ok_or_else(|| {
            CamLinkError::request_failed("stop_recording", "response carries no file_path")
        })?;
        Ok(RecordingArtifact { path })
    }

    async fn connection_status(&self, device_id: &str) -> Result<ConnectionStatus, CamLinkError> {
        self.get(
            "connection_status",
            "api/cameras/status",
            &[("camera_id", device_id.to_string())],
        )
        .await
    }
}

#[async_trait]
impl SnapshotSource for HttpCameraService {
    async fn fetch_frame(&self, request: &SnapshotRequest) -> Result<Bytes, CamLinkError> {
        let url = self.endpoint("api/stream")?;
        let mut query = vec![
            ("camera_id", request.camera_id.clone()),
            ("client_id", request.client_id.clone()),
            ("t", request.cache_token.to_string()),
        ];
        if let Some(retry) = request.retry {
            query.push(("retry", retry.to_string()));
        }

        let response = self
            .http
            .get(url)
            .query(&query)
            .send()
            .await
            .map_err(|e| self.map_send_error("fetch_frame", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CamLinkError::request_failed(
                "fetch_frame",
                format!("HTTP {}: {}", status.as_u16(), status_text(status)),
            ));
        }
        let payload = response
            .bytes()
            .await
            .map_err(|e| CamLinkError::request_failed("fetch_frame", e))?;
        if payload.is_empty() {
            return Err(CamLinkError::request_failed("fetch_frame", "empty image body"));
        }
        Ok(payload)
    }
}
