//! Host telemetry reported by the camera service
//!
//! The service exposes `GET /api/system/info` with CPU, memory, storage and
//! network figures for the machine the camera is attached to. This module
//! reads it once ([`SystemStatsClient`]) or keeps polling it in the
//! background ([`SystemMonitor`]). It never mutates anything on the service.

use camlink_core::{ApiResponse, CamLinkError};
use parking_lot::{Mutex, RwLock};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// CPU figures
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuInfo {
    /// Number of cores
    pub core_count: u32,
    /// Utilization in percent
    pub usage_percent: f64,
    /// Temperature in degrees Celsius
    pub temperature: f64,
    /// Clock in MHz
    pub frequency: f64,
}

/// Memory figures, in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryInfo {
    /// Total memory
    pub total: u64,
    /// Used memory
    pub used: u64,
    /// Free memory
    pub free: u64,
    /// Utilization in percent
    pub usage_percent: f64,
}

/// One mounted filesystem, in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageInfo {
    /// Mount point
    pub mount_point: String,
    /// Capacity
    pub total: u64,
    /// Used space
    pub used: u64,
    /// Free space
    pub free: u64,
    /// Utilization in percent
    pub usage_percent: f64,
}

/// One network interface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkInfo {
    /// Interface name
    pub interface: String,
    /// Assigned address
    pub ip_address: String,
    /// Bytes sent since boot
    pub tx_bytes: u64,
    /// Bytes received since boot
    pub rx_bytes: u64,
    /// Send rate in bytes per second
    pub tx_rate: f64,
    /// Receive rate in bytes per second
    pub rx_rate: f64,
}

/// Snapshot of the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemInfo {
    /// Operating system description
    pub os_version: String,
    /// Kernel release
    pub kernel_version: String,
    /// Host name
    pub hostname: String,
    /// Uptime as reported by the host
    pub uptime: String,
    /// Host wall clock
    pub system_time: String,
    /// 1, 5 and 15 minute load
    pub load_average: Vec<f64>,
    /// CPU
    pub cpu: CpuInfo,
    /// Memory
    pub memory: MemoryInfo,
    /// Filesystems
    pub storage: Vec<StorageInfo>,
    /// Interfaces
    pub network: Vec<NetworkInfo>,
}

impl SystemInfo {
    /// One line summary for logs and status bars
    pub fn summary(&self) -> String {
        format!(
            "{} | CPU {:.1}% {:.1}°C | MEM {} / {}",
            if self.hostname.is_empty() { "--" } else { &self.hostname },
            self.cpu.usage_percent,
            self.cpu.temperature,
            format_bytes(self.memory.used),
            format_bytes(self.memory.total)
        )
    }
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[derive(Debug, Deserialize)]
struct SystemBody {
    #[serde(default)]
    system: SystemInfo,
}

/// Render a byte count with binary units, e.g. `1.5 GB`
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 7] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let text = format!("{:.2}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", text, UNITS[unit])
}

/// Render a byte rate, e.g. `12 KB/s`
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec.max(0.0) as u64))
}

/// One-shot reader for `/api/system/info`
#[derive(Debug, Clone)]
pub struct SystemStatsClient {
    http: Client,
    endpoint: Url,
    timeout: Duration,
}

impl SystemStatsClient {
    /// Create a client for the service at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CamLinkError> {
        let endpoint = Url::parse(base_url)
            .and_then(|base| base.join("api/system/info"))
            .map_err(|e| CamLinkError::Configuration {
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
            endpoint,
            timeout,
        })
    }

    /// Endpoint being queried
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch the current snapshot
    pub async fn fetch(&self) -> Result<SystemInfo, CamLinkError> {
        const OP: &str = "system_info";
        debug!("GET {}", self.endpoint);
        let response = self
            .http
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CamLinkError::Timeout {
                        operation: OP.to_string(),
                        duration: self.timeout,
                    }
                } else {
                    CamLinkError::request_failed(OP, e)
                }
            })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CamLinkError::request_failed(OP, e))?;
        let envelope: ApiResponse<SystemBody> = serde_json::from_str(&text).map_err(|e| {
            if status.is_success() {
                CamLinkError::request_failed(OP, format!("malformed response: {}", e))
            } else {
                CamLinkError::request_failed(OP, format!("HTTP {}", status.as_u16()))
            }
        })?;
        if !status.is_success() {
            return Err(CamLinkError::request_failed(
                OP,
                format!("HTTP {}: {}", status.as_u16(), envelope.failure_reason()),
            ));
        }
        Ok(envelope.into_result(OP)?.system)
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    latest: Option<SystemInfo>,
    last_error: Option<String>,
    polls: u64,
}

/// Background poller keeping the latest host snapshot
#[derive(Debug)]
pub struct SystemMonitor {
    client: SystemStatsClient,
    interval: Duration,
    state: Arc<RwLock<MonitorState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SystemMonitor {
    /// Create a stopped monitor
    pub fn new(client: SystemStatsClient, interval: Duration) -> Self {
        Self {
            client,
            interval,
            state: Arc::new(RwLock::new(MonitorState::default())),
            task: Mutex::new(None),
        }
    }

    /// Poll once and record the result
    pub async fn poll_once(&self) -> Result<SystemInfo, CamLinkError> {
        poll(&self.client, &self.state).await
    }

    /// Start polling on the configured interval. No-op if already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let client = self.client.clone();
        let state = self.state.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let _ = poll(&client, &state).await;
            }
        }));
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

    /// Latest successful snapshot
    pub fn latest(&self) -> Option<SystemInfo> {
        self.state.read().latest.clone()
    }

    /// Error from the most recent poll, cleared on success
    pub fn last_error(&self) -> Option<String> {
        self.state.read().last_error.clone()
    }

    /// Number of completed polls
    pub fn polls(&self) -> u64 {
        self.state.read().polls
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll(
    client: &SystemStatsClient,
    state: &RwLock<MonitorState>,
) -> Result<SystemInfo, CamLinkError> {
    let result = client.fetch().await;
    let mut state = state.write();
    state.polls += 1;
    match &result {
        Ok(info) => {
            state.latest = Some(info.clone());
            state.last_error = None;
        }
        Err(e) => {
            warn!("System info poll failed: {}", e);
            state.last_error = Some(e.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(512), "512 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(4 * 1024 * 1024 * 1024), "4 GB");
        assert_eq!(format_rate(2048.0), "2 KB/s");
    }

    #[test]
    fn test_parse_info_body() {
        let env: ApiResponse<SystemBody> = serde_json::from_str(
            r#"{"success":true,"system":{"hostname":"rk3588","uptime":"3 days",
                "load_average":[0.5,0.4,0.3],
                "cpu":{"core_count":8,"usage_percent":12.5,"temperature":48.0,"frequency":1800.0},
                "memory":{"total":8589934592,"used":2147483648,"free":6442450944,"usage_percent":25.0},
                "storage":[{"mount_point":"/","total":100,"used":40,"free":60,"usage_percent":40.0}],
                "network":[{"interface":"eth0","ip_address":"10.0.0.2","tx_bytes":1,"rx_bytes":2,"tx_rate":0.0,"rx_rate":0.0}]}}"#,
        )
        .unwrap();
        let info = env.into_result("system_info").unwrap().system;
        assert_eq!(info.cpu.core_count, 8);
        assert_eq!(info.load_average.len(), 3);
        assert_eq!(info.storage[0].mount_point, "/");
        assert_eq!(info.network[0].interface, "eth0");
        assert_eq!(info.summary(), "rk3588 | CPU 12.5% 48.0°C | MEM 2 GB / 8 GB");
    }
}
