//! Configuration types and defaults

use camlink_core::{
    CamLinkError, PullTransportConfig, PushTransportConfig, RecordingOptions, RetryPolicy,
    TransportKind,
};
use camlink_media::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status reconciliation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Time between status queries
    #[serde(with = "camlink_core::serde_millis")]
    pub poll_interval: Duration,
    /// Consecutive disagreeing polls before the stream is declared lost
    pub disagreement_threshold: u32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            disagreement_threshold: 3,
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Base URL of the camera service
    pub service_url: String,
    /// Per request timeout for service calls
    #[serde(with = "camlink_core::serde_millis")]
    pub request_timeout: Duration,
    /// Frame delivery mechanism
    pub transport: TransportKind,
    /// Pull transport settings
    pub pull: PullTransportConfig,
    /// Push transport settings
    pub push: PushTransportConfig,
    /// Stream connection retry policy
    pub retry: RetryPolicy,
    /// Status reconciliation settings
    pub reconciler: ReconcilerConfig,
    /// Decode pipeline settings
    pub pipeline: PipelineConfig,
    /// Options used when recording without explicit options
    pub recording: RecordingOptions,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::lan()
    }
}

impl ControllerConfig {
    /// Camera service on the local network
    pub fn lan() -> Self {
        Self {
            service_url: "http://127.0.0.1:8080/".to_string(),
            request_timeout: Duration::from_secs(10),
            transport: TransportKind::Push,
            pull: PullTransportConfig::default(),
            push: PushTransportConfig::default(),
            retry: RetryPolicy::default(),
            reconciler: ReconcilerConfig::default(),
            pipeline: PipelineConfig::default(),
            recording: RecordingOptions::default(),
        }
    }

    /// Camera service behind a slow or lossy link
    pub fn remote() -> Self {
        let mut config = Self::lan();
        config.request_timeout = Duration::from_secs(20);
        config.pull.fetch_timeout = Duration::from_secs(20);
        config.push.confirm_timeout = Duration::from_secs(20);
        config.push.teardown_timeout = Duration::from_secs(5);
        config.pull.teardown_timeout = Duration::from_secs(5);
        config.reconciler.poll_interval = Duration::from_secs(5);
        config
    }

    /// Point both the HTTP client and the push channel at `url`.
    ///
    /// The push URL becomes `ws(s)://<host>/ws/camera`.
    pub fn with_service_url(mut self, url: &str) -> Self {
        let base = if url.ends_with('/') {
            url.to_string()
        } else {
            format!("{}/", url)
        };
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.clone()
        };
        self.push.url = format!("{}ws/camera", ws_base);
        self.service_url = base;
        self
    }

    /// Select the frame delivery mechanism
    pub fn with_transport(mut self, kind: TransportKind) -> Self {
        self.transport = kind;
        self
    }

    /// Parse from JSON; absent fields take their defaults.
    ///
    /// A push URL left at its default follows `service_url`.
    pub fn from_json_str(json: &str) -> Result<Self, CamLinkError> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| CamLinkError::Configuration {
                field: "json".to_string(),
                reason: e.to_string(),
            })?;
        if config.push.url == PushTransportConfig::default().url {
            let service_url = config.service_url.clone();
            config = config.with_service_url(&service_url);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controller cannot run with
    pub fn validate(&self) -> Result<(), CamLinkError> {
        fn invalid(field: &str, reason: &str) -> Result<(), CamLinkError> {
            Err(CamLinkError::Configuration {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        }

        if self.service_url.is_empty() {
            return invalid("service_url", "must not be empty");
        }
        if self.request_timeout.is_zero() {
            return invalid("request_timeout", "must be non-zero");
        }
        if self.retry.factor == 0 {
            return invalid("retry.factor", "must be at least 1");
        }
        if self.retry.base_delay > self.retry.max_delay {
            return invalid("retry.base_delay", "must not exceed retry.max_delay");
        }
        if self.reconciler.disagreement_threshold == 0 {
            return invalid("reconciler.disagreement_threshold", "must be at least 1");
        }
        if self.reconciler.poll_interval.is_zero() {
            return invalid("reconciler.poll_interval", "must be non-zero");
        }
        if self.transport == TransportKind::Push && self.push.url.is_empty() {
            return invalid("push.url", "required for the push transport");
        }
        self.pipeline.validate().map_err(CamLinkError::from)
    }
}
