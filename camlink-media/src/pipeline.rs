//! Frame decode-and-present pipeline
//!
//! Turns opaque encoded frames into RGBA rasters, hands them to a
//! [`FrameSink`] and keeps throughput counters. A single bad frame is only
//! counted; a run of consecutive failures is reported back to the caller as
//! a sustained failure so the stream can be declared lost.

use crate::error::{ErrorCategory, MediaError, MediaResult};
use bytes::Bytes;
use camlink_core::Frame;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Consecutive decode failures that count as a lost stream
    pub decode_failure_threshold: u32,
    /// Sliding window used for the frame rate
    #[serde(with = "camlink_core::serde_millis")]
    pub fps_window: Duration,
    /// Minimum spacing between metrics reports
    #[serde(with = "camlink_core::serde_millis")]
    pub metrics_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            decode_failure_threshold: 5,
            fps_window: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> MediaResult<()> {
        if self.decode_failure_threshold == 0 {
            return Err(MediaError::InvalidConfiguration {
                message: "decode_failure_threshold must be at least 1".to_string(),
            });
        }
        if self.fps_window.is_zero() {
            return Err(MediaError::InvalidConfiguration {
                message: "fps_window must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// A decoded frame ready for display
#[derive(Debug, Clone)]
pub struct RasterFrame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// RGBA8 pixels, row major
    pub pixels: Bytes,
    /// Sequence number of the source frame
    pub sequence: u64,
}

impl RasterFrame {
    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * 4
    }
}

/// Throughput counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Frames decoded successfully
    pub frames_received: u64,
    /// Frames that failed to decode
    pub decode_errors: u64,
    /// Frames per second over the sliding window
    pub current_fps: f64,
}

/// Receiver of decoded frames
pub trait FrameSink: Send + Sync {
    /// A frame was decoded
    fn on_frame(&self, frame: RasterFrame);

    /// Periodic metrics report
    fn on_metrics(&self, _metrics: PipelineMetrics) {}
}

/// What happened to one frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Decoded and forwarded to the sink
    Rendered,
    /// Decode failed; counted and dropped
    Dropped {
        /// Consecutive failures so far
        consecutive: u32,
        /// What kind of problem the frame had
        category: ErrorCategory,
    },
    /// Consecutive failures reached the configured threshold
    SustainedFailure {
        /// Consecutive failures so far
        consecutive: u32,
        /// Last decode error
        last_error: String,
    },
}

/// Decodes frames and forwards them to a sink
pub struct FramePipeline {
    config: PipelineConfig,
    sink: Arc<dyn FrameSink>,
    frames_received: u64,
    decode_errors: u64,
    consecutive_failures: u32,
    window: VecDeque<Instant>,
    last_report: Option<Instant>,
}

impl std::fmt::Debug for FramePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePipeline")
            .field("config", &self.config)
            .field("frames_received", &self.frames_received)
            .field("decode_errors", &self.decode_errors)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

impl FramePipeline {
    /// Create a pipeline that forwards to `sink`
    pub fn new(config: PipelineConfig, sink: Arc<dyn FrameSink>) -> Self {
        Self {
            config,
            sink,
            frames_received: 0,
            decode_errors: 0,
            consecutive_failures: 0,
            window: VecDeque::new(),
            last_report: None,
        }
    }

    /// Decode one encoded image into an RGBA raster
    pub fn decode(payload: &[u8], sequence: u64) -> MediaResult<RasterFrame> {
        if payload.is_empty() {
            return Err(MediaError::EmptyPayload { sequence });
        }
        let format = image::guess_format(payload).map_err(|e| MediaError::UnsupportedFormat {
            reason: e.to_string(),
        })?;
        let decoded = image::load_from_memory_with_format(payload, format).map_err(|e| {
            MediaError::DecodingFailed {
                format: format!("{:?}", format),
                reason: e.to_string(),
            }
        })?;
        let rgba = decoded.into_rgba8();
        let (width, height) = rgba.dimensions();
        if width == 0 || height == 0 {
            return Err(MediaError::InvalidFrameData { width, height });
        }
        Ok(RasterFrame {
            width,
            height,
            pixels: Bytes::from(rgba.into_raw()),
            sequence,
        })
    }

    /// Decode `frame`, forward it and update counters. The payload is released here.
    pub fn process(&mut self, frame: Frame) -> FrameOutcome {
        let now = Instant::now();
        let outcome = match Self::decode(&frame.payload, frame.sequence) {
            Ok(raster) => {
                self.frames_received += 1;
                self.consecutive_failures = 0;
                self.window.push_back(now);
                self.sink.on_frame(raster);
                FrameOutcome::Rendered
            }
            Err(e) => {
                self.decode_errors += 1;
                self.consecutive_failures += 1;
                let category = e.category();
                debug!(
                    %category,
                    "Frame {} dropped ({} consecutive): {}",
                    frame.sequence, self.consecutive_failures, e
                );
                if self.consecutive_failures >= self.config.decode_failure_threshold {
                    warn!(
                        "{} consecutive frames failed to decode",
                        self.consecutive_failures
                    );
                    FrameOutcome::SustainedFailure {
                        consecutive: self.consecutive_failures,
                        last_error: e.to_string(),
                    }
                } else {
                    FrameOutcome::Dropped {
                        consecutive: self.consecutive_failures,
                        category,
                    }
                }
            }
        };
        drop(frame);

        self.expire(now);
        self.maybe_report(now);
        outcome
    }

    /// Current counters
    pub fn metrics(&self) -> PipelineMetrics {
        PipelineMetrics {
            frames_received: self.frames_received,
            decode_errors: self.decode_errors,
            current_fps: self.window.len() as f64 / self.config.fps_window.as_secs_f64(),
        }
    }

    /// Frame rate as of `now`, dropping samples that left the window
    pub fn current_fps(&mut self) -> f64 {
        self.expire(Instant::now());
        self.metrics().current_fps
    }

    /// Consecutive decode failures so far
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Clear all counters
    pub fn reset(&mut self) {
        self.frames_received = 0;
        self.decode_errors = 0;
        self.consecutive_failures = 0;
        self.window.clear();
        self.last_report = None;
    }

    fn expire(&mut self, now: Instant) {
        while let Some(front) = self.window.front() {
            if now.duration_since(*front) >= self.config.fps_window {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }

    fn maybe_report(&mut self, now: Instant) {
        let due = match self.last_report {
            Some(last) => now.duration_since(last) >= self.config.metrics_interval,
            None => true,
        };
        if due {
            self.last_report = Some(now);
            self.sink.on_metrics(self.metrics());
        }
    }
}
