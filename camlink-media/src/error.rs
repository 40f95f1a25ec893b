//! Media processing error types and handling

use camlink_core::CamLinkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Main error type for frame decoding
#[derive(Error, Debug)]
pub enum MediaError {
    /// Frame carried no bytes
    #[error("Empty frame payload (sequence {sequence})")]
    EmptyPayload {
        /// Sequence number of the frame
        sequence: u64,
    },

    /// Payload is not in a known image format
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat {
        /// What the sniffer reported
        reason: String,
    },

    /// Decoding operation failed
    #[error("{format} decoder rejected frame: {reason}")]
    DecodingFailed {
        /// Detected image format
        format: String,
        /// Failure reason
        reason: String,
    },

    /// Decoded image has zero area
    #[error("Invalid frame data: decoded image is {width}x{height}")]
    InvalidFrameData {
        /// Decoded width
        width: u32,
        /// Decoded height
        height: u32,
    },

    /// Invalid configuration provided
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Get error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::EmptyPayload { .. } | MediaError::InvalidFrameData { .. } => {
                ErrorCategory::Data
            }
            MediaError::UnsupportedFormat { .. } => ErrorCategory::Format,
            MediaError::DecodingFailed { .. } => ErrorCategory::Codec,
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration and parameter errors
    Configuration,
    /// Codec-related errors
    Codec,
    /// Format and data structure errors
    Format,
    /// Data validation errors
    Data,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Codec => "codec",
            ErrorCategory::Format => "format",
            ErrorCategory::Data => "data",
        };
        f.write_str(name)
    }
}

impl From<MediaError> for CamLinkError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::InvalidConfiguration { message } => CamLinkError::Configuration {
                field: "pipeline".to_string(),
                reason: message,
            },
            other => CamLinkError::DecodeFailed {
                reason: other.to_string(),
            },
        }
    }
}
