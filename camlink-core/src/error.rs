//! Error types for camlink

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for camlink operations
#[derive(Error, Debug)]
pub enum CamLinkError {
    /// The remote service answered with a failure, or the request never completed
    #[error("Request failed during {operation}: {reason}")]
    RequestFailed {
        /// Operation that issued the request
        operation: String,
        /// Reason reported by the service or the HTTP layer
        reason: String,
    },

    /// No confirmation arrived within the allowed window
    #[error("Operation timed out: {operation} after {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// A single frame could not be decoded
    #[error("Decoding failed: {reason}")]
    DecodeFailed {
        /// Reason for failure
        reason: String,
    },

    /// The stream is gone: the transport dropped or the server persistently disagrees
    #[error("Stream lost: {reason}")]
    StreamLost {
        /// What was observed
        reason: String,
    },

    /// Operation is not legal in the current session state
    #[error("Invalid transition: {operation} is not allowed while {state}")]
    InvalidTransition {
        /// Operation that was rejected
        operation: String,
        /// State the session was in
        state: String,
    },

    /// The retry policy bound was reached
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Number of attempts made, including the first
        attempts: u32,
        /// Last failure observed
        last_error: String,
    },

    /// A pending attempt was cancelled by a newer lifecycle call
    #[error("Operation cancelled: {operation}")]
    Cancelled {
        /// Operation that was cancelled
        operation: String,
    },

    /// Invalid client configuration
    #[error("Invalid configuration for {field}: {reason}")]
    Configuration {
        /// Configuration field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// Invalid message format on the push channel
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CamLinkError {
    /// Shorthand for a [`CamLinkError::RequestFailed`]
    pub fn request_failed(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        CamLinkError::RequestFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Stable kind used by presentation sinks and logs
    pub fn kind(&self) -> ErrorKind {
        match self {
            CamLinkError::RequestFailed { .. } => ErrorKind::RequestFailed,
            CamLinkError::Timeout { .. } => ErrorKind::Timeout,
            CamLinkError::DecodeFailed { .. } => ErrorKind::DecodeFailed,
            CamLinkError::StreamLost { .. } => ErrorKind::StreamLost,
            CamLinkError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CamLinkError::RetryExhausted { .. } => ErrorKind::RetryExhausted,
            CamLinkError::Cancelled { .. } => ErrorKind::Cancelled,
            CamLinkError::Configuration { .. } => ErrorKind::Configuration,
            CamLinkError::InvalidMessage { .. } => ErrorKind::InvalidMessage,
        }
    }

    /// Get error code for programmatic handling
    pub fn error_code(&self) -> String {
        self.kind().code().to_string()
    }

    /// Whether this error ends the current session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CamLinkError::RetryExhausted { .. } | CamLinkError::StreamLost { .. }
        )
    }

    /// Snapshot of this error that can be stored and cloned
    pub fn diagnostic(&self) -> Diagnostic {
        Diagnostic {
            kind: self.kind(),
            message: self.to_string(),
        }
    }

    /// Rebuild an owned error that carries the same kind and text.
    ///
    /// Used where an error must be both reported and returned.
    pub fn duplicate(&self) -> Self {
        match self {
            CamLinkError::RequestFailed { operation, reason } => CamLinkError::RequestFailed {
                operation: operation.clone(),
                reason: reason.clone(),
            },
            CamLinkError::Timeout {
                operation,
                duration,
            } => CamLinkError::Timeout {
                operation: operation.clone(),
                duration: *duration,
            },
            CamLinkError::DecodeFailed { reason } => CamLinkError::DecodeFailed {
                reason: reason.clone(),
            },
            CamLinkError::StreamLost { reason } => CamLinkError::StreamLost {
                reason: reason.clone(),
            },
            CamLinkError::InvalidTransition { operation, state } => {
                CamLinkError::InvalidTransition {
                    operation: operation.clone(),
                    state: state.clone(),
                }
            }
            CamLinkError::RetryExhausted {
                attempts,
                last_error,
            } => CamLinkError::RetryExhausted {
                attempts: *attempts,
                last_error: last_error.clone(),
            },
            CamLinkError::Cancelled { operation } => CamLinkError::Cancelled {
                operation: operation.clone(),
            },
            CamLinkError::Configuration { field, reason } => CamLinkError::Configuration {
                field: field.clone(),
                reason: reason.clone(),
            },
            CamLinkError::InvalidMessage { message, source } => CamLinkError::InvalidMessage {
                message: message.clone(),
                source: source.to_string().into(),
            },
        }
    }
}

/// Stable error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Service call failed
    RequestFailed,
    /// No confirmation within bound
    Timeout,
    /// Single bad frame
    DecodeFailed,
    /// Stream is gone
    StreamLost,
    /// Illegal call for the current state
    InvalidTransition,
    /// Retry bound reached
    RetryExhausted,
    /// Superseded by a newer call
    Cancelled,
    /// Bad configuration
    Configuration,
    /// Unparsable push message
    InvalidMessage,
}

impl ErrorKind {
    /// SCREAMING_SNAKE code for the kind
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::RequestFailed => "REQUEST_FAILED",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::DecodeFailed => "DECODE_FAILED",
            ErrorKind::StreamLost => "STREAM_LOST",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::RetryExhausted => "RETRY_EXHAUSTED",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Configuration => "CONFIGURATION",
            ErrorKind::InvalidMessage => "INVALID_MESSAGE",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Stored description of a failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Error kind
    pub kind: ErrorKind,
    /// Human readable detail
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}
