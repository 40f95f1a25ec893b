//! Push channel protocol messages

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Control messages sent by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Begin pushing frames for a device
    StartCamera {
        /// Device id
        camera_id: String,
    },
    /// Stop pushing frames
    StopCamera,
    /// Ask the server for a status message
    GetStatus,
}

/// Text messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent after the connection opens
    Welcome {
        /// Id the server assigned to this client
        #[serde(default)]
        client_id: Option<String>,
        /// Greeting text
        #[serde(default)]
        message: Option<String>,
    },
    /// A control message was accepted
    Success {
        /// Detail
        #[serde(default)]
        message: Option<String>,
    },
    /// A control message was rejected
    Error {
        /// Detail
        #[serde(default)]
        message: Option<String>,
    },
    /// Informational notice
    Info {
        /// Detail
        #[serde(default)]
        message: Option<String>,
    },
    /// Streaming status report
    Status {
        /// Connected clients
        #[serde(default)]
        client_count: Option<u32>,
        /// Frames pushed so far
        #[serde(default)]
        frame_count: Option<u64>,
        /// Whether the server is recording
        #[serde(default)]
        is_recording: Option<bool>,
    },
}

impl ServerMessage {
    /// Get the message type as a string
    pub fn message_type(&self) -> &'static str {
        match self {
            ServerMessage::Welcome { .. } => "welcome",
            ServerMessage::Success { .. } => "success",
            ServerMessage::Error { .. } => "error",
            ServerMessage::Info { .. } => "info",
            ServerMessage::Status { .. } => "status",
        }
    }

    /// Check if this is an error report
    pub fn is_error(&self) -> bool {
        matches!(self, ServerMessage::Error { .. })
    }

    /// Human readable detail, if the message carries one
    pub fn detail(&self) -> Option<&str> {
        match self {
            ServerMessage::Welcome { message, .. }
            | ServerMessage::Success { message }
            | ServerMessage::Error { message }
            | ServerMessage::Info { message } => message.as_deref(),
            ServerMessage::Status { .. } => None,
        }
    }
}

/// One incoming push channel payload after demultiplexing
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// Binary payload: one encoded image
    Frame(Bytes),
    /// Structured server message
    Control(ServerMessage),
    /// Text that is not a known server message
    Unrecognized(String),
}

impl PushMessage {
    /// Classify a binary payload
    pub fn from_binary(payload: impl Into<Bytes>) -> Self {
        PushMessage::Frame(payload.into())
    }

    /// Classify a text payload
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => PushMessage::Control(msg),
            Err(e) => {
                debug!("Discarding unrecognized push message: {} ({})", text, e);
                PushMessage::Unrecognized(text.to_string())
            }
        }
    }
}
