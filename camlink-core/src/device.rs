//! Data model shared by the service client, transports and the controller

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// A width/height pair supported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    /// Create a resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.width, self.height)
    }
}

/// A camera device as listed by the service. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Device path or id, e.g. `/dev/video0`
    #[serde(alias = "path")]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Supported resolutions per format name, in service order
    #[serde(default, with = "format_list")]
    pub formats: Vec<(String, Vec<Resolution>)>,
}

impl CameraDevice {
    /// Create a device with no formats
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            formats: Vec::new(),
        }
    }

    /// Add a format with its resolutions, replacing an earlier entry of the same name
    pub fn with_format(mut self, format: impl Into<String>, resolutions: Vec<Resolution>) -> Self {
        format_list::upsert(&mut self.formats, format.into(), resolutions);
        self
    }

    /// Format names in listing order
    pub fn format_names(&self) -> impl Iterator<Item = &str> {
        self.formats.iter().map(|(name, _)| name.as_str())
    }

    /// Whether the device lists `format`
    pub fn has_format(&self, format: &str) -> bool {
        self.formats.iter().any(|(name, _)| name == format)
    }

    /// Resolutions for `format`, empty if unsupported
    pub fn resolutions(&self, format: &str) -> &[Resolution] {
        self.formats
            .iter()
            .find(|(name, _)| name == format)
            .map(|(_, resolutions)| resolutions.as_slice())
            .unwrap_or(&[])
    }
}

/// The `formats` object as an ordered list of entries
mod format_list {
    use super::Resolution;
    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};
    use std::fmt;

    type Entries = Vec<(String, Vec<Resolution>)>;

    pub(super) fn upsert(entries: &mut Entries, format: String, resolutions: Vec<Resolution>) {
        match entries.iter_mut().find(|(name, _)| *name == format) {
            Some(entry) => entry.1 = resolutions,
            None => entries.push((format, resolutions)),
        }
    }

    pub fn serialize<S: Serializer>(
        entries: &[(String, Vec<Resolution>)],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(entries.len()))?;
        for (format, resolutions) in entries {
            map.serialize_entry(format, resolutions)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Entries, D::Error> {
        d.deserialize_map(EntriesVisitor)
    }

    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Entries;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of format name to resolutions")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Entries, A::Error> {
            let mut entries = Entries::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((format, resolutions)) = access.next_entry()? {
                upsert(&mut entries, format, resolutions);
            }
            Ok(entries)
        }
    }
}

/// Parameters the caller chose for a stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamParameters {
    /// Pixel format name, e.g. `MJPG`
    pub format: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Target frame rate
    pub fps: u32,
}

impl StreamParameters {
    /// Create stream parameters
    pub fn new(format: impl Into<String>, width: u32, height: u32, fps: u32) -> Self {
        Self {
            format: format.into(),
            width,
            height,
            fps,
        }
    }

    /// Requested resolution
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Server reported connection snapshot. Never authoritative over session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Whether the server considers a stream connected
    #[serde(default)]
    pub is_connected: bool,
    /// Client id the server associates with the stream
    #[serde(default)]
    pub client_id: Option<String>,
    /// Negotiated width
    #[serde(default)]
    pub width: Option<u32>,
    /// Negotiated height
    #[serde(default)]
    pub height: Option<u32>,
    /// Negotiated frame rate
    #[serde(default)]
    pub fps: Option<f64>,
}

/// Recording request options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingOptions {
    /// Container format
    pub format: String,
    /// Encoder name understood by the service
    pub encoder: String,
    /// Target bitrate in bits per second
    pub bitrate: u64,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            encoder: "h264_rkmpp".to_string(),
            bitrate: 4_000_000,
        }
    }
}

/// Result of a still capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Identifier of the stored still
    pub artifact: String,
}

/// Result of stopping a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingArtifact {
    /// Path of the stored recording
    pub path: String,
}

/// One undecoded frame as delivered by a transport
#[derive(Debug, Clone)]
pub struct Frame {
    /// Opaque encoded image
    pub payload: Bytes,
    /// Sequence number assigned by the transport, starting at 1
    pub sequence: u64,
    /// Arrival time
    pub received_at: Instant,
}

impl Frame {
    /// Create a frame stamped with the current time
    pub fn new(payload: Bytes, sequence: u64) -> Self {
        Self {
            payload,
            sequence,
            received_at: Instant::now(),
        }
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
