//! # camlink media
//!
//! Frame decoding and throughput tracking for camlink. Frames arrive as
//! opaque encoded images (JPEG from the push channel, JPEG or PNG stills from
//! the pull endpoint) and leave as RGBA rasters.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod pipeline;

// Re-export main types
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use pipeline::{
    FrameOutcome, FramePipeline, FrameSink, PipelineConfig, PipelineMetrics, RasterFrame,
};
