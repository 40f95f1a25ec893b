//! # camlink diagnostics
//!
//! Logging setup and a read-only client for the camera host's telemetry.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod logging;
pub mod system_stats;

// Re-export main types
pub use logging::{init_logging, try_init_logging, LoggingError};
pub use system_stats::{
    format_bytes, format_rate, CpuInfo, MemoryInfo, NetworkInfo, StorageInfo, SystemInfo,
    SystemMonitor, SystemStatsClient,
};
