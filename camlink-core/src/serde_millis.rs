//! Serde helpers that store a [`Duration`] as whole milliseconds
//!
//! Use with `#[serde(with = "camlink_core::serde_millis")]`, or
//! `serde_millis::option` for `Option<Duration>` fields.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

/// Write `d` as a millisecond count
pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Read a millisecond count
pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
}

/// Same encoding for optional durations; `None` is `null`
pub mod option {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Write `d` as a millisecond count or `null`
    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    /// Read a millisecond count or `null`
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
