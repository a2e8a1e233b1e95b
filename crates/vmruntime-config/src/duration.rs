//! Serde support for durations written as `"60s"`, `"500ms"`, `"5m"` or `"1h"`.
//!
//! Use with `#[serde(with = "crate::duration")]`.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serializes a duration in whole seconds, or milliseconds when it has a
/// sub-second part.
pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = if duration.subsec_millis() == 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    };
    serializer.serialize_str(&s)
}

/// Deserializes a duration string.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse_duration(&s).map_err(serde::de::Error::custom)
}

/// Parses a duration string such as `"60s"` or `"500ms"`. A bare number is
/// taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration: {s:?}");

    if let Some(n) = s.strip_suffix("ms") {
        let n: u64 = n.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_millis(n))
    } else if let Some(n) = s.strip_suffix('s') {
        let n: u64 = n.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(n))
    } else if let Some(n) = s.strip_suffix('m') {
        let n: u64 = n.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(n * 60))
    } else if let Some(n) = s.strip_suffix('h') {
        let n: u64 = n.trim().parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(n * 3600))
    } else {
        let n: u64 = s.parse().map_err(|_| invalid())?;
        Ok(Duration::from_secs(n))
    }
}
