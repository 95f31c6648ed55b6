use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timing::TimingConfig;

/// Retry and circuit-breaker settings for a [`ProtocolEngine`](crate::ProtocolEngine).
///
/// Deserializes from JSON with every field optional; durations are in
/// milliseconds:
///
/// ```json
/// { "read_retry_count": 2, "timing": { "resync_ms": 500 } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Attempts per `read` call. Default: 4.
    pub read_retry_count: u32,
    /// Attempts per `write` call. Default: 4.
    pub write_retry_count: u32,
    /// Pause before a read retry. Default: 20ms.
    #[serde(rename = "read_retry_interval_ms", with = "millis")]
    pub read_retry_interval: Duration,
    /// Pause before a write retry. Default: 20ms.
    #[serde(rename = "write_retry_interval_ms", with = "millis")]
    pub write_retry_interval: Duration,
    /// A direction's consecutive failed attempts beyond this trip the
    /// circuit breaker. Default: 5.
    pub max_sequential_errors: u32,
    pub timing: TimingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            read_retry_count: 4,
            write_retry_count: 4,
            read_retry_interval: Duration::from_millis(20),
            write_retry_interval: Duration::from_millis(20),
            max_sequential_errors: 5,
            timing: TimingConfig::default(),
        }
    }
}

/// `Duration` as an integer count of milliseconds.
pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.read_retry_count, 4);
        assert_eq!(config.write_retry_count, 4);
        assert_eq!(config.read_retry_interval, Duration::from_millis(20));
        assert_eq!(config.max_sequential_errors, 5);
    }

    #[test]
    fn partial_json_overrides_keep_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{ "read_retry_count": 2, "write_retry_interval_ms": 5, "timing": { "resync_ms": 250 } }"#,
        )
        .expect("config should parse");
        assert_eq!(config.read_retry_count, 2);
        assert_eq!(config.write_retry_count, 4);
        assert_eq!(config.write_retry_interval, Duration::from_millis(5));
        assert_eq!(config.timing.resync, Duration::from_millis(250));
        assert_eq!(config.timing.inter_byte, Duration::from_millis(10));
    }

    #[test]
    fn serializes_durations_as_millis() {
        let json = serde_json::to_value(EngineConfig::default()).expect("config should serialize");
        assert_eq!(json["read_retry_interval_ms"], 20);
        assert_eq!(json["timing"]["max_timeout_ms"], 100);
    }
}
