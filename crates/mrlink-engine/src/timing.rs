//! Timeout budgets for reading responses.
//!
//! Controllers may pause up to the inter-byte timeout between consecutive
//! bytes and should answer a request within ~50ms. The host additionally
//! allows for USB hub latency and for the process being descheduled for tens
//! of milliseconds at any moment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::millis;

/// Timing constants for the response state machine. Durations serialize as
/// `<name>_ms` integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Longest gap the controller may leave between bytes. Default: 10ms.
    #[serde(rename = "inter_byte_ms", with = "millis")]
    pub inter_byte: Duration,
    /// Per-hop USB hub latency. Default: 2ms.
    #[serde(rename = "usb_hub_latency_ms", with = "millis")]
    pub usb_hub_latency: Duration,
    /// Time the controller has to start answering, before hub latency. Default: 50ms.
    #[serde(rename = "response_window_ms", with = "millis")]
    pub response_window: Duration,
    /// Allowance for the host stalling mid-read. Default: 40ms.
    #[serde(rename = "scheduler_stall_ms", with = "millis")]
    pub scheduler_stall: Duration,
    /// Window for finding a response while resynchronizing. Default: 1000ms.
    #[serde(rename = "resync_ms", with = "millis")]
    pub resync: Duration,
    /// Settle delay after the controller rejects a request. Default: 40ms.
    #[serde(rename = "failure_wait_ms", with = "millis")]
    pub failure_wait: Duration,
    /// Settle delay after a mismatched response or timeout. Default: 100ms.
    #[serde(rename = "comm_error_wait_ms", with = "millis")]
    pub comm_error_wait: Duration,
    /// Cap on any single read timeout. Default: 100ms.
    #[serde(rename = "max_timeout_ms", with = "millis")]
    pub max_timeout: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inter_byte: Duration::from_millis(10),
            usb_hub_latency: Duration::from_millis(2),
            response_window: Duration::from_millis(50),
            scheduler_stall: Duration::from_millis(40),
            resync: Duration::from_millis(1000),
            failure_wait: Duration::from_millis(40),
            comm_error_wait: Duration::from_millis(100),
            max_timeout: Duration::from_millis(100),
        }
    }
}

impl TimingConfig {
    /// Extra budget for the first bytes of a response: the response window
    /// plus a hub round trip. 54ms with defaults.
    pub fn request_response(&self) -> Duration {
        self.response_window + self.usb_hub_latency * 2
    }

    /// Timeout for reading `count` bytes:
    /// `inter_byte * (count + 2) + extra + scheduler_stall`, capped at `max_timeout`.
    pub fn payload_timeout(&self, count: usize, extra: Duration) -> Duration {
        let slots = u32::try_from(count).unwrap_or(u32::MAX).saturating_add(2);
        let budget = self
            .inter_byte
            .saturating_mul(slots)
            .saturating_add(extra)
            .saturating_add(self.scheduler_stall);
        budget.min(self.max_timeout)
    }
}
