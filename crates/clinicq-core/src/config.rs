//! Configuration for the flow components.

use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Flow configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Length of one PIN attempt window. A failed attempt reopens the window.
    #[serde(default = "default_pin_attempt_timeout")]
    pub pin_attempt_timeout_secs: u64,

    /// Backoff for the idempotent admission and chain-advance writes.
    #[serde(default)]
    pub queue_write_retry: RetryPolicy,

    /// Attempts for optimistic read-modify-write transitions.
    #[serde(default = "default_cas_max_attempts")]
    pub cas_max_attempts: u32,

    /// Capacity of the in-process notification broadcast.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Upper bound on one notification sink delivery.
    #[serde(default = "default_notify_delivery_timeout")]
    pub notify_delivery_timeout_ms: u64,
}

impl FlowConfig {
    pub fn pin_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.pin_attempt_timeout_secs)
    }

    pub fn notify_delivery_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_delivery_timeout_ms.max(1))
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pin_attempt_timeout_secs: default_pin_attempt_timeout(),
            queue_write_retry: RetryPolicy::default(),
            cas_max_attempts: default_cas_max_attempts(),
            event_channel_capacity: default_event_channel_capacity(),
            notify_delivery_timeout_ms: default_notify_delivery_timeout(),
        }
    }
}

fn default_pin_attempt_timeout() -> u64 {
    15
}

fn default_cas_max_attempts() -> u32 {
    16
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_notify_delivery_timeout() -> u64 {
    2_000
}
