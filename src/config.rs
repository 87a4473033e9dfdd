//! Connection behavior configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol;

/// Configuration for connection behavior.
///
/// The defaults match the cube's stock firmware; the UUIDs only need
/// overriding for protocol experiments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Maximum connect attempts per `connect` call
    #[serde(default = "default_max_retries")]
    pub max_connect_retries: u32,
    /// Delay between connect attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Transport open timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Settle delay after tearing down a link, in milliseconds
    #[serde(default = "default_cleanup_delay_ms")]
    pub cleanup_delay_ms: u64,
    /// GetState debounce window in milliseconds
    #[serde(default = "default_state_debounce_ms")]
    pub state_debounce_ms: u64,
    /// How long `get_battery_level` waits for a reply, in milliseconds
    #[serde(default = "default_battery_wait_ms")]
    pub battery_wait_ms: u64,
    /// Poll interval while waiting for a battery reply, in milliseconds
    #[serde(default = "default_battery_poll_ms")]
    pub battery_poll_ms: u64,
    /// Primary service UUID
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    /// Write characteristic UUID
    #[serde(default = "default_write_uuid")]
    pub write_char_uuid: String,
    /// Notify characteristic UUID
    #[serde(default = "default_notify_uuid")]
    pub notify_char_uuid: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_connect_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            cleanup_delay_ms: default_cleanup_delay_ms(),
            state_debounce_ms: default_state_debounce_ms(),
            battery_wait_ms: default_battery_wait_ms(),
            battery_poll_ms: default_battery_poll_ms(),
            service_uuid: default_service_uuid(),
            write_char_uuid: default_write_uuid(),
            notify_char_uuid: default_notify_uuid(),
        }
    }
}

impl ConnectionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }

    pub fn state_debounce(&self) -> Duration {
        Duration::from_millis(self.state_debounce_ms)
    }

    pub fn battery_wait(&self) -> Duration {
        Duration::from_millis(self.battery_wait_ms)
    }

    pub fn battery_poll(&self) -> Duration {
        Duration::from_millis(self.battery_poll_ms)
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_connect_timeout_secs() -> u64 {
    20
}
fn default_cleanup_delay_ms() -> u64 {
    1000
}
fn default_state_debounce_ms() -> u64 {
    500
}
fn default_battery_wait_ms() -> u64 {
    1000
}
fn default_battery_poll_ms() -> u64 {
    100
}
fn default_service_uuid() -> String {
    protocol::PRIMARY_SERVICE_UUID.to_string()
}
fn default_write_uuid() -> String {
    protocol::WRITE_CHAR_UUID.to_string()
}
fn default_notify_uuid() -> String {
    protocol::NOTIFY_CHAR_UUID.to_string()
}
