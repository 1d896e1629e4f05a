//! Provisioning timing and provider retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::{DriverSettings, RetryPolicy};

/// Polling and timeout settings for a launch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvisioningConfig {
    /// Seconds between provider polls for one node.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Seconds a node may take to become ready.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
    /// Seconds the whole launch may take.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Worker count when `launch` is given none.
    #[serde(default = "default_workers")]
    pub default_workers: usize,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_node_timeout_secs() -> u64 {
    600 // 10 minutes
}

fn default_session_timeout_secs() -> u64 {
    1200 // 20 minutes
}

fn default_workers() -> usize {
    1
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            node_timeout_secs: default_node_timeout_secs(),
            session_timeout_secs: default_session_timeout_secs(),
            default_workers: default_workers(),
        }
    }
}

impl ProvisioningConfig {
    #[must_use]
    pub fn driver_settings(&self) -> DriverSettings {
        DriverSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            node_timeout: Duration::from_secs(self.node_timeout_secs),
        }
    }

    #[must_use]
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }
}

/// Backoff for transient provider errors.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Total attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_attempts: self.max_attempts,
        }
    }
}
