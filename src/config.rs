//! # Configuration
//!
//! Serde-backed configuration for the runtime: mailbox capacities, batch
//! sizes, overflow policies and lifecycle timeouts. Every field has a default
//! so a `SystemConfig::default()` runs out of the box; `from_file` loads the
//! same shape from JSON.

use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::service::mailbox::OverflowPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub event: EventManagerConfig,

    #[serde(default)]
    pub service: ServiceConfig,

    /// Per-queue budget for the final drain at shutdown.
    #[serde(default = "default_shutdown_timeout", with = "duration_ms")]
    pub shutdown_timeout: Duration,

    /// Age threshold a sweeper should use for stale callback entries.
    #[serde(default = "default_callback_timeout", with = "duration_ms")]
    pub callback_timeout: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            event: EventManagerConfig::default(),
            service: ServiceConfig::default(),
            shutdown_timeout: default_shutdown_timeout(),
            callback_timeout: default_callback_timeout(),
        }
    }
}

impl SystemConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)?;
        Ok(config)
    }
}

/// Sizing of the event manager's own service queue and proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventManagerConfig {
    /// The manager's mailbox bound; sized for publish bursts.
    #[serde(default = "default_event_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Messages drained per consumer-loop pass.
    #[serde(default = "default_event_batch_size")]
    pub batch_size: usize,

    /// Proxy buffer size that triggers an automatic flush.
    #[serde(default = "default_proxy_batch_size")]
    pub proxy_batch_size: usize,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
}

impl Default for EventManagerConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_event_mailbox_capacity(),
            batch_size: default_event_batch_size(),
            proxy_batch_size: default_proxy_batch_size(),
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// Defaults applied to service queues built without explicit overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Mailbox bound; `None` means unbounded.
    #[serde(default = "default_service_mailbox_capacity")]
    pub mailbox_capacity: Option<usize>,

    #[serde(default)]
    pub overflow_policy: OverflowPolicy,

    /// Messages drained per consumer-loop pass.
    #[serde(default = "default_service_batch_size")]
    pub batch_size: usize,

    /// Proxy buffer size that triggers an automatic flush.
    #[serde(default = "default_proxy_batch_size")]
    pub proxy_batch_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_service_mailbox_capacity(),
            overflow_policy: OverflowPolicy::default(),
            batch_size: default_service_batch_size(),
            proxy_batch_size: default_proxy_batch_size(),
        }
    }
}

fn default_event_mailbox_capacity() -> usize {
    100_000
}

fn default_event_batch_size() -> usize {
    1_000
}

fn default_proxy_batch_size() -> usize {
    1_024
}

fn default_service_mailbox_capacity() -> Option<usize> {
    Some(8_192)
}

fn default_service_batch_size() -> usize {
    64
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_callback_timeout() -> Duration {
    Duration::from_secs(30)
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
