//! Writer configuration

use ktopic_core::{BufferPoolConfig, CompressionCodec};
use ktopic_protocol::Acks;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::broker::ConnectOptions;
use crate::error::{Error, Result};

/// Maximum topic name length
pub const MAX_TOPIC_NAME_LENGTH: usize = 249;

static TOPIC_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9._-]*$").unwrap());

/// Default number of delivery workers
const DEFAULT_WORKERS: usize = 4;
/// Default queue slack on top of one slot per worker
const DEFAULT_QUEUE_SIZE: usize = 1000;
/// Default bound on `close()`
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Configuration
// ============================================================================

/// Topic writer configuration
///
/// Admission queue capacity is `workers + queue_size`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Topic every record is written to
    pub topic: String,
    /// Delivery workers, each owning one broker connection
    pub workers: usize,
    /// Queue slack beyond one slot per worker
    pub queue_size: usize,
    /// Options handed to the broker connector
    #[serde(flatten)]
    pub connection: ConnectOptions,
    /// Bound on one broker send; `None` waits indefinitely
    #[serde(with = "humantime_serde")]
    pub send_timeout: Option<Duration>,
    /// Bound on draining the queue in `close()`
    #[serde(with = "humantime_serde")]
    pub drain_timeout: Duration,
    /// Record buffer pool used when none is injected
    pub buffer_pool: BufferPoolConfig,
    /// Register per-topic instruments with the `metrics` facade
    pub enable_metrics: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            workers: DEFAULT_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            connection: ConnectOptions::default(),
            send_timeout: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            buffer_pool: BufferPoolConfig::default(),
            enable_metrics: true,
        }
    }
}

impl WriterConfig {
    /// Create a new builder
    pub fn builder() -> WriterConfigBuilder {
        WriterConfigBuilder::default()
    }

    /// Single worker: records reach the broker in write order
    pub fn ordered(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            workers: 1,
            ..Default::default()
        }
    }

    /// Many workers, a deep queue and a warm buffer pool
    pub fn high_throughput(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            workers: 16,
            queue_size: 10_000,
            buffer_pool: BufferPoolConfig::high_throughput(),
            connection: ConnectOptions {
                compression: CompressionCodec::Lz4,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Total admission queue capacity
    pub fn capacity(&self) -> usize {
        self.workers.saturating_add(self.queue_size)
    }

    /// Check the configuration before any connection is dialed
    pub fn validate(&self) -> Result<()> {
        validate_topic_name(&self.topic)?;

        if self.workers == 0 {
            return Err(Error::ConfigError(
                "at least one delivery worker is required".to_string(),
            ));
        }
        if self.connection.brokers.is_empty() {
            return Err(Error::ConfigError("no brokers configured".to_string()));
        }
        if self.capacity() > Semaphore::MAX_PERMITS {
            return Err(Error::ConfigError(format!(
                "queue capacity {} exceeds the maximum of {}",
                self.capacity(),
                Semaphore::MAX_PERMITS
            )));
        }
        if self.send_timeout == Some(Duration::ZERO) {
            return Err(Error::ConfigError(
                "send_timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Validate a topic name: alphanumeric start, then `[a-zA-Z0-9._-]`
pub fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::ConfigError("topic name cannot be empty".to_string()));
    }
    if name.len() > MAX_TOPIC_NAME_LENGTH {
        return Err(Error::ConfigError(format!(
            "topic name exceeds {} characters",
            MAX_TOPIC_NAME_LENGTH
        )));
    }
    if !TOPIC_NAME_REGEX.is_match(name) {
        return Err(Error::ConfigError(format!(
            "invalid topic name '{}': must start with an alphanumeric character and contain only [a-zA-Z0-9._-]",
            name
        )));
    }
    Ok(())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for WriterConfig
#[derive(Default)]
pub struct WriterConfigBuilder {
    config: WriterConfig,
}

impl WriterConfigBuilder {
    /// Set the topic
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.config.topic = topic.into();
        self
    }

    /// Set broker addresses
    pub fn brokers(mut self, brokers: Vec<String>) -> Self {
        self.config.connection.brokers = brokers;
        self
    }

    /// Set the number of delivery workers
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the queue slack
    pub fn queue_size(mut self, queue_size: usize) -> Self {
        self.config.queue_size = queue_size;
        self
    }

    /// Set acknowledgment level
    pub fn acks(mut self, acks: Acks) -> Self {
        self.config.connection.acks = acks;
        self
    }

    /// Set the broker client retry limit
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.connection.retries = retries;
        self
    }

    /// Set payload compression
    pub fn compression(mut self, codec: CompressionCodec) -> Self {
        self.config.connection.compression = codec;
        self
    }

    /// Set the dial timeout
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.connection_timeout = timeout;
        self
    }

    /// Set the per-request timeout of the broker client
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection.request_timeout = timeout;
        self
    }

    /// Bound each broker send
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = Some(timeout);
        self
    }

    /// Bound `close()`
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Set the buffer pool configuration
    pub fn buffer_pool(mut self, pool: BufferPoolConfig) -> Self {
        self.config.buffer_pool = pool;
        self
    }

    /// Enable or disable metrics registration
    pub fn enable_metrics(mut self, enable: bool) -> Self {
        self.config.enable_metrics = enable;
        self
    }

    /// Build the configuration
    pub fn build(self) -> WriterConfig {
        self.config
    }
}
