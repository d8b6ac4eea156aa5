//! Broker collaborator seam
//!
//! The writer never talks to the network itself. Each delivery worker owns
//! one [`BrokerProducer`] obtained from a [`BrokerConnector`]; wire format,
//! compression, acknowledgment level and retry policy live behind these
//! traits.

use async_trait::async_trait;
use ktopic_core::CompressionCodec;
use ktopic_protocol::Acks;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Per-connection options passed through to the broker client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// Broker addresses (host:port), tried in order
    pub brokers: Vec<String>,
    /// Acknowledgment level for publishes
    pub acks: Acks,
    /// Retries on transient errors before a send gives up
    pub retries: u32,
    /// Initial backoff between retries, doubled per attempt
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Payload compression codec
    pub compression: CompressionCodec,
    /// Dial timeout per broker address
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
    /// Timeout for one request/response exchange
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            acks: Acks::Leader,
            retries: 3,
            retry_backoff: Duration::from_millis(100),
            compression: CompressionCodec::Snappy,
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Dials producer handles
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Open one producer handle. Called once per delivery worker.
    async fn connect(&self, options: &ConnectOptions) -> Result<Box<dyn BrokerProducer>>;
}

/// One exclusively owned broker connection
#[async_trait]
pub trait BrokerProducer: Send {
    /// Append `payload` to `topic`/`partition`
    async fn send(&mut self, topic: &str, partition: u32, payload: &[u8]) -> Result<()>;

    /// Current number of partitions of `topic`
    async fn partition_count(&mut self, topic: &str) -> Result<u32>;

    /// Release the connection
    async fn close(&mut self) -> Result<()>;
}
