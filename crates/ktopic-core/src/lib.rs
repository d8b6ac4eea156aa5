//! ktopic core building blocks
//!
//! Shared pieces used by the topic writer and the broker clients:
//!
//! - [`buffer_pool`]: reusable record buffers with guaranteed release
//! - [`compression`]: self-describing payload codecs (Snappy, LZ4)
//! - [`metrics`]: per-topic instruments on top of the `metrics` facade

pub mod buffer_pool;
pub mod compression;
pub mod error;
pub mod metrics;

pub use buffer_pool::{BufferPool, BufferPoolConfig, PoolStatsSnapshot, PooledBuffer, SizeClass};
pub use compression::{compress, decompress, CompressionCodec};
pub use error::{Error, Result};
pub use metrics::{Timer, TopicMetrics};
