//! ktopic client
//!
//! An in-process asynchronous topic writer. Callers hand records to
//! [`Writer::write`], which never waits for the network: records are copied
//! into pooled buffers and admitted into a bounded queue, or rejected with
//! [`Error::Dropped`] when the queue is full. A pool of delivery workers,
//! each owning one broker connection, drains the queue and sends every
//! record to a randomly chosen partition.
//!
//! Broker access goes through the [`BrokerConnector`]/[`BrokerProducer`]
//! traits. [`TcpConnector`] talks to a broker over the `ktopic-protocol`
//! wire format; [`MemoryBroker`] keeps topics in process for tests.

pub mod broker;
pub mod config;
pub mod error;
pub mod memory;
pub mod partitioner;
pub mod tcp;
mod worker;
pub mod writer;

pub use broker::{BrokerConnector, BrokerProducer, ConnectOptions};
pub use config::{validate_topic_name, WriterConfig, WriterConfigBuilder};
pub use error::{DeliveryError, Error, Result};
pub use memory::MemoryBroker;
pub use partitioner::select_partition;
pub use tcp::{TcpConnector, TcpProducer};
pub use writer::{ErrorHandler, Writer, WriterStatsSnapshot};

pub use ktopic_core::{BufferPool, BufferPoolConfig, CompressionCodec};
pub use ktopic_protocol::Acks;
