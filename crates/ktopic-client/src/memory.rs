//! In-process broker
//!
//! Topics are vectors of partition logs held in memory. Used by tests and
//! demos in place of a network broker, with switches to inject the failures
//! a real broker produces: refused dials, failed sends and metadata queries,
//! slow sends, and a gate that holds every send until released.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::debug;

use crate::broker::{BrokerConnector, BrokerProducer, ConnectOptions};
use crate::error::{Error, Result};

/// In-memory broker. Cloning shares the same topics.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    topics: RwLock<HashMap<String, Vec<Vec<Bytes>>>>,
    default_partitions: u32,
    faults: Faults,
    /// `true` while sends may proceed
    gate: watch::Sender<bool>,
    appended: Notify,
    open_connections: AtomicUsize,
    total_connections: AtomicUsize,
    send_attempts: AtomicU64,
}

#[derive(Default)]
struct Faults {
    refuse_connections: AtomicBool,
    fail_sends: AtomicBool,
    fail_metadata: AtomicBool,
    reported_partitions: RwLock<Option<u32>>,
    send_latency: RwLock<Option<Duration>>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Broker whose auto-created topics have one partition
    pub fn new() -> Self {
        Self::with_default_partitions(1)
    }

    /// Broker whose auto-created topics have `partitions` partitions
    pub fn with_default_partitions(partitions: u32) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                default_partitions: partitions.max(1),
                faults: Faults::default(),
                gate,
                appended: Notify::new(),
                open_connections: AtomicUsize::new(0),
                total_connections: AtomicUsize::new(0),
                send_attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Create (or resize) a topic
    pub fn create_topic(&self, topic: &str, partitions: u32) {
        let mut topics = self.inner.topics.write();
        let logs = topics.entry(topic.to_string()).or_default();
        logs.resize_with(partitions.max(1) as usize, Vec::new);
    }

    // ---- Fault injection ----

    /// Refuse new connections
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.inner
            .faults
            .refuse_connections
            .store(refuse, Ordering::SeqCst);
    }

    /// Fail every send with a server error
    pub fn set_fail_sends(&self, fail: bool) {
        self.inner.faults.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Fail every partition-count query
    pub fn set_fail_metadata(&self, fail: bool) {
        self.inner.faults.fail_metadata.store(fail, Ordering::SeqCst);
    }

    /// Report this partition count instead of the real one
    pub fn set_reported_partitions(&self, count: Option<u32>) {
        *self.inner.faults.reported_partitions.write() = count;
    }

    /// Delay every send
    pub fn set_send_latency(&self, latency: Option<Duration>) {
        *self.inner.faults.send_latency.write() = latency;
    }

    /// Hold every send until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Release held sends
    pub fn resume(&self) {
        self.inner.gate.send_replace(true);
    }

    // ---- Inspection ----

    /// Records stored in one partition, in append order
    pub fn messages(&self, topic: &str, partition: u32) -> Vec<Bytes> {
        self.inner
            .topics
            .read()
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Records of every partition, partition by partition
    pub fn all_messages(&self, topic: &str) -> Vec<Bytes> {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records per partition
    pub fn partition_sizes(&self, topic: &str) -> Vec<usize> {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(|logs| logs.iter().map(Vec::len).collect())
            .unwrap_or_default()
    }

    /// Total records stored for `topic`
    pub fn message_count(&self, topic: &str) -> usize {
        self.partition_sizes(topic).iter().sum()
    }

    /// Wait until `topic` holds at least `count` records
    pub async fn wait_for_messages(&self, topic: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let appended = self.inner.appended.notified();
            if self.message_count(topic) >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return self.message_count(topic) >= count;
            }
        }
    }

    /// Producer handles currently open
    pub fn connections(&self) -> usize {
        self.inner.open_connections.load(Ordering::SeqCst)
    }

    /// Producer handles ever opened
    pub fn total_connections(&self) -> usize {
        self.inner.total_connections.load(Ordering::SeqCst)
    }

    /// Sends received, including failed ones
    pub fn send_attempts(&self) -> u64 {
        self.inner.send_attempts.load(Ordering::SeqCst)
    }
}

impl Inner {
    fn partition_count(&self, topic: &str) -> u32 {
        if let Some(count) = *self.faults.reported_partitions.read() {
            return count;
        }
        let mut topics = self.topics.write();
        let logs = topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.default_partitions).map(|_| Vec::new()).collect()
        });
        logs.len() as u32
    }

    fn append(&self, topic: &str, partition: u32, payload: &[u8]) -> Result<()> {
        let mut topics = self.topics.write();
        let logs = topics.entry(topic.to_string()).or_insert_with(|| {
            (0..self.default_partitions).map(|_| Vec::new()).collect()
        });
        let log = logs.get_mut(partition as usize).ok_or_else(|| {
            Error::ServerError(format!(
                "unknown partition {} for topic '{}'",
                partition, topic
            ))
        })?;
        log.push(Bytes::copy_from_slice(payload));
        drop(topics);

        self.appended.notify_waiters();
        Ok(())
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, _options: &ConnectOptions) -> Result<Box<dyn BrokerProducer>> {
        if self.inner.faults.refuse_connections.load(Ordering::SeqCst) {
            return Err(Error::ConnectionError(
                "memory broker refused the connection".to_string(),
            ));
        }
        let id = self.inner.total_connections.fetch_add(1, Ordering::SeqCst);
        self.inner.open_connections.fetch_add(1, Ordering::SeqCst);
        debug!(connection = id, "memory broker connection opened");

        Ok(Box::new(MemoryProducer {
            broker: Arc::clone(&self.inner),
            gate: self.inner.gate.subscribe(),
            open: true,
        }))
    }
}

struct MemoryProducer {
    broker: Arc<Inner>,
    gate: watch::Receiver<bool>,
    open: bool,
}

impl MemoryProducer {
    fn ensure_open(&self) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(Error::ConnectionError("connection closed".to_string()))
        }
    }

    fn release(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.broker.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    async fn send(&mut self, topic: &str, partition: u32, payload: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.broker.send_attempts.fetch_add(1, Ordering::SeqCst);

        if self.gate.wait_for(|open| *open).await.is_err() {
            return Err(Error::ConnectionError("memory broker shut down".to_string()));
        }

        let latency = *self.broker.faults.send_latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if self.broker.faults.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::ServerError("injected send failure".to_string()));
        }
        self.broker.append(topic, partition, payload)
    }

    async fn partition_count(&mut self, topic: &str) -> Result<u32> {
        self.ensure_open()?;
        if self.broker.faults.fail_metadata.load(Ordering::SeqCst) {
            return Err(Error::ServerError(
                "injected metadata failure".to_string(),
            ));
        }
        Ok(self.broker.partition_count(topic))
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryProducer {
    fn drop(&mut self) {
        self.release();
    }
}
