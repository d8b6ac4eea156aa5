//! Non-blocking topic writer
//!
//! ```text
//! caller ──write()──► copy into pooled buffer ──try_send──► admission queue
//!                                                               │
//!                          ┌──────────────┬─────────────────────┤
//!                          ▼              ▼                     ▼
//!                      worker 0       worker 1      ...     worker W-1
//!                    (producer 0)   (producer 1)          (producer W-1)
//! ```
//!
//! `write` is bounded by one non-blocking queue operation: a full queue
//! rejects the record with [`Error::Dropped`] instead of waiting. Accepted
//! records are delivered at most once; delivery failures go to the error
//! handler, never back to the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use ktopic_client::{TcpConnector, Writer, WriterConfig};
//!
//! let config = WriterConfig::builder()
//!     .topic("events")
//!     .brokers(vec!["localhost:9092".to_string()])
//!     .workers(4)
//!     .queue_size(1000)
//!     .build();
//!
//! let writer = Writer::connect_with_handler(config, &TcpConnector, |err| {
//!     eprintln!("{}", err);
//! })
//! .await?;
//!
//! match writer.write(b"hello") {
//!     Ok(n) => assert_eq!(n, 5),
//!     Err(ktopic_client::Error::Dropped) => { /* shed load */ }
//!     Err(e) => return Err(e.into()),
//! }
//!
//! writer.close().await?;
//! ```

use ktopic_core::{BufferPool, TopicMetrics};
use parking_lot::{Mutex, RwLock};
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::broker::{BrokerConnector, BrokerProducer};
use crate::config::WriterConfig;
use crate::error::{DeliveryError, Error, Result};
use crate::worker::Worker;

/// Callback receiving delivery failures, invoked from worker tasks
pub type ErrorHandler = Arc<dyn Fn(&DeliveryError) + Send + Sync>;

// ============================================================================
// Shared State
// ============================================================================

/// State shared between the writer and its workers
pub(crate) struct Shared {
    pub(crate) topic: Arc<str>,
    pub(crate) stats: WriterStats,
    pub(crate) metrics: TopicMetrics,
    handler: OnceLock<ErrorHandler>,
}

impl Shared {
    /// Hand a delivery failure to the handler, or log it when none is set
    pub(crate) fn report(&self, partition: Option<u32>, error: Error) {
        let err = DeliveryError {
            topic: Arc::clone(&self.topic),
            partition,
            error,
        };
        let Some(handler) = self.handler.get() else {
            debug!(topic = %self.topic, partition = ?partition, "{}", err);
            return;
        };
        // A panicking handler must not take its worker down with it
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| handler(&err))) {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            self.stats.record_handler_panic();
            error!(topic = %self.topic, error = %err, "Error handler panicked: {}", message);
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct WriterStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    metadata_errors: AtomicU64,
    handler_panics: AtomicU64,
    abandoned: AtomicU64,
    queued: AtomicU64,
    in_flight: AtomicU64,
}

impl WriterStats {
    fn record_enqueue_attempt(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_rejected(&self) {
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dequeued(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_metadata_error(&self) {
        self.metadata_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Write off every record still queued or in flight. Only valid once no
    /// worker is running.
    fn abandon_outstanding(&self) -> u64 {
        let outstanding = self.queued.swap(0, Ordering::Relaxed);
        self.in_flight.store(0, Ordering::Relaxed);
        self.abandoned.fetch_add(outstanding, Ordering::Relaxed);
        outstanding
    }

    pub(crate) fn record_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
        self.queued.fetch_sub(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WriterStatsSnapshot {
        WriterStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            metadata_errors: self.metadata_errors.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Writer statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriterStatsSnapshot {
    /// Records admitted into the queue
    pub accepted: u64,
    /// Records rejected because the queue was full
    pub dropped: u64,
    /// Records the broker accepted
    pub delivered: u64,
    /// Records whose send failed
    pub failed: u64,
    /// Partition-count queries that failed
    pub metadata_errors: u64,
    /// Error handler invocations that panicked
    pub handler_panics: u64,
    /// Records left undelivered because `close` timed out
    pub abandoned: u64,
    /// Records queued or being delivered
    pub queued: u64,
    /// Records a worker is currently sending
    pub in_flight: u64,
}

impl WriterStatsSnapshot {
    /// Records accepted but not yet delivered, failed or abandoned
    pub fn pending(&self) -> u64 {
        self.accepted
            .saturating_sub(self.delivered + self.failed + self.abandoned)
    }

    /// Fraction of finished records that were delivered
    pub fn success_rate(&self) -> f64 {
        let finished = self.delivered + self.failed;
        if finished == 0 {
            1.0
        } else {
            self.delivered as f64 / finished as f64
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Asynchronous, non-blocking writer for one topic
pub struct Writer {
    shared: Arc<Shared>,
    sender: RwLock<Option<mpsc::Sender<ktopic_core::PooledBuffer>>>,
    pool: Arc<BufferPool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    capacity: usize,
    drain_timeout: Duration,
}

impl Writer {
    /// Validate `config`, dial one producer per worker and start the workers.
    ///
    /// Dialing is fail-fast: if any producer cannot be opened, the ones
    /// already opened are closed and the connection error is returned.
    pub async fn connect(config: WriterConfig, connector: &dyn BrokerConnector) -> Result<Self> {
        let pool = BufferPool::new(config.buffer_pool.clone());
        Self::build(config, connector, pool, None).await
    }

    /// Like [`connect`](Self::connect), with the error handler installed
    /// before any worker starts
    pub async fn connect_with_handler<F>(
        config: WriterConfig,
        connector: &dyn BrokerConnector,
        handler: F,
    ) -> Result<Self>
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        let pool = BufferPool::new(config.buffer_pool.clone());
        Self::build(config, connector, pool, Some(Arc::new(handler))).await
    }

    /// Like [`connect`](Self::connect), drawing record buffers from `pool`
    pub async fn connect_with_pool(
        config: WriterConfig,
        connector: &dyn BrokerConnector,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        Self::build(config, connector, pool, None).await
    }

    async fn build(
        config: WriterConfig,
        connector: &dyn BrokerConnector,
        pool: Arc<BufferPool>,
        handler: Option<ErrorHandler>,
    ) -> Result<Self> {
        config.validate()?;

        let mut producers: Vec<Box<dyn BrokerProducer>> = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            match connector.connect(&config.connection).await {
                Ok(producer) => producers.push(producer),
                Err(e) => {
                    warn!(topic = %config.topic, worker = id, error = %e, "Failed to dial broker");
                    for mut producer in producers {
                        if let Err(close_err) = producer.close().await {
                            debug!(error = %close_err, "Failed to close producer after dial failure");
                        }
                    }
                    return Err(match e {
                        e @ Error::ConnectionError(_) => e,
                        other => Error::ConnectionError(other.to_string()),
                    });
                }
            }
        }

        let topic: Arc<str> = Arc::from(config.topic.as_str());
        let metrics = if config.enable_metrics {
            TopicMetrics::new(&topic)
        } else {
            TopicMetrics::noop()
        };
        let shared = Arc::new(Shared {
            topic: Arc::clone(&topic),
            stats: WriterStats::default(),
            metrics,
            handler: OnceLock::new(),
        });
        if let Some(handler) = handler {
            // Fresh OnceLock: cannot already be set
            let _ = shared.handler.set(handler);
        }

        let capacity = config.capacity();
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = producers
            .into_iter()
            .enumerate()
            .map(|(id, producer)| {
                Worker::new(
                    id,
                    producer,
                    Arc::clone(&queue),
                    Arc::clone(&shared),
                    config.send_timeout,
                )
                .spawn()
            })
            .collect();

        info!(
            topic = %topic,
            workers = config.workers,
            capacity,
            "Topic writer started"
        );

        Ok(Self {
            shared,
            sender: RwLock::new(Some(sender)),
            pool,
            workers: Mutex::new(workers),
            capacity,
            drain_timeout: config.drain_timeout,
        })
    }

    /// Queue `data` for delivery without blocking.
    ///
    /// Returns `Ok(data.len())` once the record is queued, `Ok(0)` for empty
    /// input (nothing is queued), [`Error::Dropped`] when the queue is full
    /// and [`Error::Closed`] after [`close`](Self::close). `data` is copied;
    /// the caller may reuse it immediately.
    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }

        let sender = self.sender.read();
        let Some(sender) = sender.as_ref() else {
            return Err(Error::Closed);
        };

        let record = self.pool.copy_from(data);
        let stats = &self.shared.stats;
        let metrics = &self.shared.metrics;

        // Count before sending so a fast worker never decrements first
        stats.record_enqueue_attempt();
        metrics.record_queued();

        match sender.try_send(record) {
            Ok(()) => {
                stats.record_accepted();
                Ok(data.len())
            }
            Err(TrySendError::Full(record)) => {
                drop(record);
                stats.record_rejected();
                stats.record_dropped();
                metrics.record_dequeued();
                metrics.record_dropped();
                trace!(topic = %self.shared.topic, bytes = data.len(), "Queue full, record dropped");
                Err(Error::Dropped)
            }
            Err(TrySendError::Closed(record)) => {
                drop(record);
                stats.record_rejected();
                metrics.record_dequeued();
                Err(Error::Closed)
            }
        }
    }

    /// Install the delivery-error handler.
    ///
    /// Only one handler can ever be installed; a second call returns
    /// [`Error::HandlerAlreadySet`]. Failures that happen before the handler
    /// is installed are logged at `debug` and otherwise discarded. A panic
    /// inside the handler is caught, logged and counted in
    /// [`WriterStatsSnapshot::handler_panics`]; the worker keeps running.
    pub fn on_error<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(&DeliveryError) + Send + Sync + 'static,
    {
        self.shared
            .handler
            .set(Arc::new(handler))
            .map_err(|_| Error::HandlerAlreadySet)
    }

    /// Close the admission queue and wait for the workers to drain it.
    ///
    /// Writes fail with [`Error::Closed`] from here on. Records already
    /// queued are still delivered; workers close their broker connections
    /// and exit. If draining exceeds the configured drain timeout the
    /// remaining workers are aborted, records still queued or in flight are
    /// counted as [`abandoned`](WriterStatsSnapshot::abandoned) and removed
    /// from the queued gauge, and [`Error::Timeout`] is returned.
    /// Calling `close` again is a no-op.
    pub async fn close(&self) -> Result<()> {
        let sender = self.sender.write().take();
        if sender.is_none() {
            return Ok(());
        }
        drop(sender);

        let mut handles = std::mem::take(&mut *self.workers.lock());

        debug!(topic = %self.shared.topic, workers = handles.len(), "Draining topic writer");
        let drain = async {
            // A handle is popped only once it has completed
            while let Some(handle) = handles.last_mut() {
                if let Err(e) = handle.await {
                    warn!(topic = %self.shared.topic, error = %e, "Delivery worker panicked");
                }
                handles.pop();
            }
        };

        if tokio::time::timeout(self.drain_timeout, drain).await.is_ok() {
            let stats = self.stats();
            info!(
                topic = %self.shared.topic,
                delivered = stats.delivered,
                failed = stats.failed,
                dropped = stats.dropped,
                "Topic writer closed"
            );
            return Ok(());
        }

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            // Cancellation is the expected outcome
            let _ = handle.await;
        }

        // No worker is left; whatever is still counted will never be sent
        let abandoned = self.shared.stats.abandon_outstanding();
        self.shared.metrics.record_abandoned(abandoned);
        warn!(
            topic = %self.shared.topic,
            timeout = ?self.drain_timeout,
            abandoned,
            "Drain timed out, delivery workers aborted"
        );
        Err(Error::Timeout(format!(
            "writer for '{}' did not drain within {:?}",
            self.shared.topic, self.drain_timeout
        )))
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Topic this writer publishes to
    pub fn topic(&self) -> &str {
        &self.shared.topic
    }

    /// Admission queue capacity (`workers + queue_size`)
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffer pool records are copied into
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Get writer statistics
    pub fn stats(&self) -> WriterStatsSnapshot {
        self.shared.stats.snapshot()
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("topic", &self.shared.topic)
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl io::Write for &Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Writer::write(*self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Writer::write(self, buf).map_err(io::Error::from)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
