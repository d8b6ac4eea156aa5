//! Delivery workers
//!
//! Each worker owns one broker producer handle and loops:
//!
//! ```text
//! dequeue -> partition count -> select -> send -> observe -> release -> dequeue
//! ```
//!
//! A failed send is reported and discarded; it is never retried or put back
//! in the queue. The loop ends when the admission queue is closed and empty.

use ktopic_core::{PooledBuffer, Timer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::broker::BrokerProducer;
use crate::error::{Error, Result};
use crate::partitioner::select_partition;
use crate::writer::Shared;

/// Receiving end of the admission queue, shared by all workers
pub(crate) type RecordQueue = Arc<Mutex<mpsc::Receiver<PooledBuffer>>>;

pub(crate) struct Worker {
    id: usize,
    producer: Box<dyn BrokerProducer>,
    queue: RecordQueue,
    shared: Arc<Shared>,
    send_timeout: Option<Duration>,
}

impl Worker {
    pub(crate) fn new(
        id: usize,
        producer: Box<dyn BrokerProducer>,
        queue: RecordQueue,
        shared: Arc<Shared>,
        send_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id,
            producer,
            queue,
            shared,
            send_timeout,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        debug!(worker = self.id, topic = %self.shared.topic, "Delivery worker started");

        let queue = Arc::clone(&self.queue);
        while let Some(record) = next_record(&queue).await {
            self.deliver(record).await;
        }

        if let Err(e) = self.producer.close().await {
            warn!(worker = self.id, error = %e, "Failed to close broker connection");
        }
        debug!(worker = self.id, topic = %self.shared.topic, "Delivery worker stopped");
    }

    async fn deliver(&mut self, record: PooledBuffer) {
        self.shared.stats.record_dequeued();
        let timer = Timer::new();

        let count = match self.producer.partition_count(&self.shared.topic).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    worker = self.id,
                    topic = %self.shared.topic,
                    error = %e,
                    "Partition count unavailable, using fallback partition"
                );
                self.shared.stats.record_metadata_error();
                self.shared.report(None, Error::Metadata(e.to_string()));
                0
            }
        };
        let partition = select_partition(count);

        let result = self.send(partition, &record).await;
        self.shared.metrics.record_write_duration(timer.elapsed());

        match result {
            Ok(()) => {
                trace!(worker = self.id, partition, bytes = record.len(), "Record delivered");
                self.shared.stats.record_delivered();
            }
            Err(e) => {
                self.shared.stats.record_failed();
                self.shared.report(Some(partition), e);
            }
        }

        drop(record);
        self.shared.stats.record_finished();
        self.shared.metrics.record_dequeued();
    }

    async fn send(&mut self, partition: u32, payload: &[u8]) -> Result<()> {
        let send = self.producer.send(&self.shared.topic, partition, payload);
        match self.send_timeout {
            None => send.await,
            Some(limit) => match tokio::time::timeout(limit, send).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!(
                    "send to partition {} exceeded {:?}",
                    partition, limit
                ))),
            },
        }
    }
}

/// The queue lock is held only while waiting, never during a send
async fn next_record(queue: &RecordQueue) -> Option<PooledBuffer> {
    queue.lock().await.recv().await
}
