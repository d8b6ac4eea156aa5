//! Shared fixtures for the ktopic-client integration tests
//!
//! - [`TestBroker`]: an embedded TCP broker speaking `ktopic-protocol`
//! - tracing setup and small polling helpers

#![allow(dead_code)]

use anyhow::Result;
use bytes::Bytes;
use ktopic_client::tcp::{read_frame, write_frame};
use ktopic_client::Error;
use ktopic_core::compression::{decompress, MAX_DECOMPRESSED_SIZE};
use ktopic_protocol::{Request, Response, MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};
use tokio::time::sleep;
use tracing::{debug, info};

// ============================================================================
// Helpers
// ============================================================================

/// Initialize tracing for tests (call once at start of test)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ktopic_client=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Topic name unique within the test binary
pub fn unique_topic_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    format!("{}-{}", prefix, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition().await {
            return Ok(());
        }
        sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("Condition not met within {:?}", timeout)
}

// ============================================================================
// TestBroker - embedded TCP broker
// ============================================================================

#[derive(Default)]
struct BrokerState {
    /// topic -> partition logs of decompressed payloads
    topics: Mutex<HashMap<String, Vec<Vec<Bytes>>>>,
    partitions: u32,
    appended: Notify,
    fail_metadata: AtomicBool,
    publishes: AtomicU64,
    connections: AtomicUsize,
}

impl BrokerState {
    fn handle(&self, request: Request) -> Option<Response> {
        match request {
            Request::Publish {
                topic,
                partition,
                acks,
                value,
            } => {
                self.publishes.fetch_add(1, Ordering::SeqCst);
                let response = match decompress(&value, MAX_DECOMPRESSED_SIZE) {
                    Ok(payload) => self.append(&topic, partition, payload),
                    Err(e) => Response::Error {
                        message: e.to_string(),
                    },
                };
                acks.expects_response().then_some(response)
            }
            Request::GetMetadata { topic } => {
                if self.fail_metadata.load(Ordering::SeqCst) {
                    return Some(Response::Error {
                        message: format!("metadata unavailable for '{}'", topic),
                    });
                }
                Some(Response::Metadata {
                    name: topic,
                    partitions: self.partitions,
                })
            }
            Request::Ping => Some(Response::Pong),
        }
    }

    fn append(&self, topic: &str, partition: u32, payload: Bytes) -> Response {
        let mut topics = self.topics.lock();
        let logs = topics
            .entry(topic.to_string())
            .or_insert_with(|| (0..self.partitions).map(|_| Vec::new()).collect());
        let Some(log) = logs.get_mut(partition as usize) else {
            return Response::Error {
                message: format!("unknown partition {}", partition),
            };
        };
        log.push(payload);
        let offset = log.len() as u64 - 1;
        drop(topics);

        self.appended.notify_waiters();
        Response::Published { partition, offset }
    }

    fn message_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .get(topic)
            .map(|logs| logs.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }
}

/// An embedded ktopic broker for testing
pub struct TestBroker {
    pub addr: SocketAddr,
    state: Arc<BrokerState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestBroker {
    /// Start a broker with single-partition topics on a random port
    pub async fn start() -> Result<Self> {
        Self::start_with_partitions(1).await
    }

    /// Start a broker whose topics have `partitions` partitions
    pub async fn start_with_partitions(partitions: u32) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(BrokerState {
            partitions,
            ..Default::default()
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let accept_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        debug!("Test broker accepted {}", peer);
                        accept_state.connections.fetch_add(1, Ordering::SeqCst);
                        let conn_state = Arc::clone(&accept_state);
                        tokio::spawn(async move {
                            if let Err(e) = serve(stream, conn_state).await {
                                debug!("Test broker connection ended: {}", e);
                            }
                        });
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        info!("Test broker listening on {}", addr);
        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn connection_string(&self) -> String {
        self.addr.to_string()
    }

    /// Make every metadata request fail
    pub fn set_fail_metadata(&self, fail: bool) {
        self.state.fail_metadata.store(fail, Ordering::SeqCst);
    }

    /// Decompressed payloads of one partition
    pub fn messages(&self, topic: &str, partition: u32) -> Vec<Bytes> {
        self.state
            .topics
            .lock()
            .get(topic)
            .and_then(|logs| logs.get(partition as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Decompressed payloads of every partition
    pub fn all_messages(&self, topic: &str) -> Vec<Bytes> {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn message_count(&self, topic: &str) -> usize {
        self.state.message_count(topic)
    }

    /// Publish requests received, including rejected ones
    pub fn publishes(&self) -> u64 {
        self.state.publishes.load(Ordering::SeqCst)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_messages(&self, topic: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let appended = self.state.appended.notified();
            if self.message_count(topic) >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return self.message_count(topic) >= count;
            }
        }
    }

    /// Stop accepting connections
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn serve(mut stream: TcpStream, state: Arc<BrokerState>) -> Result<()> {
    loop {
        let frame = match read_frame(&mut stream, MAX_MESSAGE_SIZE).await {
            Ok(frame) => frame,
            Err(Error::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let (request, format, correlation_id) = Request::from_wire(&frame)?;
        if let Some(response) = state.handle(request) {
            write_frame(&mut stream, &response.to_wire(format, correlation_id)?).await?;
        }
    }
}
