//! Per-topic writer metrics
//!
//! Uses the `metrics` crate facade for backend-agnostic instrumentation.
//! Without an installed recorder every instrument is a no-op, which is how
//! writers run when metrics are disabled. The Prometheus exporter is
//! enabled by the `metrics` feature flag.
//!
//! # Metric Names
//!
//! | Name                            | Kind      | Labels  |
//! |---------------------------------|-----------|---------|
//! | `ktopic_queued`                 | gauge     | `topic` |
//! | `ktopic_dropped_total`          | counter   | `topic` |
//! | `ktopic_write_duration_seconds` | histogram | `topic` |

#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use metrics::{Counter, Gauge, Histogram};

/// Records currently waiting in the admission queue
pub const QUEUED_GAUGE: &str = "ktopic_queued";
/// Records rejected because the admission queue was full
pub const DROPPED_COUNTER: &str = "ktopic_dropped_total";
/// Time spent delivering one record to the broker
pub const WRITE_DURATION_HISTOGRAM: &str = "ktopic_write_duration_seconds";

#[cfg(feature = "metrics")]
static METRICS_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the Prometheus metrics exporter
///
/// Starts an HTTP listener serving `/metrics`. Safe to call multiple times.
#[cfg(feature = "metrics")]
pub fn init_metrics(
    addr: std::net::SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    METRICS_INITIALIZED.get_or_init(
        || match metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
        {
            Ok(()) => {
                tracing::info!(
                    "Prometheus metrics server listening on http://{}/metrics",
                    addr
                );
            }
            Err(e) => {
                tracing::error!("Failed to start Prometheus exporter: {}", e);
            }
        },
    );
    Ok(())
}

/// No-op initialization when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn init_metrics(
    _addr: std::net::SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    Ok(())
}

// ============================================================================
// Topic Metrics
// ============================================================================

/// Instruments for one writer, labelled with its topic.
///
/// Handles are registered once at construction; recording afterwards does
/// not touch the registry.
#[derive(Clone)]
pub struct TopicMetrics {
    queued: Gauge,
    dropped: Counter,
    write_duration: Histogram,
}

impl TopicMetrics {
    pub fn new(topic: &str) -> Self {
        Self {
            queued: metrics::gauge!(QUEUED_GAUGE, "topic" => topic.to_string()),
            dropped: metrics::counter!(DROPPED_COUNTER, "topic" => topic.to_string()),
            write_duration: metrics::histogram!(
                WRITE_DURATION_HISTOGRAM,
                "topic" => topic.to_string()
            ),
        }
    }

    /// Instruments that record nothing
    pub fn noop() -> Self {
        Self {
            queued: Gauge::noop(),
            dropped: Counter::noop(),
            write_duration: Histogram::noop(),
        }
    }

    /// A record entered the admission queue
    pub fn record_queued(&self) {
        self.queued.increment(1.0);
    }

    /// A record left the admission queue
    pub fn record_dequeued(&self) {
        self.queued.decrement(1.0);
    }

    /// Records written off without ever reaching the broker
    pub fn record_abandoned(&self, count: u64) {
        if count > 0 {
            self.queued.decrement(count as f64);
        }
    }

    /// A record was rejected at admission
    pub fn record_dropped(&self) {
        self.dropped.increment(1);
    }

    /// One delivery attempt finished, successfully or not
    pub fn record_write_duration(&self, elapsed: Duration) {
        self.write_duration.record(elapsed.as_secs_f64());
    }
}

impl std::fmt::Debug for TopicMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicMetrics").finish_non_exhaustive()
    }
}

// ============================================================================
// Timer Utility
// ============================================================================

/// Timer for measuring operation durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed Duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
