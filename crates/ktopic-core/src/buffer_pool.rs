//! Record Buffer Pool
//!
//! Reusable byte buffers for record payloads. The writer copies every
//! accepted record into a pooled buffer because delivery happens after the
//! caller's slice is gone; pooling keeps that copy off the allocator in the
//! steady state.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       BufferPool                         │
//! ├──────────────────────────────────────────────────────────┤
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐  ┌──────────┐  │
//! │  │  Small   │  │  Medium  │  │  Large   │  │   Huge   │  │
//! │  │  <= 1KB  │  │  <= 16KB │  │  <= 256KB│  │ (alloc)  │  │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘  └──────────┘  │
//! │       └─────────────┴─────────────┘                      │
//! │            bounded free lists (crossbeam)                │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! A [`PooledBuffer`] has exactly one owner. It moves through the admission
//! queue into a delivery worker and goes back to its pool when dropped, so
//! every exit path of a send attempt releases it.

use bytes::BytesMut;
use crossbeam_channel::{bounded, Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Configuration
// ============================================================================

/// Buffer size classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Small buffers (<= 1KB) - log lines, small events
    Small = 0,
    /// Medium buffers (<= 16KB) - typical records
    Medium = 1,
    /// Large buffers (<= 256KB)
    Large = 2,
    /// Huge buffers (> 256KB) - direct allocation, never pooled
    Huge = 3,
}

impl SizeClass {
    /// Get the buffer size for this class
    pub const fn size(&self) -> usize {
        match self {
            Self::Small => 1024,
            Self::Medium => 16 * 1024,
            Self::Large => 256 * 1024,
            Self::Huge => 0,
        }
    }

    /// Determine size class for a requested payload size
    pub fn for_size(size: usize) -> Self {
        if size <= Self::Small.size() {
            Self::Small
        } else if size <= Self::Medium.size() {
            Self::Medium
        } else if size <= Self::Large.size() {
            Self::Large
        } else {
            Self::Huge
        }
    }

    /// Free list a released buffer may rejoin, judged by its capacity.
    ///
    /// A buffer only joins a list whose class size it can hold, so anything
    /// handed out from that list satisfies every request of the class.
    fn for_capacity(capacity: usize) -> Option<Self> {
        if capacity < Self::Small.size() {
            None
        } else if capacity < Self::Medium.size() {
            Some(Self::Small)
        } else if capacity < Self::Large.size() {
            Some(Self::Medium)
        } else if capacity <= 2 * Self::Large.size() {
            Some(Self::Large)
        } else {
            None
        }
    }
}

/// Buffer pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferPoolConfig {
    /// Maximum idle small buffers kept
    pub small_pool_size: usize,
    /// Maximum idle medium buffers kept
    pub medium_pool_size: usize,
    /// Maximum idle large buffers kept
    pub large_pool_size: usize,
    /// Fill the free lists up front instead of on first release
    pub preallocate: bool,
    /// Enable acquisition/release tracking
    pub enable_tracking: bool,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            small_pool_size: 1024,
            medium_pool_size: 128,
            large_pool_size: 16,
            preallocate: false,
            enable_tracking: true,
        }
    }
}

impl BufferPoolConfig {
    /// Configuration for high-throughput writers
    pub fn high_throughput() -> Self {
        Self {
            small_pool_size: 8192,
            medium_pool_size: 1024,
            large_pool_size: 64,
            preallocate: true,
            enable_tracking: false,
        }
    }
}

// ============================================================================
// Pool Statistics
// ============================================================================

#[derive(Debug, Default)]
struct PoolStats {
    acquired: AtomicU64,
    released: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
    outstanding: AtomicUsize,
    peak_outstanding: AtomicUsize,
}

/// Point-in-time copy of the pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Buffers handed out
    pub acquired: u64,
    /// Buffers given back
    pub released: u64,
    /// Acquisitions served from a free list
    pub pool_hits: u64,
    /// Acquisitions that had to allocate
    pub pool_misses: u64,
    /// Buffers currently owned by someone
    pub outstanding: usize,
    /// Highest `outstanding` value observed
    pub peak_outstanding: usize,
}

impl PoolStatsSnapshot {
    /// Fraction of acquisitions served without allocating (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.acquired == 0 {
            0.0
        } else {
            self.pool_hits as f64 / self.acquired as f64
        }
    }
}

// ============================================================================
// Buffer Pool
// ============================================================================

type FreeList = (Sender<BytesMut>, Receiver<BytesMut>);

/// Buffer pool with size-class segregation.
///
/// Shared through `Arc`; inject one pool per process or per test harness.
pub struct BufferPool {
    small: FreeList,
    medium: FreeList,
    large: FreeList,
    config: BufferPoolConfig,
    stats: PoolStats,
}

impl BufferPool {
    /// Create a new buffer pool
    pub fn new(config: BufferPoolConfig) -> Arc<Self> {
        let pool = Arc::new(Self {
            small: bounded(config.small_pool_size),
            medium: bounded(config.medium_pool_size),
            large: bounded(config.large_pool_size),
            config,
            stats: PoolStats::default(),
        });

        if pool.config.preallocate {
            pool.preallocate();
        }

        pool
    }

    fn preallocate(&self) {
        for class in [SizeClass::Small, SizeClass::Medium, SizeClass::Large] {
            if let Some((tx, _)) = self.free_list(class) {
                while tx.try_send(BytesMut::with_capacity(class.size())).is_ok() {}
            }
        }
    }

    fn free_list(&self, class: SizeClass) -> Option<&FreeList> {
        match class {
            SizeClass::Small => Some(&self.small),
            SizeClass::Medium => Some(&self.medium),
            SizeClass::Large => Some(&self.large),
            SizeClass::Huge => None,
        }
    }

    /// Acquire an empty buffer able to hold at least `size` bytes
    pub fn acquire(self: &Arc<Self>, size: usize) -> PooledBuffer {
        PooledBuffer {
            inner: self.take(size),
            pool: Arc::clone(self),
        }
    }

    /// Acquire a buffer and copy `data` into it
    pub fn copy_from(self: &Arc<Self>, data: &[u8]) -> PooledBuffer {
        let mut buf = self.acquire(data.len());
        buf.extend_from_slice(data);
        buf
    }

    fn take(&self, size: usize) -> BytesMut {
        let class = SizeClass::for_size(size);
        let pooled = self
            .free_list(class)
            .and_then(|(_, rx)| rx.try_recv().ok());

        if self.config.enable_tracking {
            self.stats.acquired.fetch_add(1, Ordering::Relaxed);
            if pooled.is_some() {
                self.stats.pool_hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.stats.pool_misses.fetch_add(1, Ordering::Relaxed);
            }
            let now = self.stats.outstanding.fetch_add(1, Ordering::Relaxed) + 1;
            self.stats.peak_outstanding.fetch_max(now, Ordering::Relaxed);
        }

        match pooled {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => match class {
                SizeClass::Huge => BytesMut::with_capacity(size),
                _ => BytesMut::with_capacity(class.size()),
            },
        }
    }

    fn release(&self, mut buf: BytesMut) {
        if self.config.enable_tracking {
            self.stats.released.fetch_add(1, Ordering::Relaxed);
            self.stats.outstanding.fetch_sub(1, Ordering::Relaxed);
        }

        buf.clear();
        let Some(class) = SizeClass::for_capacity(buf.capacity()) else {
            return;
        };
        if let Some((tx, _)) = self.free_list(class) {
            // Free list full: let the allocator have it back
            let _ = tx.try_send(buf);
        }
    }

    /// Number of idle buffers currently held in the free lists
    pub fn idle_buffers(&self) -> usize {
        self.small.1.len() + self.medium.1.len() + self.large.1.len()
    }

    /// Get pool statistics
    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            acquired: self.stats.acquired.load(Ordering::Relaxed),
            released: self.stats.released.load(Ordering::Relaxed),
            pool_hits: self.stats.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.stats.pool_misses.load(Ordering::Relaxed),
            outstanding: self.stats.outstanding.load(Ordering::Relaxed),
            peak_outstanding: self.stats.peak_outstanding.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("config", &self.config)
            .field("idle_buffers", &self.idle_buffers())
            .finish()
    }
}

// ============================================================================
// Pooled Buffer Handle
// ============================================================================

/// A record buffer that returns to its pool on drop
pub struct PooledBuffer {
    inner: BytesMut,
    pool: Arc<BufferPool>,
}

impl PooledBuffer {
    /// Append bytes to the buffer
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// View the buffered bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Get length of data in buffer
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Get capacity of buffer
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.inner);
        self.pool.release(buf);
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_size_class() {
        assert_eq!(SizeClass::for_size(0), SizeClass::Small);
        assert_eq!(SizeClass::for_size(1024), SizeClass::Small);
        assert_eq!(SizeClass::for_size(1025), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(16 * 1024), SizeClass::Medium);
        assert_eq!(SizeClass::for_size(16 * 1024 + 1), SizeClass::Large);
        assert_eq!(SizeClass::for_size(256 * 1024), SizeClass::Large);
        assert_eq!(SizeClass::for_size(256 * 1024 + 1), SizeClass::Huge);
    }

    #[test]
    fn test_size_class_for_capacity() {
        assert_eq!(SizeClass::for_capacity(100), None);
        assert_eq!(SizeClass::for_capacity(1024), Some(SizeClass::Small));
        assert_eq!(SizeClass::for_capacity(16 * 1024), Some(SizeClass::Medium));
        assert_eq!(SizeClass::for_capacity(300 * 1024), Some(SizeClass::Large));
        assert_eq!(SizeClass::for_capacity(4 * 1024 * 1024), None);
    }

    #[test]
    fn test_acquire_capacity() {
        let pool = BufferPool::new(BufferPoolConfig::default());

        let small = pool.acquire(100);
        assert!(small.capacity() >= 100);
        assert!(small.is_empty());

        let medium = pool.acquire(10_000);
        assert!(medium.capacity() >= 10_000);

        let huge = pool.acquire(1024 * 1024);
        assert!(huge.capacity() >= 1024 * 1024);
    }

    #[test]
    fn test_copy_from() {
        let pool = BufferPool::new(BufferPoolConfig::default());
        let buf = pool.copy_from(b"hello world");
        assert_eq!(buf.len(), 11);
        assert_eq!(&buf[..], b"hello world");
        assert_eq!(buf.as_slice(), b"hello world");
    }

    #[test]
    fn test_release_on_drop_and_reuse() {
        let pool = BufferPool::new(BufferPoolConfig::default());

        {
            let _buf = pool.copy_from(b"first");
            assert_eq!(pool.stats().outstanding, 1);
        }
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.idle_buffers(), 1);

        let buf = pool.acquire(10);
        assert!(buf.is_empty(), "reused buffer must come back cleared");

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.pool_hits, 1);
        assert_eq!(stats.pool_misses, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_huge_buffers_not_pooled() {
        let pool = BufferPool::new(BufferPoolConfig::default());
        drop(pool.acquire(4 * 1024 * 1024));
        assert_eq!(pool.idle_buffers(), 0);
        assert_eq!(pool.stats().outstanding, 0);
    }

    #[test]
    fn test_free_list_bounded() {
        let config = BufferPoolConfig {
            small_pool_size: 2,
            ..Default::default()
        };
        let pool = BufferPool::new(config);

        let bufs: Vec<_> = (0..5).map(|_| pool.acquire(10)).collect();
        drop(bufs);

        assert_eq!(pool.idle_buffers(), 2);
        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().peak_outstanding, 5);
    }

    #[test]
    fn test_preallocate() {
        let config = BufferPoolConfig {
            small_pool_size: 4,
            medium_pool_size: 2,
            large_pool_size: 1,
            preallocate: true,
            enable_tracking: true,
        };
        let pool = BufferPool::new(config);
        assert_eq!(pool.idle_buffers(), 7);

        let _buf = pool.acquire(1);
        assert_eq!(pool.stats().pool_hits, 1);
    }

    #[test]
    fn test_tracking_disabled() {
        let config = BufferPoolConfig {
            enable_tracking: false,
            ..Default::default()
        };
        let pool = BufferPool::new(config);
        drop(pool.copy_from(b"abc"));
        assert_eq!(pool.stats().acquired, 0);
        assert_eq!(pool.idle_buffers(), 1);
    }

    #[test]
    fn test_concurrent_owners_do_not_alias() {
        let pool = BufferPool::new(BufferPoolConfig::default());

        std::thread::scope(|s| {
            for t in 0..8u8 {
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    for i in 0..500u32 {
                        let payload = format!("thread-{}-record-{}", t, i);
                        let buf = pool.copy_from(payload.as_bytes());
                        assert_eq!(&buf[..], payload.as_bytes());
                    }
                });
            }
        });

        assert_eq!(pool.stats().outstanding, 0);
        assert_eq!(pool.stats().acquired, 4000);
    }

    #[test]
    fn test_config_serialization() {
        let config = BufferPoolConfig::high_throughput();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: BufferPoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: BufferPoolConfig = serde_json::from_str(r#"{"small_pool_size": 8}"#).unwrap();
        assert_eq!(partial.small_pool_size, 8);
        assert_eq!(partial.medium_pool_size, BufferPoolConfig::default().medium_pool_size);
    }

    proptest! {
        #[test]
        fn prop_reused_buffers_hold_exact_payload(
            payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..3000), 1..20)
        ) {
            let pool = BufferPool::new(BufferPoolConfig::default());
            for payload in &payloads {
                let buf = pool.copy_from(payload);
                prop_assert_eq!(&buf[..], &payload[..]);
            }
            prop_assert_eq!(pool.stats().outstanding, 0);
        }
    }
}
