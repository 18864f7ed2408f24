//! # Bounded Media Buffers
//!
//! Implements the drop-oldest bounded buffer that decouples track-side
//! producers from the pipeline consumers. Two variants share one
//! implementation:
//!
//! - **Video**: capacity 1: "process the newest frame or nothing"
//! - **Audio**: capacity N (default 1024): analysis windows need batches
//!
//! ## Backpressure Policy:
//! `put` never blocks and never fails. When the buffer is at capacity the
//! oldest resident item is discarded, the buffer's drop counter is
//! incremented, and the new item is inserted. The producer therefore always
//! runs at track speed while the consumer sees the freshest data available.
//!
//! ## Concurrency Contract:
//! One producer and one consumer per instance, potentially on different
//! executors. Internal state is a mutex-protected queue plus a `Notify`
//! handle that wakes the consumer; the drop counter is atomic so `stats`
//! reads take no lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

/// Bounded FIFO buffer with drop-oldest overflow behavior.
pub struct MediaBuffer<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
    dropped: AtomicU64,
    available: Notify,
}

impl<T> MediaBuffer<T> {
    /// Create a buffer with the given capacity (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
            available: Notify::new(),
        }
    }

    /// Single-slot buffer for video frames.
    pub fn video() -> Self {
        Self::with_capacity(1)
    }

    /// Deep buffer for audio frames.
    pub fn audio(capacity: usize) -> Self {
        Self::with_capacity(capacity)
    }

    /// Insert an item, discarding the oldest resident item if full.
    ///
    /// Never blocks. Returns `true` if an existing item was dropped to make
    /// room.
    pub fn put(&self, item: T) -> bool {
        let was_dropped = {
            let mut queue = self.queue.lock().unwrap();
            let was_dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
                true
            } else {
                false
            };
            queue.push_back(item);
            was_dropped
        };

        self.available.notify_one();
        was_dropped
    }

    /// Remove the next item if one is immediately available.
    pub fn try_get(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }

    /// Remove the next item, suspending until one is available.
    ///
    /// Cancellation is external: callers race this future against the
    /// session's cancellation token with `tokio::select!`.
    pub async fn get(&self) -> T {
        loop {
            if let Some(item) = self.try_get() {
                return item;
            }
            // `notify_one` stores a permit when nobody is waiting, so a put
            // that lands between the check above and this await still wakes
            // us immediately.
            self.available.notified().await;
        }
    }

    /// Drain everything currently resident without waiting.
    pub fn drain(&self) -> Vec<T> {
        self.queue.lock().unwrap().drain(..).collect()
    }

    /// Total items discarded due to overflow since creation. Monotonic.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}
