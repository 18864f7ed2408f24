//! # Clock and Session Identifiers
//!
//! Provides millisecond timestamps and unique session identifiers for the
//! streaming pipeline. Time is abstracted behind the `Clock` trait so the
//! idle watchdog and event timestamps can be driven deterministically in
//! tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Source of millisecond timestamps.
///
/// ## Implementations:
/// - `SystemClock`: wall-clock epoch milliseconds (production)
/// - `MockClock`: manually advanced counter (tests)
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually controlled clock for deterministic tests.
///
/// Starts at an arbitrary non-zero instant so that code subtracting
/// timestamps never underflows around zero.
#[derive(Debug)]
pub struct MockClock {
    now_ms: AtomicU64,
}

impl MockClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// Advance the clock by `delta_ms` milliseconds.
    pub fn advance(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Generate a globally unique session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}
