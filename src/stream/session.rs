//! # Stream Session
//!
//! Per-peer-connection session record: identity, timestamps, and the
//! counters that feed the terminal summary. One `StreamSession` exists per
//! peer connection; the video and audio processors hold shared references
//! and mutate it only through the recorder methods below.
//!
//! ## Thread Safety:
//! Counters are atomics so the two processor tasks can record concurrently
//! without a lock. Closing is guarded by a mutex so it happens exactly once;
//! after close every recorder becomes a no-op and the stored summary is
//! returned unchanged on repeated calls.

use crate::stream::clock::Clock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Aggregate counters and lifecycle for one streaming session.
pub struct StreamSession {
    session_id: String,
    clock: Arc<dyn Clock>,
    start_time_ms: u64,

    frame_count: AtomicU64,
    audio_frame_count: AtomicU64,
    /// Cumulative analyzed audio duration, stored in microseconds so it can
    /// be an atomic.
    audio_micros: AtomicU64,
    total_received: AtomicU64,
    dropped_count: AtomicU64,
    detection_count: AtomicU64,
    last_activity_ms: AtomicU64,

    closed: AtomicBool,
    summary: Mutex<Option<SessionSummary>>,
}

/// Terminal record describing a closed session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub duration_s: f64,
    pub frame_count: u64,
    pub audio_frame_count: u64,
    pub audio_seconds: f64,
    pub total_received: u64,
    pub dropped_count: u64,
    pub detection_count: u64,
}

impl StreamSession {
    /// Create a session. `start_time_ms` is captured once, here, at offer
    /// acceptance.
    pub fn new(session_id: String, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        info!(session_id = %session_id, "session created");
        Self {
            session_id,
            clock,
            start_time_ms: now,
            frame_count: AtomicU64::new(0),
            audio_frame_count: AtomicU64::new(0),
            audio_micros: AtomicU64::new(0),
            total_received: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            detection_count: AtomicU64::new(0),
            last_activity_ms: AtomicU64::new(now),
            closed: AtomicBool::new(false),
            summary: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn touch(&self) {
        self.last_activity_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Record one frame received from the client (processed or not).
    pub fn record_received(&self) {
        if self.is_open() {
            self.total_received.fetch_add(1, Ordering::Relaxed);
            self.touch();
        }
    }

    /// Record one successfully processed video frame.
    pub fn record_frame(&self) {
        if self.is_open() {
            self.frame_count.fetch_add(1, Ordering::Relaxed);
            self.touch();
        }
    }

    /// Record `n` frames discarded by buffer overflow.
    pub fn record_dropped(&self, n: u64) {
        if self.is_open() {
            self.dropped_count.fetch_add(n, Ordering::Relaxed);
            self.touch();
        }
    }

    /// Record `n` detections emitted for one frame.
    pub fn record_detection(&self, n: u64) {
        if self.is_open() {
            self.detection_count.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Record an analyzed audio window of `frames` items spanning `seconds`.
    pub fn record_audio(&self, frames: u64, seconds: f64) {
        if self.is_open() {
            self.audio_frame_count.fetch_add(frames, Ordering::Relaxed);
            let micros = (seconds.max(0.0) * 1_000_000.0) as u64;
            self.audio_micros.fetch_add(micros, Ordering::Relaxed);
            self.touch();
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn audio_frame_count(&self) -> u64 {
        self.audio_frame_count.load(Ordering::Relaxed)
    }

    pub fn audio_seconds(&self) -> f64 {
        self.audio_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn total_received(&self) -> u64 {
        self.total_received.load(Ordering::Relaxed)
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    pub fn detection_count(&self) -> u64 {
        self.detection_count.load(Ordering::Relaxed)
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    /// Whether the session has seen no activity for strictly longer than
    /// `timeout_ms` as of `now_ms`.
    ///
    /// Exactly at the timeout the session is NOT yet idle.
    pub fn is_idle(&self, now_ms: u64, timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_activity_ms()) > timeout_ms
    }

    /// Close the session and return its summary.
    ///
    /// Idempotent: the first call freezes the counters and stores the
    /// summary; later calls return the stored value unchanged.
    pub fn close(&self) -> SessionSummary {
        let mut guard = self.summary.lock().unwrap();
        if let Some(summary) = guard.as_ref() {
            return summary.clone();
        }

        self.closed.store(true, Ordering::SeqCst);
        let end_time_ms = self.clock.now_ms().max(self.start_time_ms);
        let summary = SessionSummary {
            session_id: self.session_id.clone(),
            start_time_ms: self.start_time_ms,
            end_time_ms,
            duration_s: (end_time_ms - self.start_time_ms) as f64 / 1000.0,
            frame_count: self.frame_count(),
            audio_frame_count: self.audio_frame_count(),
            audio_seconds: self.audio_seconds(),
            total_received: self.total_received(),
            dropped_count: self.dropped_count(),
            detection_count: self.detection_count(),
        };
        info!(
            session_id = %summary.session_id,
            duration_s = summary.duration_s,
            frames = summary.frame_count,
            detections = summary.detection_count,
            "session closed"
        );
        *guard = Some(summary.clone());
        summary
    }
}
