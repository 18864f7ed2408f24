//! # Per-Session Streaming Pipeline
//!
//! The core of the gateway: everything that happens between a track frame
//! arriving and a detection event leaving.
//!
//! ## Key Components:
//! - **Clock** (`clock`): millisecond timestamps and session ids
//! - **Buffers** (`buffer`): drop-oldest backpressure between producer and
//!   consumer
//! - **Session** (`session`): counters, idle test, close-once summary
//! - **Processors** (`video`, `audio`): the long-lived consumer loops
//! - **Orchestrator** (`orchestrator`): lifecycle state machine owning the
//!   buffers, processors and ordered shutdown

pub mod audio;
pub mod buffer;
pub mod clock;
pub mod orchestrator;
pub mod session;
pub mod video;

use crate::audio::pcm::AudioFramePayload;
use crate::media::decode::VideoPayload;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// A buffered video frame awaiting processing.
#[derive(Debug, Clone)]
pub struct VideoItem {
    pub arrival_ms: u64,
    pub payload: VideoPayload,
}

/// A buffered audio frame awaiting window assembly.
#[derive(Debug, Clone)]
pub struct AudioItem {
    pub arrival_ms: u64,
    pub payload: AudioFramePayload,
}

/// Handle to a spawned processor loop.
///
/// The orchestrator owns one per attached track and stops them during the
/// Closing transition: cancel, then await exit within a bounded deadline,
/// aborting the task if it overruns.
pub struct ProcessorHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl ProcessorHandle {
    pub fn new(cancel: CancellationToken, join: JoinHandle<()>) -> Self {
        Self { cancel, join }
    }

    /// Stop the processor. Returns `true` on a clean exit within
    /// `deadline`, `false` if the task panicked or had to be aborted.
    pub async fn stop(self, deadline: Duration) -> bool {
        self.cancel.cancel();
        let mut join = self.join;
        match tokio::time::timeout(deadline, &mut join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(error = %e, "processor task panicked");
                false
            }
            Err(_) => {
                warn!(deadline_ms = deadline.as_millis() as u64, "processor did not stop within deadline; aborting");
                join.abort();
                false
            }
        }
    }
}
