//! # WebRTC Boundary
//!
//! The signaling/ICE/DTLS stack and its codec decoders live outside this
//! crate. This module declares the seams through which the pipeline
//! consumes them:
//!
//! - **`SignalingBackend`**: turns an SDP offer into an answer plus a live
//!   peer handle and its event stream
//! - **`PeerConnection`**: opaque handle released on session close
//! - **`DataChannel`**: JSON-text carrier for detection events, addressed
//!   by the fixed label `detections`
//! - **`PeerEvent`**: decoded track frames, track endings, channel state
//!   changes and inbound channel messages
//!
//! It also owns the process-wide registry of active peers used by the
//! concurrent-session cap and by graceful shutdown.

use crate::audio::pcm::AudioFramePayload;
use crate::media::decode::VideoPayload;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Label of the data channel carrying detection events.
pub const DETECTIONS_CHANNEL_LABEL: &str = "detections";

/// Ready state of a data channel, mirroring the RTCDataChannel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
#[error("data channel send failed: {0}")]
pub struct ChannelError(pub String);

/// A JSON-capable data channel owned by the peer connection.
///
/// `send_text` must not block beyond the underlying non-blocking send.
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;
    fn ready_state(&self) -> ChannelState;
    fn send_text(&self, payload: &str) -> Result<(), ChannelError>;
}

/// Close code reported to the client on forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Normal or idle close.
    Normal,
    /// Rejected over the concurrent-session cap.
    OverCapacity,
    /// Internal failure.
    Internal,
}

impl CloseCode {
    pub fn as_u16(self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::OverCapacity => 1008,
            CloseCode::Internal => 1011,
        }
    }
}

/// Opaque peer-connection handle. Closing is best-effort and idempotent.
pub trait PeerConnection: Send + Sync {
    fn close(&self, code: CloseCode);
}

/// Which media track a frame or lifecycle event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// One decoded time-slice of a track.
#[derive(Debug, Clone)]
pub enum MediaPayload {
    Video(VideoPayload),
    Audio(AudioFramePayload),
}

impl MediaPayload {
    pub fn kind(&self) -> TrackKind {
        match self {
            MediaPayload::Video(_) => TrackKind::Video,
            MediaPayload::Audio(_) => TrackKind::Audio,
        }
    }
}

/// Events surfaced by the media stack for one peer connection.
pub enum PeerEvent {
    /// A track frame arrived.
    Frame(MediaPayload),
    /// A track ended; no further frames of this kind will arrive.
    TrackEnded(TrackKind),
    /// The `detections` data channel became open.
    ChannelOpen(Arc<dyn DataChannel>),
    /// A text message arrived on the data channel.
    ChannelMessage(String),
    /// The peer connection closed or failed.
    Closed,
}

/// SDP offer as posted to `/offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpOffer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// SDP answer returned from `/offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdpAnswer {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("malformed offer: {0}")]
    MalformedOffer(String),

    #[error("no signaling backend available")]
    Unavailable,

    #[error("negotiation failed: {0}")]
    Backend(#[from] anyhow::Error),
}

/// Result of a successful negotiation.
pub struct NegotiatedPeer {
    pub answer: SdpAnswer,
    pub peer: Arc<dyn PeerConnection>,
    pub events: mpsc::Receiver<PeerEvent>,
}

/// The deployment's WebRTC stack, consumed opaquely.
#[async_trait]
pub trait SignalingBackend: Send + Sync {
    async fn negotiate(&self, offer: SdpOffer) -> Result<NegotiatedPeer, SignalingError>;
}

/// Placeholder backend for deployments that have not linked a media stack;
/// every offer is refused and `/offer` answers 503.
pub struct DisabledSignaling;

#[async_trait]
impl SignalingBackend for DisabledSignaling {
    async fn negotiate(&self, _offer: SdpOffer) -> Result<NegotiatedPeer, SignalingError> {
        Err(SignalingError::Unavailable)
    }
}

/// A registered live peer: the connection handle plus the session's
/// cancellation token.
#[derive(Clone)]
pub struct RegisteredPeer {
    pub peer: Arc<dyn PeerConnection>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Error)]
#[error("concurrent session cap of {0} reached")]
pub struct CapacityExceeded(pub usize);

/// Process-wide set of active peer connections.
///
/// ## Usage:
/// Register on signaling completion, unregister on session close. The
/// registry enforces the concurrent-session cap under its lock (the HTTP
/// handler's early check is advisory) and lets graceful shutdown close
/// every live session.
pub struct PeerRegistry {
    peers: Mutex<HashMap<String, RegisteredPeer>>,
    max_sessions: usize,
}

impl PeerRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            max_sessions: max_sessions.max(1),
        }
    }

    /// Register a live peer under its session id. Fails when the cap is
    /// already reached.
    pub fn register(
        &self,
        session_id: &str,
        entry: RegisteredPeer,
    ) -> Result<(), CapacityExceeded> {
        let mut peers = self.peers.lock().unwrap();
        if peers.len() >= self.max_sessions {
            return Err(CapacityExceeded(self.max_sessions));
        }
        peers.insert(session_id.to_string(), entry);
        Ok(())
    }

    /// Remove a session's entry, if still present.
    pub fn unregister(&self, session_id: &str) -> bool {
        self.peers.lock().unwrap().remove(session_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    pub fn at_capacity(&self) -> bool {
        self.active_count() >= self.max_sessions
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Cancel every live session for process shutdown. The orchestrators
    /// run their normal close paths and unregister themselves.
    pub fn shutdown_all(&self) {
        let peers: Vec<RegisteredPeer> = self.peers.lock().unwrap().values().cloned().collect();
        if !peers.is_empty() {
            info!(sessions = peers.len(), "shutting down active sessions");
        }
        for entry in peers {
            entry.cancel.cancel();
        }
    }
}

/// Mock boundary objects shared by the pipeline tests.
#[cfg(test)]
pub mod testing {
    use super::*;

    /// Data channel that records what was sent through it.
    pub struct MockChannel {
        state: Mutex<ChannelState>,
        sent: Mutex<Vec<String>>,
        fail_sends: bool,
    }

    impl MockChannel {
        pub fn open() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ChannelState::Open),
                sent: Mutex::new(Vec::new()),
                fail_sends: false,
            })
        }

        pub fn closed() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ChannelState::Closed),
                sent: Mutex::new(Vec::new()),
                fail_sends: false,
            })
        }

        pub fn failing() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(ChannelState::Open),
                sent: Mutex::new(Vec::new()),
                fail_sends: true,
            })
        }

        pub fn set_state(&self, state: ChannelState) {
            *self.state.lock().unwrap() = state;
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub fn sent_events(&self) -> Vec<serde_json::Value> {
            self.sent()
                .iter()
                .map(|s| serde_json::from_str(s).unwrap())
                .collect()
        }
    }

    impl DataChannel for MockChannel {
        fn label(&self) -> &str {
            DETECTIONS_CHANNEL_LABEL
        }

        fn ready_state(&self) -> ChannelState {
            *self.state.lock().unwrap()
        }

        fn send_text(&self, payload: &str) -> Result<(), ChannelError> {
            if self.fail_sends {
                return Err(ChannelError("simulated send failure".to_string()));
            }
            self.sent.lock().unwrap().push(payload.to_string());
            Ok(())
        }
    }

    /// Peer handle that records the close code it received.
    #[derive(Default)]
    pub struct MockPeer {
        closed_with: Mutex<Option<CloseCode>>,
    }

    impl MockPeer {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn closed_with(&self) -> Option<CloseCode> {
            *self.closed_with.lock().unwrap()
        }
    }

    impl PeerConnection for MockPeer {
        fn close(&self, code: CloseCode) {
            let mut guard = self.closed_with.lock().unwrap();
            // First close wins; later calls are no-ops.
            if guard.is_none() {
                *guard = Some(code);
            }
        }
    }
}
