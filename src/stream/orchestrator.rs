//! # Session Orchestrator
//!
//! Owns the lifecycle of one streaming session from negotiation to release:
//!
//! ```text
//! Created ── first track frame ──▶ Active ──▶ Closing ──▶ Closed
//! ```
//!
//! Active → Closing fires when all attached tracks have ended, when the
//! idle watchdog sees no activity for longer than the configured timeout,
//! when the peer closes, or when the process shuts down (cancellation).
//!
//! The Closing → Closed path is ordered: stop every processor within a
//! bounded deadline, close the session for its summary, offer the
//! `stream_closed` event best-effort, release the peer connection, and
//! unregister from the process-wide registry. A Closed session is
//! immutable.

use crate::audio::emotion::LazyClassifier;
use crate::audio::AcousticAnalyzer;
use crate::events::{
    ErrorCode, EventEmitter, ServerEvent, SessionConfigInfo, Severity, StreamSummary,
};
use crate::inference::Infer;
use crate::rtc::{CloseCode, MediaPayload, PeerConnection, PeerEvent, PeerRegistry, TrackKind};
use crate::stream::audio::{AudioProcessor, AudioWindowConfig};
use crate::stream::buffer::MediaBuffer;
use crate::stream::clock::Clock;
use crate::stream::session::StreamSession;
use crate::stream::video::{VideoLimits, VideoProcessor};
use crate::stream::{AudioItem, ProcessorHandle, VideoItem};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Closing,
    Closed,
}

/// Per-session orchestration parameters.
#[derive(Clone)]
pub struct OrchestratorConfig {
    pub idle_timeout: Duration,
    /// How long a processor gets to exit after cancellation.
    pub stop_deadline: Duration,
    /// Idle watchdog tick period.
    pub watchdog_period: Duration,
    pub audio_buffer_capacity: usize,
    pub audio: AudioWindowConfig,
    pub video: VideoLimits,
    /// Configuration block advertised in `session_started`.
    pub started_config: SessionConfigInfo,
}

/// Drives one session: consumes the peer-event stream, owns the buffers and
/// processor tasks, and runs the ordered shutdown.
pub struct SessionOrchestrator {
    session: Arc<StreamSession>,
    emitter: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
    router: Arc<dyn Infer>,
    analyzer: Arc<dyn AcousticAnalyzer>,
    classifier: Option<Arc<LazyClassifier>>,
    registry: Arc<PeerRegistry>,
    cancel: CancellationToken,
    config: OrchestratorConfig,
}

impl SessionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<StreamSession>,
        emitter: Arc<EventEmitter>,
        clock: Arc<dyn Clock>,
        router: Arc<dyn Infer>,
        analyzer: Arc<dyn AcousticAnalyzer>,
        classifier: Option<Arc<LazyClassifier>>,
        registry: Arc<PeerRegistry>,
        cancel: CancellationToken,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            session,
            emitter,
            clock,
            router,
            analyzer,
            classifier,
            registry,
            cancel,
            config,
        }
    }

    /// Run the session to completion. Consumes the orchestrator; the
    /// session is Closed when this returns.
    pub async fn run(self, mut events: mpsc::Receiver<PeerEvent>, peer: Arc<dyn PeerConnection>) {
        let session_id = self.session.session_id().to_string();
        let mut state = SessionState::Created;
        let mut video: Option<(Arc<MediaBuffer<VideoItem>>, ProcessorHandle)> = None;
        let mut audio: Option<(Arc<MediaBuffer<AudioItem>>, ProcessorHandle)> = None;
        let mut attached: HashSet<TrackKind> = HashSet::new();
        let mut ended: HashSet<TrackKind> = HashSet::new();
        let mut started_sent = false;
        let mut close_code = CloseCode::Normal;

        let idle_timeout_ms = self.config.idle_timeout.as_millis() as u64;
        let mut watchdog = tokio::time::interval(self.config.watchdog_period);
        watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!(session_id = %session_id, "session cancelled");
                    break;
                }
                _ = watchdog.tick() => {
                    if self.session.is_idle(self.clock.now_ms(), idle_timeout_ms) {
                        info!(session_id = %session_id, "idle timeout exceeded; closing session");
                        break;
                    }
                }
                event = events.recv() => {
                    match event {
                        None | Some(PeerEvent::Closed) => {
                            debug!(session_id = %session_id, "peer connection closed");
                            break;
                        }
                        Some(PeerEvent::Frame(payload)) => {
                            self.session.record_received();
                            let arrival_ms = self.clock.now_ms();
                            match payload {
                                MediaPayload::Video(payload) => {
                                    if video.is_none() {
                                        video = Some(self.start_video());
                                        attached.insert(TrackKind::Video);
                                        advance(&mut state, SessionState::Active, &session_id);
                                    }
                                    let (buffer, _) = video.as_ref().unwrap();
                                    if buffer.put(VideoItem { arrival_ms, payload }) {
                                        self.session.record_dropped(1);
                                    }
                                }
                                MediaPayload::Audio(payload) => {
                                    if audio.is_none() {
                                        audio = Some(self.start_audio());
                                        attached.insert(TrackKind::Audio);
                                        advance(&mut state, SessionState::Active, &session_id);
                                    }
                                    let (buffer, _) = audio.as_ref().unwrap();
                                    if buffer.put(AudioItem { arrival_ms, payload }) {
                                        self.session.record_dropped(1);
                                    }
                                }
                            }
                        }
                        Some(PeerEvent::TrackEnded(kind)) => {
                            debug!(session_id = %session_id, kind = ?kind, "track ended");
                            ended.insert(kind);
                            // All attached tracks must end before the
                            // session closes; one surviving track keeps it
                            // alive.
                            if !attached.is_empty() && attached.iter().all(|k| ended.contains(k)) {
                                info!(session_id = %session_id, "all tracks ended");
                                break;
                            }
                        }
                        Some(PeerEvent::ChannelOpen(channel)) => {
                            if channel.label() != crate::rtc::DETECTIONS_CHANNEL_LABEL {
                                debug!(session_id = %session_id, label = channel.label(), "ignoring unrelated data channel");
                                continue;
                            }
                            debug!(session_id = %session_id, "detections channel open");
                            self.emitter.attach(channel);
                            if !started_sent {
                                self.emitter.emit(&ServerEvent::SessionStarted {
                                    session_id: session_id.clone(),
                                    timestamp_ms: self.clock.now_ms(),
                                    config: self.config.started_config.clone(),
                                });
                                started_sent = true;
                            }
                        }
                        Some(PeerEvent::ChannelMessage(text)) => {
                            self.handle_channel_message(&text);
                        }
                    }
                }
            }
        }

        advance(&mut state, SessionState::Closing, &session_id);

        // Stop the processors within the bounded deadline. The audio
        // processor flushes its partial window on the way out.
        let mut clean = true;
        if let Some((_, handle)) = video.take() {
            clean &= handle.stop(self.config.stop_deadline).await;
        }
        if let Some((_, handle)) = audio.take() {
            clean &= handle.stop(self.config.stop_deadline).await;
        }
        if !clean {
            close_code = CloseCode::Internal;
            self.emitter.emit(&ServerEvent::Error {
                session_id: session_id.clone(),
                timestamp_ms: self.clock.now_ms(),
                frame_index: None,
                error_code: ErrorCode::InternalError,
                error_message: "processor failed to stop cleanly".to_string(),
                severity: Severity::Error,
            });
        }

        let summary = self.session.close();
        self.emitter.emit(&ServerEvent::StreamClosed {
            session_id: session_id.clone(),
            timestamp_ms: self.clock.now_ms(),
            summary: StreamSummary::from(&summary),
        });

        debug!(session_id = %session_id, code = close_code.as_u16(), "releasing peer connection");
        peer.close(close_code);
        self.registry.unregister(&session_id);
        advance(&mut state, SessionState::Closed, &session_id);
    }

    fn start_video(&self) -> (Arc<MediaBuffer<VideoItem>>, ProcessorHandle) {
        let buffer = Arc::new(MediaBuffer::video());
        let handle = VideoProcessor::spawn(
            self.session.clone(),
            buffer.clone(),
            self.router.clone(),
            self.emitter.clone(),
            self.clock.clone(),
            self.config.video.clone(),
            self.cancel.child_token(),
        );
        (buffer, handle)
    }

    fn start_audio(&self) -> (Arc<MediaBuffer<AudioItem>>, ProcessorHandle) {
        let buffer = Arc::new(MediaBuffer::audio(self.config.audio_buffer_capacity));
        let handle = AudioProcessor::spawn(
            self.session.clone(),
            buffer.clone(),
            self.analyzer.clone(),
            self.classifier.clone(),
            self.emitter.clone(),
            self.clock.clone(),
            self.config.audio.clone(),
            self.cancel.child_token(),
        );
        (buffer, handle)
    }

    fn handle_channel_message(&self, text: &str) {
        match serde_json::from_str::<crate::events::ClientMessage>(text) {
            Ok(crate::events::ClientMessage::Ping) => {
                self.emitter.emit(&ServerEvent::Pong {
                    timestamp_ms: self.clock.now_ms(),
                });
            }
            Err(_) => {
                warn!(
                    session_id = %self.session.session_id(),
                    "ignoring unrecognized data channel message"
                );
            }
        }
    }
}

fn advance(state: &mut SessionState, next: SessionState, session_id: &str) {
    if *state != next {
        debug!(session_id = %session_id, from = ?state, to = ?next, "session state");
        *state = next;
    }
}
