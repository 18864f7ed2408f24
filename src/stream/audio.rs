//! # Audio Processor
//!
//! The per-session audio consumer loop: accumulate track frames into a
//! window, and once the batch threshold is reached hand the window to the
//! blocking pool for PCM assembly, spectral analysis and optional emotion
//! classification, then emit one audio event.
//!
//! On stop, whatever is left in the buffer and the open window is processed
//! once more so the tail of the stream is not lost.

use crate::audio::emotion::{EmotionScore, LazyClassifier};
use crate::audio::pcm::{self, AudioFramePayload};
use crate::audio::{assemble_window, AcousticAnalyzer, AcousticFeatures};
use crate::events::{AudioAnalysis, ErrorCode, EventEmitter, ServerEvent, Severity};
use crate::stream::buffer::MediaBuffer;
use crate::stream::clock::Clock;
use crate::stream::session::StreamSession;
use crate::stream::{AudioItem, ProcessorHandle};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Window batching parameters, fixed per deployment.
#[derive(Debug, Clone)]
pub struct AudioWindowConfig {
    /// Nominal analysis window length reported in events.
    pub window_seconds: f64,
    /// Number of buffered items that triggers an analysis pass.
    pub batch_size: usize,
    /// Uniform sample rate windows are assembled at.
    pub sample_rate: u32,
}

/// Consumes audio frames in windows and emits audio events.
pub struct AudioProcessor {
    session: Arc<StreamSession>,
    buffer: Arc<MediaBuffer<AudioItem>>,
    analyzer: Arc<dyn AcousticAnalyzer>,
    classifier: Option<Arc<LazyClassifier>>,
    emitter: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
    config: AudioWindowConfig,
}

impl AudioProcessor {
    /// Spawn the consumer loop as a task owned by the returned handle.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        session: Arc<StreamSession>,
        buffer: Arc<MediaBuffer<AudioItem>>,
        analyzer: Arc<dyn AcousticAnalyzer>,
        classifier: Option<Arc<LazyClassifier>>,
        emitter: Arc<EventEmitter>,
        clock: Arc<dyn Clock>,
        config: AudioWindowConfig,
        cancel: CancellationToken,
    ) -> ProcessorHandle {
        let processor = Self {
            session,
            buffer,
            analyzer,
            classifier,
            emitter,
            clock,
            config,
        };
        let join = tokio::spawn(processor.run(cancel.clone()));
        ProcessorHandle::new(cancel, join)
    }

    async fn run(self, cancel: CancellationToken) {
        let mut window: Vec<AudioItem> = Vec::with_capacity(self.config.batch_size);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Track ended or session closing: flush the partial
                    // window exactly once before exiting.
                    window.extend(self.buffer.drain());
                    if !window.is_empty() {
                        self.process_window(std::mem::take(&mut window)).await;
                    }
                    break;
                }
                item = self.buffer.get() => {
                    window.push(item);
                    if window.len() >= self.config.batch_size {
                        self.process_window(std::mem::take(&mut window)).await;
                    }
                }
            }
        }
        debug!(session_id = %self.session.session_id(), "audio processor stopped");
    }

    async fn process_window(&self, items: Vec<AudioItem>) {
        let frames = items.len() as u64;

        // Resolve the classifier handle before entering the blocking
        // section; loading is itself single-flighted.
        let classifier = match &self.classifier {
            Some(lazy) => lazy.get().await,
            None => None,
        };

        let analyzer = self.analyzer.clone();
        let sample_rate = self.config.sample_rate;
        let analysis = tokio::task::spawn_blocking(move || -> anyhow::Result<WindowOutcome> {
            let payloads: Vec<AudioFramePayload> =
                items.into_iter().map(|item| item.payload).collect();
            let window = assemble_window(&payloads, sample_rate)?;
            let features = analyzer.analyze(&window);

            let emotion = classifier.and_then(|classifier| {
                let wav = match pcm::to_wav_bytes(&window) {
                    Ok(wav) => wav,
                    Err(e) => {
                        debug!(error = %e, "WAV materialization failed; skipping emotion");
                        return None;
                    }
                };
                match classifier.classify(&wav) {
                    Ok(score) => Some(score),
                    Err(e) => {
                        debug!(error = %e, "emotion classification failed");
                        None
                    }
                }
            });

            Ok(WindowOutcome {
                features,
                seconds: window.seconds,
                emotion,
            })
        })
        .await;

        match analysis {
            Ok(Ok(outcome)) => {
                self.session.record_audio(frames, outcome.seconds);
                self.emitter.emit(&ServerEvent::Audio {
                    session_id: self.session.session_id().to_string(),
                    timestamp_ms: self.clock.now_ms(),
                    analysis: AudioAnalysis {
                        risk_score: outcome.features.risk_score,
                        mfcc_mean: outcome.features.mfcc_mean,
                        energy: outcome.features.energy,
                        emotion: outcome.emotion,
                    },
                    audio_seconds: outcome.seconds,
                    frames,
                    window_seconds: self.config.window_seconds,
                });
            }
            Ok(Err(e)) => {
                warn!(session_id = %self.session.session_id(), error = %e, "audio window analysis failed");
                self.emit_warning(e.to_string());
            }
            Err(e) => {
                error!(session_id = %self.session.session_id(), error = %e, "audio analysis worker panicked");
                self.emit_warning("audio analysis worker failed".to_string());
            }
        }
    }

    fn emit_warning(&self, error_message: String) {
        self.emitter.emit(&ServerEvent::Error {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: self.clock.now_ms(),
            frame_index: None,
            error_code: ErrorCode::InternalError,
            error_message,
            severity: Severity::Warning,
        });
    }
}

struct WindowOutcome {
    features: AcousticFeatures,
    seconds: f64,
    emotion: Option<EmotionScore>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::emotion::EmotionClassifier;
    use crate::audio::pcm::PcmWindow;
    use crate::rtc::testing::MockChannel;
    use crate::stream::clock::MockClock;
    use std::time::Duration;

    /// Analyzer that ignores the signal and reports fixed features.
    struct FixedAnalyzer {
        mfcc_mean: f32,
        energy: f32,
    }

    impl AcousticAnalyzer for FixedAnalyzer {
        fn analyze(&self, _window: &PcmWindow) -> AcousticFeatures {
            AcousticFeatures::from_parts(self.mfcc_mean, self.energy)
        }
    }

    struct FixedClassifier;

    impl EmotionClassifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn classify(&self, _wav_bytes: &[u8]) -> anyhow::Result<EmotionScore> {
            Ok(EmotionScore {
                label: "distress".to_string(),
                score: 0.81,
            })
        }
    }

    /// 100 ms of 48 kHz mono PCM.
    fn audio_item() -> AudioItem {
        let mut data = Vec::with_capacity(4800 * 2);
        for _ in 0..4800 {
            data.extend_from_slice(&1000i16.to_le_bytes());
        }
        AudioItem {
            arrival_ms: 0,
            payload: AudioFramePayload {
                sample_rate: 48_000,
                channels: 1,
                data,
            },
        }
    }

    fn config() -> AudioWindowConfig {
        AudioWindowConfig {
            window_seconds: 1.0,
            batch_size: 10,
            sample_rate: 48_000,
        }
    }

    struct Harness {
        session: Arc<StreamSession>,
        buffer: Arc<MediaBuffer<AudioItem>>,
        channel: Arc<MockChannel>,
        handle: ProcessorHandle,
    }

    fn start(
        analyzer: Arc<dyn AcousticAnalyzer>,
        classifier: Option<Arc<LazyClassifier>>,
        config: AudioWindowConfig,
    ) -> Harness {
        let clock = Arc::new(MockClock::default());
        let session = Arc::new(StreamSession::new("s-audio".to_string(), clock.clone()));
        let buffer = Arc::new(MediaBuffer::audio(1024));
        let channel = MockChannel::open();
        let emitter = Arc::new(EventEmitter::new());
        emitter.attach(channel.clone());

        let handle = AudioProcessor::spawn(
            session.clone(),
            buffer.clone(),
            analyzer,
            classifier,
            emitter,
            clock,
            config,
            CancellationToken::new(),
        );

        Harness {
            session,
            buffer,
            channel,
            handle,
        }
    }

    async fn wait_for_events(channel: &MockChannel, count: usize) -> Vec<serde_json::Value> {
        for _ in 0..200 {
            if channel.sent().len() >= count {
                return channel.sent_events();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} events, saw {}: {:?}",
            count,
            channel.sent().len(),
            channel.sent()
        );
    }

    #[tokio::test]
    async fn test_full_window_produces_audio_event() {
        let harness = start(
            Arc::new(FixedAnalyzer {
                mfcc_mean: 10.0,
                energy: 0.05,
            }),
            None,
            config(),
        );

        // Ten 100 ms items complete one window.
        for _ in 0..10 {
            harness.buffer.put(audio_item());
        }

        let events = wait_for_events(&harness.channel, 1).await;
        let event = &events[0];
        assert_eq!(event["event_type"], "audio_event");
        assert!((event["analysis"]["risk_score"].as_f64().unwrap() - 0.5).abs() < 1e-6);
        assert!((event["audio_seconds"].as_f64().unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(event["frames"], 10);
        assert_eq!(event["window_seconds"], 1.0);
        assert!(event["analysis"].get("emotion").is_none());

        assert_eq!(harness.session.audio_frame_count(), 10);
        assert!((harness.session.audio_seconds() - 1.0).abs() < 1e-3);
        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_partial_window_flushed_on_stop() {
        let harness = start(
            Arc::new(FixedAnalyzer {
                mfcc_mean: 1.0,
                energy: 0.1,
            }),
            None,
            config(),
        );

        for _ in 0..3 {
            harness.buffer.put(audio_item());
        }
        // Let the consumer pull the items into its open window.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(harness.channel.sent().is_empty());

        assert!(harness.handle.stop(Duration::from_secs(1)).await);

        let events = harness.channel.sent_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["frames"], 3);
        assert!((events[0]["audio_seconds"].as_f64().unwrap() - 0.3).abs() < 1e-6);
        assert_eq!(harness.session.audio_frame_count(), 3);
    }

    #[tokio::test]
    async fn test_emotion_included_when_classifier_present() {
        let classifier = Arc::new(LazyClassifier::new(
            "fixed",
            Arc::new(|| Ok(Arc::new(FixedClassifier) as Arc<dyn EmotionClassifier>)),
        ));
        let harness = start(
            Arc::new(FixedAnalyzer {
                mfcc_mean: 2.0,
                energy: 0.2,
            }),
            Some(classifier),
            config(),
        );

        for _ in 0..10 {
            harness.buffer.put(audio_item());
        }

        let events = wait_for_events(&harness.channel, 1).await;
        assert_eq!(events[0]["analysis"]["emotion"]["label"], "distress");
        assert!(
            (events[0]["analysis"]["emotion"]["score"].as_f64().unwrap() - 0.81).abs() < 1e-6
        );
        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_bad_window_emits_internal_warning() {
        let harness = start(
            Arc::new(FixedAnalyzer {
                mfcc_mean: 1.0,
                energy: 0.1,
            }),
            None,
            AudioWindowConfig {
                batch_size: 1,
                ..config()
            },
        );

        harness.buffer.put(AudioItem {
            arrival_ms: 0,
            payload: AudioFramePayload {
                sample_rate: 48_000,
                channels: 2,
                data: vec![0u8; 6], // misaligned for stereo 16-bit
            },
        });

        let events = wait_for_events(&harness.channel, 1).await;
        assert_eq!(events[0]["event_type"], "error");
        assert_eq!(events[0]["error_code"], "INTERNAL_ERROR");
        assert_eq!(events[0]["severity"], "warning");
        assert_eq!(harness.session.audio_frame_count(), 0);

        // Loop survives the failure.
        harness.buffer.put(audio_item());
        let events = wait_for_events(&harness.channel, 2).await;
        assert_eq!(events[1]["event_type"], "audio_event");

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_multiple_windows_in_sequence() {
        let harness = start(
            Arc::new(FixedAnalyzer {
                mfcc_mean: 1.0,
                energy: 0.5,
            }),
            None,
            AudioWindowConfig {
                batch_size: 2,
                ..config()
            },
        );

        for _ in 0..6 {
            harness.buffer.put(audio_item());
        }

        let events = wait_for_events(&harness.channel, 3).await;
        assert_eq!(events.len(), 3);
        for event in &events {
            assert_eq!(event["frames"], 2);
        }
        assert_eq!(harness.session.audio_frame_count(), 6);

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }
}
