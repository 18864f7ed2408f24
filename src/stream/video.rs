//! # Video Processor
//!
//! The per-session video consumer loop: pull the freshest frame from the
//! single-slot buffer, decode, resize, score quality, run inference, and
//! emit one detection event.
//!
//! ## Failure Semantics:
//! Every per-frame failure (oversize payload, decode error, inference
//! error) is isolated: it is logged, surfaced to the client as a
//! severity-`warning` error event, and the loop continues. Error events do
//! not consume frame indices. Only cancellation ends the loop.

use crate::events::{DetectionMetadata, ErrorCode, EventEmitter, ServerEvent, Severity, Wound};
use crate::inference::Infer;
use crate::media::{decode, quality};
use crate::stream::buffer::MediaBuffer;
use crate::stream::clock::Clock;
use crate::stream::session::StreamSession;
use crate::stream::{ProcessorHandle, VideoItem};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Frame validation limits, fixed per deployment.
#[derive(Debug, Clone)]
pub struct VideoLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_frame_bytes: usize,
    pub blur_warning_threshold: f32,
}

/// Consumes frames from the video buffer and emits detection events.
pub struct VideoProcessor {
    session: Arc<StreamSession>,
    buffer: Arc<MediaBuffer<VideoItem>>,
    router: Arc<dyn Infer>,
    emitter: Arc<EventEmitter>,
    clock: Arc<dyn Clock>,
    limits: VideoLimits,

    /// Index of the next successfully processed frame. Strictly increasing
    /// by one per processed frame; untouched by error events.
    frame_index: u64,
    /// Buffer drop count at the last emitted event, for the
    /// `frames_dropped_since_last` delta.
    drops_at_last_emit: u64,
}

impl VideoProcessor {
    /// Spawn the consumer loop as a task owned by the returned handle.
    pub fn spawn(
        session: Arc<StreamSession>,
        buffer: Arc<MediaBuffer<VideoItem>>,
        router: Arc<dyn Infer>,
        emitter: Arc<EventEmitter>,
        clock: Arc<dyn Clock>,
        limits: VideoLimits,
        cancel: CancellationToken,
    ) -> ProcessorHandle {
        let processor = Self {
            session,
            buffer,
            router,
            emitter,
            clock,
            limits,
            frame_index: 0,
            drops_at_last_emit: 0,
        };
        let join = tokio::spawn(processor.run(cancel.clone()));
        ProcessorHandle::new(cancel, join)
    }

    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => break,
                item = self.buffer.get() => item,
            };
            self.process(item).await;
        }
        debug!(session_id = %self.session.session_id(), "video processor stopped");
    }

    async fn process(&mut self, item: VideoItem) {
        let started = Instant::now();

        let payload_bytes = item.payload.byte_len();
        if payload_bytes > self.limits.max_frame_bytes {
            warn!(
                session_id = %self.session.session_id(),
                bytes = payload_bytes,
                limit = self.limits.max_frame_bytes,
                "frame exceeds size limit"
            );
            self.emit_error(
                ErrorCode::FrameTooLarge,
                format!(
                    "frame of {} bytes exceeds limit of {} bytes",
                    payload_bytes, self.limits.max_frame_bytes
                ),
            );
            return;
        }

        let image = match decode(&item.payload) {
            Ok(image) => image,
            Err(e) => {
                warn!(session_id = %self.session.session_id(), error = %e, "frame decode failed");
                self.emit_error(ErrorCode::InvalidImageFormat, e.to_string());
                return;
            }
        };

        let image = quality::resize_to_ceiling(image, self.limits.max_width, self.limits.max_height);
        let image = quality::assess(image, self.limits.blur_warning_threshold);

        let detections = match self.router.infer(&image).await {
            Ok(detections) => detections,
            Err(e) => {
                error!(session_id = %self.session.session_id(), error = %e, "inference dispatch failed");
                self.emit_error(ErrorCode::InferenceFailed, e.to_string());
                return;
            }
        };

        let dropped_total = self.buffer.dropped();
        let frames_dropped_since_last = dropped_total - self.drops_at_last_emit;
        self.drops_at_last_emit = dropped_total;

        let wounds: Vec<Wound> = detections.iter().map(Wound::from).collect();
        if !wounds.is_empty() {
            self.session.record_detection(wounds.len() as u64);
        }

        let frame_index = self.frame_index;
        self.session.record_frame();
        self.frame_index += 1;

        let event = ServerEvent::detection(
            self.session.session_id().to_string(),
            self.clock.now_ms(),
            frame_index,
            wounds,
            DetectionMetadata {
                quality_warning: image.quality_warning.clone(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                frames_dropped_since_last,
            },
        );
        self.emitter.emit(&event);
    }

    fn emit_error(&self, error_code: ErrorCode, error_message: String) {
        self.emitter.emit(&ServerEvent::Error {
            session_id: self.session.session_id().to_string(),
            timestamp_ms: self.clock.now_ms(),
            frame_index: Some(self.frame_index),
            error_code,
            error_message,
            severity: Severity::Warning,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::{Detection, InferenceError};
    use crate::media::{DecodedImage, VideoPayload};
    use crate::rtc::testing::MockChannel;
    use crate::stream::clock::MockClock;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedInfer(Vec<Detection>);

    #[async_trait]
    impl Infer for FixedInfer {
        async fn infer(&self, _image: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
            Ok(self.0.clone())
        }
    }

    struct BrokenInfer;

    #[async_trait]
    impl Infer for BrokenInfer {
        async fn infer(&self, _image: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
            Err(InferenceError::Worker("worker pool collapsed".to_string()))
        }
    }

    fn cut_detection() -> Detection {
        Detection {
            id: 0,
            cls: "cut".to_string(),
            bbox: [120.5, 200.3, 45.0, 60.0],
            confidence: 0.92,
            type_confidence: 0.88,
        }
    }

    fn raw_frame(width: u32, height: u32) -> VideoItem {
        VideoItem {
            arrival_ms: 0,
            payload: VideoPayload::Raw {
                width,
                height,
                data: vec![128u8; (width * height * 3) as usize],
            },
        }
    }

    fn limits() -> VideoLimits {
        VideoLimits {
            max_width: 1280,
            max_height: 720,
            max_frame_bytes: 10 * 1024 * 1024,
            blur_warning_threshold: 100.0,
        }
    }

    struct Harness {
        session: Arc<StreamSession>,
        buffer: Arc<MediaBuffer<VideoItem>>,
        channel: Arc<MockChannel>,
        handle: ProcessorHandle,
    }

    fn start(router: Arc<dyn Infer>, limits: VideoLimits) -> Harness {
        let clock = Arc::new(MockClock::default());
        let session = Arc::new(StreamSession::new("s-video".to_string(), clock.clone()));
        let buffer = Arc::new(MediaBuffer::video());
        let channel = MockChannel::open();
        let emitter = Arc::new(EventEmitter::new());
        emitter.attach(channel.clone());

        let handle = VideoProcessor::spawn(
            session.clone(),
            buffer.clone(),
            router,
            emitter,
            clock,
            limits,
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
    async fn test_single_clean_frame() {
        let harness = start(Arc::new(FixedInfer(vec![cut_detection()])), limits());
        harness.buffer.put(raw_frame(640, 480));

        let events = wait_for_events(&harness.channel, 1).await;
        let event = &events[0];
        assert_eq!(event["event_type"], "detection_event");
        assert_eq!(event["frame_index"], 0);
        assert_eq!(event["has_wounds"], true);
        assert_eq!(event["wounds"][0]["cls"], "cut");
        assert_eq!(event["metadata"]["frames_dropped_since_last"], 0);

        assert_eq!(harness.session.frame_count(), 1);
        assert_eq!(harness.session.detection_count(), 1);
        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_drop_under_load() {
        let clock = Arc::new(MockClock::default());
        let session = Arc::new(StreamSession::new("s-video".to_string(), clock.clone()));
        let buffer = Arc::new(MediaBuffer::video());
        let channel = MockChannel::open();
        let emitter = Arc::new(EventEmitter::new());
        emitter.attach(channel.clone());

        // Producer races ahead of a stalled consumer: five puts, the buffer
        // keeps only the newest frame.
        for _ in 0..5 {
            if buffer.put(raw_frame(64, 48)) {
                session.record_dropped(1);
            }
        }
        assert_eq!(buffer.dropped(), 4);

        let handle = VideoProcessor::spawn(
            session.clone(),
            buffer.clone(),
            Arc::new(FixedInfer(vec![])),
            emitter,
            clock,
            limits(),
            CancellationToken::new(),
        );

        let events = wait_for_events(&channel, 1).await;
        // Let the consumer idle briefly to prove no further events appear.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(channel.sent().len(), 1);

        assert_eq!(events[0]["metadata"]["frames_dropped_since_last"], 4);
        assert_eq!(session.dropped_count(), 4);
        assert_eq!(session.frame_count(), 1);
        assert!(handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_corrupt_frame_emits_warning_and_recovers() {
        let harness = start(Arc::new(FixedInfer(vec![cut_detection()])), limits());

        harness.buffer.put(VideoItem {
            arrival_ms: 0,
            payload: VideoPayload::Encoded(vec![0xde, 0xad, 0xbe, 0xef]),
        });
        let events = wait_for_events(&harness.channel, 1).await;
        assert_eq!(events[0]["event_type"], "error");
        assert_eq!(events[0]["error_code"], "INVALID_IMAGE_FORMAT");
        assert_eq!(events[0]["severity"], "warning");
        assert_eq!(harness.session.frame_count(), 0);

        // The next valid frame still gets index 0.
        harness.buffer.put(raw_frame(32, 32));
        let events = wait_for_events(&harness.channel, 2).await;
        assert_eq!(events[1]["event_type"], "detection_event");
        assert_eq!(events[1]["frame_index"], 0);
        assert_eq!(harness.session.frame_count(), 1);

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_oversize_frame_rejected() {
        let mut limits = limits();
        limits.max_frame_bytes = 1024;
        let harness = start(Arc::new(FixedInfer(vec![])), limits);

        harness.buffer.put(raw_frame(64, 64)); // 12 KiB payload
        let events = wait_for_events(&harness.channel, 1).await;
        assert_eq!(events[0]["error_code"], "FRAME_TOO_LARGE");
        assert_eq!(events[0]["severity"], "warning");
        assert_eq!(harness.session.frame_count(), 0);

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_inference_dispatch_failure_emits_warning() {
        let harness = start(Arc::new(BrokenInfer), limits());

        harness.buffer.put(raw_frame(32, 32));
        let events = wait_for_events(&harness.channel, 1).await;
        assert_eq!(events[0]["error_code"], "INFERENCE_FAILED");
        assert_eq!(events[0]["severity"], "warning");
        assert_eq!(harness.session.frame_count(), 0);

        // The loop survives and processes the next frame.
        harness.buffer.put(raw_frame(32, 32));
        let events = wait_for_events(&harness.channel, 2).await;
        assert_eq!(events[1]["error_code"], "INFERENCE_FAILED");

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_frame_indices_strictly_increase() {
        let harness = start(Arc::new(FixedInfer(vec![])), limits());

        for i in 0..3 {
            harness.buffer.put(raw_frame(16, 16));
            let events = wait_for_events(&harness.channel, i + 1).await;
            assert_eq!(events[i]["frame_index"], i as u64);
        }
        assert_eq!(harness.session.frame_count(), 3);

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_blurry_frame_carries_quality_warning() {
        // A flat frame has zero Laplacian variance, well under the default
        // threshold.
        let harness = start(Arc::new(FixedInfer(vec![])), limits());
        harness.buffer.put(raw_frame(32, 32));

        let events = wait_for_events(&harness.channel, 1).await;
        let warning = events[0]["metadata"]["quality_warning"].as_str().unwrap();
        assert!(warning.starts_with("blurry:score="));

        assert!(harness.handle.stop(Duration::from_secs(1)).await);
    }
}
