//! # Data-Channel Wire Protocol
//!
//! Server → client messages carried as UTF-8 JSON text frames on the
//! `detections` data channel. One tagged enum is the single authoritative
//! definition of the protocol; every event serializes from here and nowhere
//! else.
//!
//! ## Message Types:
//! - `session_started`: sent once when the channel opens, advertises the
//!   session configuration (including the bbox coordinate convention)
//! - `detection_event`: per processed video frame
//! - `audio_event`: per analyzed audio window
//! - `error`: per recovered or terminal failure
//! - `stream_closed`: terminal session summary
//! - `pong`: reply to a client `ping`

pub mod emitter;

pub use emitter::EventEmitter;

use crate::audio::emotion::EmotionScore;
use crate::inference::Detection;
use crate::stream::session::SessionSummary;
use serde::{Deserialize, Serialize};

/// Wire error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidImageFormat,
    FrameTooLarge,
    InferenceFailed,
    InternalError,
}

/// `warning`: frame skipped, stream continues. `error`: session terminating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

/// Absolute-pixel bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// One wound on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wound {
    pub id: usize,
    /// Mirror of `id`, kept for clients that key on this name.
    pub wound_id: usize,
    pub cls: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
    pub type_confidence: f32,
}

impl From<&Detection> for Wound {
    fn from(detection: &Detection) -> Self {
        let [x, y, width, height] = detection.bbox;
        Self {
            id: detection.id,
            wound_id: detection.id,
            cls: detection.cls.clone(),
            bbox: BoundingBox {
                x,
                y,
                width,
                height,
            },
            confidence: detection.confidence,
            type_confidence: detection.type_confidence,
        }
    }
}

/// Per-frame metadata attached to a detection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetadata {
    pub quality_warning: Option<String>,
    pub processing_time_ms: u64,
    pub frames_dropped_since_last: u64,
}

/// Per-window acoustic analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioAnalysis {
    pub risk_score: f32,
    pub mfcc_mean: f32,
    pub energy: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emotion: Option<EmotionScore>,
}

/// Session configuration advertised in `session_started`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfigInfo {
    pub max_resolution: MaxResolution,
    pub confidence_threshold: f32,
    pub idle_timeout_sec: u64,
    /// Coordinate convention for `wounds[].bbox`; this deployment uses
    /// absolute pixels.
    pub bbox_format: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxResolution {
    pub width: u32,
    pub height: u32,
}

/// Terminal summary carried by `stream_closed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub total_frames_received: u64,
    pub total_frames_processed: u64,
    pub total_frames_dropped: u64,
    pub total_detections: u64,
    pub duration_sec: f64,
}

impl From<&SessionSummary> for StreamSummary {
    fn from(summary: &SessionSummary) -> Self {
        Self {
            total_frames_received: summary.total_received,
            total_frames_processed: summary.frame_count,
            total_frames_dropped: summary.dropped_count,
            total_detections: summary.detection_count,
            duration_sec: summary.duration_s,
        }
    }
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum ServerEvent {
    #[serde(rename = "session_started")]
    SessionStarted {
        session_id: String,
        timestamp_ms: u64,
        config: SessionConfigInfo,
    },

    #[serde(rename = "detection_event")]
    Detection {
        session_id: String,
        timestamp_ms: u64,
        frame_index: u64,
        has_wounds: bool,
        wounds: Vec<Wound>,
        metadata: DetectionMetadata,
    },

    #[serde(rename = "audio_event")]
    Audio {
        session_id: String,
        timestamp_ms: u64,
        analysis: AudioAnalysis,
        audio_seconds: f64,
        frames: u64,
        window_seconds: f64,
    },

    #[serde(rename = "error")]
    Error {
        session_id: String,
        timestamp_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_index: Option<u64>,
        error_code: ErrorCode,
        error_message: String,
        severity: Severity,
    },

    #[serde(rename = "stream_closed")]
    StreamClosed {
        session_id: String,
        timestamp_ms: u64,
        summary: StreamSummary,
    },

    #[serde(rename = "pong")]
    Pong { timestamp_ms: u64 },
}

impl ServerEvent {
    /// Build a detection event; `has_wounds` is derived from the wound
    /// list, never set independently.
    pub fn detection(
        session_id: String,
        timestamp_ms: u64,
        frame_index: u64,
        wounds: Vec<Wound>,
        metadata: DetectionMetadata,
    ) -> Self {
        ServerEvent::Detection {
            session_id,
            timestamp_ms,
            frame_index,
            has_wounds: !wounds.is_empty(),
            wounds,
            metadata,
        }
    }
}

/// Client → server messages on the data channel. Track frames carry all
/// media payloads; the only application message is a keepalive ping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "ping")]
    Ping,
}
