//! # Wound Inference
//!
//! Detection backends and the router that dispatches between them.
//!
//! ## Key Components:
//! - **Router** (`router`): remote-first dispatch with local fallback and a
//!   unified, threshold-filtered result shape
//! - **Remote backend** (`remote`): HTTP detection service client
//! - **Local backend** (`local`): lazily loaded in-process detector behind a
//!   trait seam
//!
//! The router is stateless with respect to sessions: its output is a pure
//! function of the image and the configuration.

pub mod local;
pub mod remote;
pub mod router;

pub use router::{Infer, InferenceRouter};

use serde::Deserialize;

/// A wound hypothesis in its authoritative internal form.
///
/// ## Invariants:
/// - `id` is 0-based within the frame
/// - `cls` is non-empty
/// - `bbox` is absolute-pixel `[x, y, w, h]`
/// - `confidence >= configured threshold` (lower-confidence predictions are
///   discarded during normalization)
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub id: usize,
    pub cls: String,
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub type_confidence: f32,
}

/// A prediction as produced by a backend, before normalization.
///
/// Backends disagree on field names and bbox encodings; this shape accepts
/// the union and the router normalizes it into [`Detection`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawPrediction {
    /// Some backends deliver the box as a single `[x, y, w, h]` array.
    #[serde(default)]
    pub bbox: Option<[f32; 4]>,

    #[serde(default)]
    pub x: Option<f32>,
    #[serde(default)]
    pub y: Option<f32>,
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,

    #[serde(rename = "class", alias = "cls", alias = "label", default)]
    pub cls: Option<String>,

    #[serde(default)]
    pub confidence: f32,

    /// Wound-type confidence where the backend distinguishes it from the
    /// detection confidence.
    #[serde(rename = "class_confidence", alias = "type_confidence", default)]
    pub type_confidence: Option<f32>,
}

impl RawPrediction {
    /// Absolute-pixel `[x, y, w, h]`, whichever encoding the backend used.
    pub fn bbox_xywh(&self) -> [f32; 4] {
        if let Some(bbox) = self.bbox {
            return bbox;
        }
        [
            self.x.unwrap_or(0.0),
            self.y.unwrap_or(0.0),
            self.width.unwrap_or(0.0),
            self.height.unwrap_or(0.0),
        ]
    }
}

/// Internal router failure. Backend errors are handled inside the router
/// (fallback, then empty result); this surfaces only unexpected worker
/// failures such as a panicked blocking task.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("inference worker failed: {0}")]
    Worker(String),
}
