//! # Speech Emotion Classification
//!
//! Optional classifier seam for the audio pipeline. When a deployment
//! registers a classifier, each analyzed window's WAV image is scored and
//! the dominant emotion rides along in the audio event; without one the
//! event simply omits the field.
//!
//! Loading mirrors the local detector: one lazy, single-flight attempt per
//! process, with failures logged once and treated as "no classifier".

use crate::loader::{Factory, LazyHandle};
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A scored emotion label, e.g. `{"label": "distress", "score": 0.81}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionScore {
    pub label: String,
    pub score: f32,
}

/// An in-process speech emotion model.
///
/// `classify` is CPU-bound and synchronous; callers run it on the blocking
/// worker pool alongside the rest of the window analysis.
pub trait EmotionClassifier: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Score the dominant emotion in a 16-bit mono WAV image.
    fn classify(&self, wav_bytes: &[u8]) -> Result<EmotionScore>;
}

/// Lazily loaded, process-shared classifier handle.
pub type LazyClassifier = LazyHandle<dyn EmotionClassifier>;

/// Constructor for an emotion classifier; invoked at most once per process.
pub type ClassifierFactory = Factory<dyn EmotionClassifier>;
