//! # Inference Router
//!
//! Dispatches a decoded frame to the configured detection backends and
//! returns a unified, threshold-filtered detection list:
//!
//! 1. Remote backend first, when configured.
//! 2. On any remote failure (network, timeout, non-2xx, unparseable body):
//!    log a warning and fall back to the local model, when enabled.
//! 3. On local load or inference failure: log and return the empty list.
//!
//! The router holds no session state; its output depends only on the image
//! and the configuration. Both legs go through one normalization step so
//! filtering and field defaults are identical regardless of which backend
//! answered.

use crate::inference::local::LazyDetector;
use crate::inference::remote::RemoteDetector;
use crate::inference::{Detection, InferenceError, RawPrediction};
use crate::media::DecodedImage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Detection dispatch as seen by the video processor.
#[async_trait]
pub trait Infer: Send + Sync {
    /// Locate wounds in `image`.
    ///
    /// Backend failures are absorbed internally (fallback, then empty
    /// list); an `Err` signals an internal worker failure only.
    async fn infer(&self, image: &DecodedImage) -> Result<Vec<Detection>, InferenceError>;
}

/// Remote-first inference router with optional local fallback.
pub struct InferenceRouter {
    remote: Option<RemoteDetector>,
    local: Option<Arc<LazyDetector>>,
    confidence_threshold: f32,
}

impl InferenceRouter {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            remote: None,
            local: None,
            confidence_threshold,
        }
    }

    pub fn with_remote(mut self, remote: RemoteDetector) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_local(mut self, local: Arc<LazyDetector>) -> Self {
        self.local = Some(local);
        self
    }

    /// Whether any backend is configured at all.
    pub fn has_backend(&self) -> bool {
        self.remote.is_some() || self.local.is_some()
    }

    /// Normalize raw backend predictions into [`Detection`] values.
    ///
    /// Applies the confidence threshold (inclusive), substitutes a
    /// non-empty class label, defaults `type_confidence` to `confidence`,
    /// and re-assigns 0-based ids across the kept detections.
    fn normalize(&self, predictions: Vec<RawPrediction>) -> Vec<Detection> {
        predictions
            .into_iter()
            .filter(|p| p.confidence >= self.confidence_threshold)
            .enumerate()
            .map(|(id, p)| Detection {
                id,
                cls: p
                    .cls
                    .clone()
                    .filter(|c| !c.is_empty())
                    .unwrap_or_else(|| "unknown".to_string()),
                bbox: p.bbox_xywh(),
                confidence: p.confidence,
                type_confidence: p.type_confidence.unwrap_or(p.confidence),
            })
            .collect()
    }

    async fn infer_local(&self, image: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
        let Some(lazy) = &self.local else {
            return Ok(Vec::new());
        };
        let Some(detector) = lazy.get().await else {
            // Load failure was logged by the loader.
            return Ok(Vec::new());
        };

        let image = image.clone();
        match tokio::task::spawn_blocking(move || detector.detect(&image)).await {
            Ok(Ok(predictions)) => Ok(self.normalize(predictions)),
            Ok(Err(e)) => {
                warn!(error = %e, "local inference failed");
                Ok(Vec::new())
            }
            Err(e) => Err(InferenceError::Worker(e.to_string())),
        }
    }
}

#[async_trait]
impl Infer for InferenceRouter {
    async fn infer(&self, image: &DecodedImage) -> Result<Vec<Detection>, InferenceError> {
        if let Some(remote) = &self.remote {
            match remote.detect(image).await {
                Ok(predictions) => return Ok(self.normalize(predictions)),
                Err(e) => {
                    warn!(error = %e, "remote inference failed, falling back to local model");
                }
            }
        }

        self.infer_local(image).await
    }
}
