//! # Local Detection Backend
//!
//! Trait seam for the in-process fallback model. The gateway links no model
//! runtime of its own: the concrete detector (a YOLO runtime, an ONNX
//! session, a vendor SDK) is supplied by the embedding deployment as a
//! [`LocalDetector`] factory. The shared [`LazyDetector`] handle loads it
//! at most once per process; a failed load is logged once and the router
//! then treats the backend as absent.

use crate::inference::RawPrediction;
use crate::loader::{Factory, LazyHandle};
use crate::media::DecodedImage;
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// An in-process detection model.
///
/// `detect` is CPU-bound and synchronous; the router runs it on the
/// blocking worker pool.
pub trait LocalDetector: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Detect wounds in `image`, returning raw predictions in absolute
    /// pixel coordinates.
    fn detect(&self, image: &DecodedImage) -> Result<Vec<RawPrediction>>;
}

/// Lazily loaded, process-shared detector handle.
pub type LazyDetector = LazyHandle<dyn LocalDetector>;

/// Constructor for a local detector; invoked at most once per process.
pub type DetectorFactory = Factory<dyn LocalDetector>;

/// Factory for the weights path named in the configuration.
///
/// Validates that the weights exist up front. The runtime that consumes
/// them is registered by the deployment; an unclaimed weights file is a
/// load failure, and the router degrades to the remote backend or an empty
/// result as the error contract requires.
pub fn weights_factory(path: PathBuf) -> DetectorFactory {
    Arc::new(move || {
        if !path.exists() {
            return Err(anyhow!("weights file not found: {}", path.display()));
        }
        Err(anyhow!(
            "no detector runtime registered for {}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDetector;

    impl LocalDetector for StubDetector {
        fn name(&self) -> &str {
            "stub"
        }

        fn detect(&self, _image: &DecodedImage) -> Result<Vec<RawPrediction>> {
            Ok(vec![RawPrediction {
                cls: Some("cut".to_string()),
                confidence: 0.9,
                ..Default::default()
            }])
        }
    }

    #[tokio::test]
    async fn test_detector_loads_through_lazy_handle() {
        let lazy = LazyDetector::new(
            "stub",
            Arc::new(|| Ok(Arc::new(StubDetector) as Arc<dyn LocalDetector>)),
        );

        let detector = lazy.get().await.expect("stub loads");
        let image = DecodedImage::new(2, 2, vec![0u8; 12]);
        let predictions = detector.detect(&image).unwrap();
        assert_eq!(predictions.len(), 1);
        assert_eq!(predictions[0].cls.as_deref(), Some("cut"));
    }

    #[tokio::test]
    async fn test_weights_factory_missing_file() {
        let lazy = LazyDetector::new(
            "weights",
            weights_factory(PathBuf::from("/nonexistent/weights.bin")),
        );
        assert!(lazy.get().await.is_none());
    }

    #[tokio::test]
    async fn test_weights_factory_unclaimed_file() {
        let dir = std::env::temp_dir().join("wound-stream-backend-test-weights");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("model.bin");
        std::fs::write(&path, b"not a real model").unwrap();

        let lazy = LazyDetector::new("weights", weights_factory(path.clone()));
        // The file exists but no runtime claims it: load fails, sticky.
        assert!(lazy.get().await.is_none());

        let _ = std::fs::remove_file(path);
    }
}
