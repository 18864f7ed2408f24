//! # Lazy Model Loading
//!
//! One-shot, single-flight initialization for heavy model handles (local
//! detector, emotion classifier). Construction runs at most once per
//! process, on the blocking pool, on first use; concurrent first uses await
//! the same attempt. The outcome, a shared handle or `None` after a failed
//! load, is immutable afterwards, so a broken model is reported once and
//! never hammered again.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Constructor for a lazily loaded handle; invoked at most once.
pub type Factory<T> = Arc<dyn Fn() -> Result<Arc<T>> + Send + Sync>;

/// Lazily initialized, process-shared handle to a loaded model.
pub struct LazyHandle<T: ?Sized + Send + Sync + 'static> {
    name: String,
    factory: Factory<T>,
    cell: OnceCell<Option<Arc<T>>>,
}

impl<T: ?Sized + Send + Sync + 'static> LazyHandle<T> {
    pub fn new(name: impl Into<String>, factory: Factory<T>) -> Self {
        Self {
            name: name.into(),
            factory,
            cell: OnceCell::new(),
        }
    }

    /// The loaded handle, or `None` if loading failed.
    ///
    /// ## Single-flight Guarantee:
    /// The cell serializes concurrent first calls: exactly one runs the
    /// factory, everyone else awaits the shared outcome.
    pub async fn get(&self) -> Option<Arc<T>> {
        self.cell
            .get_or_init(|| async {
                let factory = self.factory.clone();
                match tokio::task::spawn_blocking(move || factory()).await {
                    Ok(Ok(handle)) => {
                        info!(model = %self.name, "model loaded");
                        Some(handle)
                    }
                    Ok(Err(e)) => {
                        warn!(model = %self.name, error = %e, "model failed to load");
                        None
                    }
                    Err(e) => {
                        warn!(model = %self.name, error = %e, "model loader panicked");
                        None
                    }
                }
            })
            .await
            .clone()
    }

    /// Whether a load attempt has completed (successfully or not).
    pub fn initialized(&self) -> bool {
        self.cell.initialized()
    }
}
