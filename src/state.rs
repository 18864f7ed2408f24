//! # Application State
//!
//! Shared state every HTTP handler can reach: the loaded configuration,
//! request metrics, the server start time and the process-wide peer
//! registry.
//!
//! ## Thread Safety:
//! Configuration and metrics live behind `Arc<RwLock<_>>` so many handlers
//! can read concurrently while updates stay exclusive. The peer registry
//! carries its own lock.

use crate::config::AppConfig;
use crate::rtc::PeerRegistry;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// State shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub metrics: Arc<RwLock<AppMetrics>>,
    pub registry: Arc<PeerRegistry>,
    pub start_time: Instant,
}

/// Request counters accumulated since process start.
#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Per-endpoint statistics keyed as `"METHOD /path"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let registry = Arc::new(PeerRegistry::new(
            config.performance.max_concurrent_sessions,
        ));
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            registry,
            start_time: Instant::now(),
        }
    }

    /// Copy of the current configuration; cloning releases the lock
    /// immediately.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().unwrap().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().unwrap().error_count += 1;
    }

    /// Record one completed request against its endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Live streaming sessions, straight from the registry.
    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }

    /// Consistent copy of the metrics for serialization.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
