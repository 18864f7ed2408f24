//! # Health and Metrics Endpoints
//!
//! - `GET /health`: liveness with a metrics snapshot
//! - `GET /ready`: readiness; reports whether any inference path is
//!   configured so orchestration can hold traffic on a blank deployment
//! - `GET /metrics`: per-endpoint request statistics

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();

    HttpResponse::Ok().json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "wound-stream-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port,
        },
        "sessions": {
            "active": state.active_sessions(),
            "max": config.performance.max_concurrent_sessions,
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
        },
        "inference": {
            "remote_configured": config.remote_config().is_some(),
            "local_enabled": config.inference.local_enabled,
        },
    }))
}

pub async fn readiness(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();

    // A deployment with neither backend still runs, but every frame would
    // legally yield zero detections; surface that before traffic arrives.
    let mut missing = Vec::new();
    if config.remote_config().is_none() {
        missing.push("INFERENCE_REMOTE_URL / INFERENCE_REMOTE_KEY");
    }
    if !config.inference.local_enabled {
        missing.push("INFERENCE_LOCAL_ENABLED");
    }
    let ready = missing.len() < 2;

    HttpResponse::Ok().json(json!({
        "ready": ready,
        "missing": if ready { Vec::new() } else { missing },
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoints = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoints.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "active_sessions": state.active_sessions(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            },
        },
        "endpoints": endpoints,
    }))
}
