//! Server entry point: configuration, logging, HTTP routes and graceful
//! shutdown. The streaming pipeline itself lives in the library crate.

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wound_stream_backend::config::AppConfig;
use wound_stream_backend::signaling::{self, StreamEngine};
use wound_stream_backend::state::AppState;
use wound_stream_backend::{health, middleware, rtc};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        max_sessions = config.performance.max_concurrent_sessions,
        "starting wound-stream-backend"
    );

    let app_state = AppState::new(config.clone());
    let registry = app_state.registry.clone();
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    // The WebRTC stack is linked by the deployment; without one, signaling
    // refuses offers and the HTTP surface still serves health and metrics.
    let backend: Arc<dyn rtc::SignalingBackend> = Arc::new(rtc::DisabledSignaling);
    warn!("no signaling backend linked; POST /offer will answer 503");
    let engine = web::Data::new(StreamEngine::from_config(&config, backend));

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .app_data(engine.clone())
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .route("/offer", web::post().to(signaling::offer))
            .route("/health", web::get().to(health::health_check))
            .route("/ready", web::get().to(health::readiness))
            .route("/metrics", web::get().to(health::detailed_metrics))
    })
    .bind(&bind_addr)?
    .run();

    info!(addr = %bind_addr, "HTTP server listening");

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "server error"),
                Err(e) => error!(error = %e, "server task error"),
            }
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            // Close every live session first so clients get their
            // stream_closed summaries, then stop accepting connections.
            registry.shutdown_all();
            server_handle.stop(true).await;
        }
    }

    info!("server stopped");
    Ok(())
}

/// Initialize structured logging. `LOG_LEVEL` sets the crate-level filter;
/// `RUST_LOG` overrides everything when present.
fn init_tracing() -> Result<()> {
    let default_filter = match std::env::var("LOG_LEVEL") {
        Ok(level) => format!("wound_stream_backend={},actix_web=info", level),
        Err(_) => "wound_stream_backend=info,actix_web=info".to_string(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Wait for SIGTERM or SIGINT.
async fn shutdown_signal() {
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .expect("failed to install SIGTERM handler");
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigint.recv() => info!("received SIGINT"),
    }
}
