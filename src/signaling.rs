//! # Signaling Endpoint
//!
//! `POST /offer` is the only HTTP route the streaming core owns. The
//! handler validates the SDP offer envelope, enforces the concurrent
//! session cap, hands negotiation to the deployment's opaque
//! [`SignalingBackend`], and spawns the session orchestrator over the
//! negotiated peer. The session exists from this point on; the
//! `session_started` event follows once the data channel opens.
//!
//! Status codes: 200 with an answer on success, 400 on a malformed offer,
//! 503 above the session cap or without a signaling backend.

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::events::EventEmitter;
use crate::inference::remote::RemoteDetector;
use crate::inference::{Infer, InferenceRouter};
use crate::rtc::{
    CloseCode, PeerRegistry, RegisteredPeer, SdpOffer, SignalingBackend, SignalingError,
};
use crate::state::AppState;
use crate::stream::clock::{new_session_id, Clock, SystemClock};
use crate::stream::orchestrator::{OrchestratorConfig, SessionOrchestrator};
use crate::stream::session::StreamSession;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a new session needs beyond the HTTP state: the signaling
/// backend and the process-shared pipeline collaborators.
pub struct StreamEngine {
    pub backend: Arc<dyn SignalingBackend>,
    pub clock: Arc<dyn Clock>,
    pub router: Arc<dyn Infer>,
    pub analyzer: Arc<dyn crate::audio::AcousticAnalyzer>,
    pub classifier: Option<Arc<crate::audio::emotion::LazyClassifier>>,
}

impl StreamEngine {
    /// Wire the engine from configuration: one shared HTTP client for
    /// remote inference, the spectral analyzer, and the lazily loaded
    /// model handles.
    pub fn from_config(config: &AppConfig, backend: Arc<dyn SignalingBackend>) -> Self {
        let mut router = InferenceRouter::new(config.stream.confidence_threshold);

        if let Some(remote_config) = config.remote_config() {
            let client = reqwest::Client::new();
            router = router.with_remote(RemoteDetector::new(
                client,
                remote_config,
                config.stream.confidence_threshold,
            ));
        }
        if let Some(local) = config.local_detector() {
            router = router.with_local(local);
        }
        if !router.has_backend() {
            warn!("no inference backend configured; every frame will report zero detections");
        }

        Self {
            backend,
            clock: Arc::new(SystemClock),
            router: Arc::new(router),
            analyzer: Arc::new(crate::audio::SpectralAnalyzer::default()),
            classifier: config.emotion_classifier(),
        }
    }
}

fn orchestrator_config(config: &AppConfig) -> OrchestratorConfig {
    OrchestratorConfig {
        idle_timeout: Duration::from_secs(config.stream.idle_timeout_sec),
        stop_deadline: Duration::from_secs(2),
        watchdog_period: Duration::from_secs(1),
        audio_buffer_capacity: config.audio.buffer_capacity,
        audio: config.audio_window(),
        video: config.video_limits(),
        started_config: config.started_config(),
    }
}

/// `POST /offer` handler.
pub async fn offer(
    state: web::Data<AppState>,
    engine: web::Data<StreamEngine>,
    body: web::Json<SdpOffer>,
) -> AppResult<HttpResponse> {
    let offer = body.into_inner();
    if offer.kind != "offer" {
        return Err(AppError::BadRequest(format!(
            "expected type \"offer\", got \"{}\"",
            offer.kind
        )));
    }
    if offer.sdp.trim().is_empty() {
        return Err(AppError::BadRequest("offer carries no SDP".to_string()));
    }

    let registry: &Arc<PeerRegistry> = &state.registry;
    if registry.at_capacity() {
        return Err(AppError::ServiceUnavailable(format!(
            "concurrent session cap of {} reached",
            registry.max_sessions()
        )));
    }

    let negotiated = engine.backend.negotiate(offer).await.map_err(|e| match e {
        SignalingError::MalformedOffer(msg) => AppError::BadRequest(msg),
        SignalingError::Unavailable => {
            AppError::ServiceUnavailable("no signaling backend linked".to_string())
        }
        SignalingError::Backend(err) => AppError::Internal(err.to_string()),
    })?;

    let config = state.get_config();
    let session_id = new_session_id();
    let session = Arc::new(StreamSession::new(session_id.clone(), engine.clock.clone()));
    let cancel = CancellationToken::new();

    // The handler's capacity check above is advisory; the registry enforces
    // the cap under its lock. Losing the race for the last slot closes the
    // freshly negotiated peer with the policy code.
    if let Err(e) = registry.register(
        &session_id,
        RegisteredPeer {
            peer: negotiated.peer.clone(),
            cancel: cancel.clone(),
        },
    ) {
        negotiated.peer.close(CloseCode::OverCapacity);
        return Err(AppError::ServiceUnavailable(e.to_string()));
    }

    let orchestrator = SessionOrchestrator::new(
        session,
        Arc::new(EventEmitter::new()),
        engine.clock.clone(),
        engine.router.clone(),
        engine.analyzer.clone(),
        engine.classifier.clone(),
        registry.clone(),
        cancel,
        orchestrator_config(&config),
    );
    tokio::spawn(orchestrator.run(negotiated.events, negotiated.peer));

    info!(
        session_id = %session_id,
        active_sessions = registry.active_count(),
        "session negotiated"
    );
    Ok(HttpResponse::Ok().json(negotiated.answer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::testing::MockPeer;
    use crate::rtc::{NegotiatedPeer, PeerEvent, SdpAnswer};
    use actix_web::{test, App};
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    /// Backend that answers every offer and parks the peer-event stream.
    struct AcceptingBackend;

    #[async_trait]
    impl SignalingBackend for AcceptingBackend {
        async fn negotiate(&self, offer: SdpOffer) -> Result<NegotiatedPeer, SignalingError> {
            if offer.sdp.contains("garbage") {
                return Err(SignalingError::MalformedOffer("unparseable SDP".to_string()));
            }
            // Keep the session alive by leaking the sender; the test app is
            // torn down with the runtime.
            let (tx, rx) = mpsc::channel::<PeerEvent>(8);
            std::mem::forget(tx);
            Ok(NegotiatedPeer {
                answer: SdpAnswer {
                    sdp: "v=0\r\nanswer".to_string(),
                    kind: "answer".to_string(),
                },
                peer: MockPeer::new(),
                events: rx,
            })
        }
    }

    fn engine(backend: Arc<dyn SignalingBackend>) -> web::Data<StreamEngine> {
        web::Data::new(StreamEngine::from_config(&AppConfig::default(), backend))
    }

    macro_rules! offer_app {
        ($state:expr, $backend:expr) => {
            test::init_service(
                App::new()
                    .app_data($state.clone())
                    .app_data(engine($backend))
                    .route("/offer", web::post().to(offer)),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_offer_returns_answer() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = offer_app!(state, Arc::new(AcceptingBackend));

        let request = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "v=0\r\noffer", "type": "offer"}))
            .to_request();
        let response: serde_json::Value = test::call_and_read_body_json(&app, request).await;

        assert_eq!(response["type"], "answer");
        assert!(response["sdp"].as_str().unwrap().contains("answer"));
        assert_eq!(state.active_sessions(), 1);
    }

    #[actix_web::test]
    async fn test_wrong_type_is_bad_request() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = offer_app!(state, Arc::new(AcceptingBackend));

        let request = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "v=0", "type": "answer"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 400);
    }

    #[actix_web::test]
    async fn test_empty_sdp_is_bad_request() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = offer_app!(state, Arc::new(AcceptingBackend));

        let request = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "  ", "type": "offer"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 400);
    }

    #[actix_web::test]
    async fn test_backend_rejection_is_bad_request() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = offer_app!(state, Arc::new(AcceptingBackend));

        let request = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "garbage", "type": "offer"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 400);
    }

    #[actix_web::test]
    async fn test_over_capacity_is_service_unavailable() {
        let mut config = AppConfig::default();
        config.performance.max_concurrent_sessions = 1;
        let state = web::Data::new(AppState::new(config));
        let app = offer_app!(state, Arc::new(AcceptingBackend));

        let first = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "v=0", "type": "offer"}))
            .to_request();
        assert!(test::call_service(&app, first).await.status().is_success());
        assert_eq!(state.active_sessions(), 1);

        let second = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "v=0", "type": "offer"}))
            .to_request();
        let response = test::call_service(&app, second).await;
        assert_eq!(response.status(), 503);
    }

    #[actix_web::test]
    async fn test_disabled_backend_is_service_unavailable() {
        let state = web::Data::new(AppState::new(AppConfig::default()));
        let app = offer_app!(state, Arc::new(crate::rtc::DisabledSignaling));

        let request = test::TestRequest::post()
            .uri("/offer")
            .set_json(serde_json::json!({"sdp": "v=0", "type": "offer"}))
            .to_request();
        let response = test::call_service(&app, request).await;
        assert_eq!(response.status(), 503);
    }
}
