//! Trial Service - anonymous trial usage accounting with atomic daily limits.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    metrics::metrics_middleware, security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::TrialConfig;
use crate::services::{SessionResolver, TrialGate, TrialStore, UsageLedger, UsagePublisher};

#[derive(Clone)]
pub struct AppState {
    pub config: TrialConfig,
    pub gate: Arc<TrialGate>,
    pub store: Arc<dyn TrialStore>,
    pub publisher: Arc<dyn UsagePublisher>,
}

impl AppState {
    /// Wire the resolver, ledger and gate over one shared store.
    pub fn new(
        config: TrialConfig,
        store: Arc<dyn TrialStore>,
        publisher: Arc<dyn UsagePublisher>,
    ) -> Self {
        let resolver = SessionResolver::new(store.clone());
        let ledger = UsageLedger::new(store.clone(), publisher.clone(), config.limits);
        let gate = Arc::new(TrialGate::new(resolver, ledger));

        Self {
            config,
            gate,
            store,
            publisher,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    let trial_routes = Router::new()
        .route(
            "/v1/trial/session",
            post(handlers::trial::provision_session).get(handlers::trial::get_session_usage),
        )
        .route("/v1/trial/chat", post(handlers::trial::check_chat))
        .route("/v1/trial/tool", post(handlers::trial::check_tool))
        .route("/v1/trial/voice", get(handlers::trial::check_voice))
        .route(
            "/v1/trial/voice/usage",
            post(handlers::trial::record_voice_usage),
        )
        .route(
            "/v1/trial/sessions/:session_id/block",
            post(handlers::trial::block_session),
        );

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics))
        .merge(trial_routes)
        .with_state(state)
        // Add metrics middleware
        .layer(from_fn(metrics_middleware))
        // Add tracing layer
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    user_id = tracing::field::Empty,
                )
            }),
        )
        // Add tracing middleware for request_id
        .layer(from_fn(request_id_middleware))
        // Add security headers middleware
        .layer(from_fn(security_headers_middleware))
}
