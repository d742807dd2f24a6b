//! Test helpers for trial-service integration tests.
//!
//! Builds the router over an in-process store and a recording publisher so
//! tests run without PostgreSQL or Redis.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use trial_service::{
    build_router,
    config::TrialConfig,
    models::TrialLimits,
    services::{MemoryStore, RecordingPublisher, DEFAULT_VISITOR_COOKIE},
    AppState,
};

pub const CLIENT_IP: &str = "203.0.113.7";
pub const ADMIN_KEY: &str = "test-admin-key";

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_limits(TrialLimits::default())
    }

    /// App with the admin routes enabled under [`ADMIN_KEY`].
    pub fn with_admin() -> Self {
        let mut config = TrialConfig::in_memory(TrialLimits::default());
        config.admin_api_key = Some(ADMIN_KEY.to_string());
        Self::with_config(config)
    }

    pub fn with_limits(limits: TrialLimits) -> Self {
        Self::with_config(TrialConfig::in_memory(limits))
    }

    pub fn with_config(config: TrialConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(RecordingPublisher::new());
        let state = AppState::new(config, store.clone(), publisher.clone());

        Self {
            router: build_router(state.clone()),
            store,
            publisher,
            state,
        }
    }
}

/// Request builder with the client IP and optional visitor cookie and user.
pub fn request(
    method: &str,
    uri: &str,
    visitor_id: Option<&str>,
    user_id: Option<&str>,
) -> axum::http::request::Builder {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP);

    if let Some(visitor) = visitor_id {
        builder = builder.header(
            "cookie",
            format!("{}={}", DEFAULT_VISITOR_COOKIE, visitor),
        );
    }
    if let Some(user) = user_id {
        builder = builder.header("X-User-ID", user);
    }
    builder
}

pub fn empty(builder: axum::http::request::Builder) -> Request<Body> {
    builder.body(Body::empty()).unwrap()
}

pub fn json(builder: axum::http::request::Builder, body: serde_json::Value) -> Request<Body> {
    builder
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
