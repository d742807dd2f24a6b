//! Maps an incoming request to a durable trial session.

use super::error::TrialError;
use super::store::TrialStore;
use crate::models::TrialSession;
use axum::http::HeaderMap;
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use tracing::instrument;

/// Default name of the long-lived visitor cookie.
pub const DEFAULT_VISITOR_COOKIE: &str = "trial_visitor_id";

/// Client IP used when no proxy header is present.
pub const UNKNOWN_CLIENT_IP: &str = "unknown";

/// Request data the resolver needs, taken from cookies and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub visitor_id: Option<String>,
    pub client_ip: String,
}

impl RequestContext {
    pub fn new(visitor_id: Option<&str>, client_ip: &str) -> Self {
        Self {
            visitor_id: visitor_id
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            client_ip: client_ip.to_string(),
        }
    }

    pub fn from_headers(headers: &HeaderMap, visitor_cookie: &str) -> Self {
        let jar = CookieJar::from_headers(headers);
        let visitor_id = jar.get(visitor_cookie).map(|c| c.value().to_string());
        Self::new(visitor_id.as_deref(), &client_ip(headers))
    }

    /// Same request with a freshly issued visitor id.
    pub fn with_visitor(mut self, visitor_id: &str) -> Self {
        self.visitor_id = Some(visitor_id.to_string());
        self
    }
}

/// First `x-forwarded-for` value, then `x-real-ip`, then `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    let first_value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    first_value("x-forwarded-for")
        .or_else(|| first_value("x-real-ip"))
        .unwrap_or_else(|| UNKNOWN_CLIENT_IP.to_string())
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn TrialStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn TrialStore>) -> Self {
        Self { store }
    }

    /// Resolve the trial session for a request.
    ///
    /// `None` for authenticated users and for visitors without a cookie.
    /// Store errors are returned to the caller unchanged.
    #[instrument(skip(self, ctx, user_id), fields(client_ip = %ctx.client_ip))]
    pub async fn resolve(
        &self,
        ctx: &RequestContext,
        is_authenticated: bool,
        user_id: Option<&str>,
    ) -> Result<Option<TrialSession>, TrialError> {
        if is_authenticated {
            return Ok(None);
        }

        let Some(visitor_id) = ctx.visitor_id.as_deref() else {
            return Ok(None);
        };

        let session = self
            .store
            .find_or_create(&ctx.client_ip, visitor_id, user_id)
            .await?;
        Ok(Some(session))
    }

    /// Look up the session without creating one.
    pub async fn lookup(&self, ctx: &RequestContext) -> Result<Option<TrialSession>, TrialError> {
        match ctx.visitor_id.as_deref() {
            Some(visitor_id) => {
                self.store
                    .find_by_identity(&ctx.client_ip, visitor_id)
                    .await
            }
            None => Ok(None),
        }
    }
}
