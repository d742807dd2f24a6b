use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::convert::Infallible;

/// Header set by the trusted frontend for signed-in users.
pub const USER_ID_HEADER: &str = "X-User-ID";

/// Optional user id for trial routes.
///
/// Present means the caller is authenticated and bypasses trial limits.
/// Absent means an anonymous visitor. The header is only trusted behind the
/// frontend, which strips it from public traffic.
#[derive(Debug, Clone, Default)]
pub struct OptionalUserId(pub Option<String>);

impl OptionalUserId {
    pub fn is_authenticated(&self) -> bool {
        self.0.is_some()
    }

    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUserId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        if let Some(id) = user_id.as_deref() {
            tracing::Span::current().record("user_id", id);
        }

        Ok(OptionalUserId(user_id))
    }
}
