//! Trial routes. Handlers only translate HTTP to gate calls and back.

use crate::dtos::{
    BlockSessionRequest, BlockSessionResponse, TrialDeniedResponse, VoiceUsageRequest,
    TRIAL_LIMIT_REACHED, TRIAL_TOOL_LIMIT_REACHED, TRIAL_VOICE_LIMIT_REACHED,
};
use crate::middleware::OptionalUserId;
use crate::models::{short_id, CheckOutcome, ResourceKind, TrialCheckResult, UsageSnapshot};
use crate::services::RequestContext;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

fn request_context(state: &AppState, headers: &HeaderMap) -> RequestContext {
    RequestContext::from_headers(headers, &state.config.visitor_cookie)
}

fn check_response(result: TrialCheckResult, kind: ResourceKind) -> Response {
    if result.allowed {
        return (StatusCode::OK, Json(result)).into_response();
    }
    if result.outcome == CheckOutcome::AbuseBlocked {
        let body = TrialDeniedResponse::abuse_blocked(result.reason);
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    let code = match kind {
        ResourceKind::Chat => TRIAL_LIMIT_REACHED,
        ResourceKind::Tool => TRIAL_TOOL_LIMIT_REACHED,
    };
    let mut body = TrialDeniedResponse::new(code, result.reason);
    body.chats_remaining = result.chats_remaining;
    body.tools_remaining = result.tools_remaining;

    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// POST /v1/trial/session
///
/// Issues the visitor cookie when missing and find-or-creates the session.
pub async fn provision_session(
    State(state): State<AppState>,
    user: OptionalUserId,
    headers: HeaderMap,
    mut jar: CookieJar,
) -> Result<Response, AppError> {
    if user.is_authenticated() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let mut ctx = request_context(&state, &headers);
    if ctx.visitor_id.is_none() {
        let visitor_id = Uuid::new_v4().to_string();
        jar = jar.add(
            Cookie::build((state.config.visitor_cookie.clone(), visitor_id.clone()))
                .path("/")
                .http_only(true)
                .secure(true)
                .same_site(SameSite::Lax)
                .max_age(time::Duration::days(365))
                .build(),
        );
        ctx = ctx.with_visitor(&visitor_id);
    }

    let snapshot: UsageSnapshot = state
        .gate
        .provision_session(&ctx, user.as_deref())
        .await?
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Trial session not provisioned")))?;

    tracing::info!(
        session = %short_id(snapshot.session_id),
        "Trial session provisioned"
    );

    Ok((jar, Json(snapshot)).into_response())
}

/// GET /v1/trial/session
pub async fn get_session_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UsageSnapshot>, AppError> {
    let ctx = request_context(&state, &headers);
    state
        .gate
        .session_usage(&ctx)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No trial session for this visitor")))
}

/// POST /v1/trial/chat
pub async fn check_chat(
    State(state): State<AppState>,
    user: OptionalUserId,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&state, &headers);
    let result = state
        .gate
        .check_trial_for_anonymous(&ctx, user.is_authenticated(), user.as_deref())
        .await;
    check_response(result, ResourceKind::Chat)
}

/// POST /v1/trial/tool
pub async fn check_tool(
    State(state): State<AppState>,
    user: OptionalUserId,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&state, &headers);
    let result = state
        .gate
        .check_tool_for_anonymous(&ctx, user.is_authenticated(), user.as_deref())
        .await;
    check_response(result, ResourceKind::Tool)
}

/// GET /v1/trial/voice
pub async fn check_voice(
    State(state): State<AppState>,
    user: OptionalUserId,
    headers: HeaderMap,
) -> Response {
    let ctx = request_context(&state, &headers);
    let result = state
        .gate
        .check_voice_limit(&ctx, user.is_authenticated(), user.as_deref())
        .await;

    if result.allowed {
        return (StatusCode::OK, Json(result)).into_response();
    }

    let mut body = TrialDeniedResponse::new(TRIAL_VOICE_LIMIT_REACHED, result.reason);
    body.voice_seconds_remaining = result.voice_seconds_remaining;
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

/// POST /v1/trial/voice/usage
pub async fn record_voice_usage(
    State(state): State<AppState>,
    user: OptionalUserId,
    headers: HeaderMap,
    Json(req): Json<VoiceUsageRequest>,
) -> Result<Response, AppError> {
    req.validate()?;

    if user.is_authenticated() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let ctx = request_context(&state, &headers);
    let snapshot = state
        .gate
        .record_voice_usage(&ctx, req.seconds)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("No trial session for this visitor")))?;

    Ok(Json(snapshot).into_response())
}

/// Header carrying the operator key for admin routes.
pub const ADMIN_API_KEY_HEADER: &str = "X-Admin-Api-Key";

fn require_admin_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = state.config.admin_api_key.as_deref() else {
        return Err(AppError::NotFound(anyhow::anyhow!("Admin API is disabled")));
    };
    let provided = headers
        .get(ADMIN_API_KEY_HEADER)
        .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing X-Admin-Api-Key header")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid X-Admin-Api-Key header")))?;

    if provided != expected {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Invalid admin API key")));
    }
    Ok(())
}

/// POST /v1/trial/sessions/:session_id/block
///
/// Operator action: chat and tool checks answer 429 until the block lapses.
pub async fn block_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<BlockSessionRequest>,
) -> Result<Json<BlockSessionResponse>, AppError> {
    require_admin_api_key(&state, &headers)?;
    req.validate()?;

    let session = state.gate.block_session(session_id, req.hours).await?;
    let blocked_until = session
        .blocked_until
        .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Block was not stored")))?;

    Ok(Json(BlockSessionResponse {
        session_id: session.id,
        blocked_until,
    }))
}
