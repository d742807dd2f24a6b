//! Storage seam for trial sessions.

use super::error::TrialError;
use crate::models::{ResourceKind, TrialSession, UsageDecision};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// Persistence for trial sessions.
///
/// Implementations own all mutation of session counters. Every method that
/// touches counters applies the daily rollover for `today` first.
#[async_trait]
pub trait TrialStore: Send + Sync {
    /// Find the session for `(ip_address, visitor_id)` or create it.
    /// A supplied `user_id` is attached to the session.
    async fn find_or_create(
        &self,
        ip_address: &str,
        visitor_id: &str,
        user_id: Option<&str>,
    ) -> Result<TrialSession, TrialError>;

    /// Read-only lookup by identity. Never creates a row.
    async fn find_by_identity(
        &self,
        ip_address: &str,
        visitor_id: &str,
    ) -> Result<Option<TrialSession>, TrialError>;

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrialSession>, TrialError>;

    /// Atomically compare the counter for `kind` against `limit` and
    /// increment it when it still fits.
    async fn check_and_increment(
        &self,
        session_id: Uuid,
        kind: ResourceKind,
        limit: i32,
    ) -> Result<UsageDecision, TrialError>;

    /// Atomically add consumed voice seconds, saturating at `cap`.
    async fn add_voice_seconds(
        &self,
        session_id: Uuid,
        seconds: i32,
        cap: i32,
    ) -> Result<TrialSession, TrialError>;

    /// Block the session until `until`. Counters are left untouched.
    async fn block_session(
        &self,
        session_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<TrialSession, TrialError>;

    async fn health_check(&self) -> Result<(), TrialError>;
}

/// Current usage day (UTC).
pub fn usage_today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Apply a check-and-increment to an in-hand session.
///
/// Shared by every store so the decision rule lives in one place.
pub(crate) fn apply_increment(
    session: &mut TrialSession,
    kind: ResourceKind,
    limit: i32,
    today: NaiveDate,
) -> UsageDecision {
    session.roll_over(today);

    let current = session.used(kind);
    if current >= limit {
        return UsageDecision::limit_reached(kind);
    }

    *session.used_mut(kind) = current + 1;
    session.updated_at = Utc::now();
    UsageDecision::allow(limit - (current + 1))
}

/// Apply a voice-seconds addition to an in-hand session.
pub(crate) fn apply_voice_seconds(
    session: &mut TrialSession,
    seconds: i32,
    cap: i32,
    today: NaiveDate,
) {
    session.roll_over(today);
    // Never decreases, even if the cap was lowered after usage was recorded.
    let total = session.voice_seconds_used.saturating_add(seconds.max(0));
    session.voice_seconds_used = total.min(cap).max(session.voice_seconds_used);
    session.updated_at = Utc::now();
}
