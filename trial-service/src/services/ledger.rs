//! Atomic usage ledger: the only writer of trial counters.

use super::error::TrialError;
use super::metrics::{record_decision, record_publish_failure};
use super::publisher::{TrialUsageEvent, UsagePublisher};
use super::store::TrialStore;
use crate::models::{short_id, ResourceKind, TrialLimits, TrialSession, UsageDecision};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn TrialStore>,
    publisher: Arc<dyn UsagePublisher>,
    limits: TrialLimits,
}

impl UsageLedger {
    pub fn new(
        store: Arc<dyn TrialStore>,
        publisher: Arc<dyn UsagePublisher>,
        limits: TrialLimits,
    ) -> Self {
        Self {
            store,
            publisher,
            limits,
        }
    }

    pub fn limits(&self) -> &TrialLimits {
        &self.limits
    }

    /// Check the daily cap for `kind` and consume one unit if it fits.
    ///
    /// Store failures are returned as errors, never as an allowance.
    #[instrument(skip(self), fields(session = %short_id(session_id), resource = %kind))]
    pub async fn check_and_increment(
        &self,
        session_id: Uuid,
        kind: ResourceKind,
    ) -> Result<UsageDecision, TrialError> {
        let limit = self.limits.limit_for(kind);
        let decision = self
            .store
            .check_and_increment(session_id, kind, limit)
            .await?;

        record_decision(kind, decision.allowed);

        if decision.allowed {
            debug!(remaining = decision.remaining, "Trial usage recorded");
            let used = limit - decision.remaining;
            self.publish(TrialUsageEvent::new(
                short_id(session_id),
                kind.as_str(),
                used,
                decision.remaining,
            ))
            .await;
        } else {
            info!(reason = ?decision.reason, "Trial limit reached");
        }

        Ok(decision)
    }

    /// Add consumed voice seconds, capped at the daily allowance.
    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    pub async fn record_voice_seconds(
        &self,
        session_id: Uuid,
        seconds: i32,
    ) -> Result<TrialSession, TrialError> {
        let cap = self.limits.max_voice_seconds;
        let session = self
            .store
            .add_voice_seconds(session_id, seconds, cap)
            .await?;

        self.publish(TrialUsageEvent::new(
            session.short_id(),
            "voice",
            session.voice_seconds_used,
            (cap - session.voice_seconds_used).max(0),
        ))
        .await;

        Ok(session)
    }

    /// Block a session until `until`; checks deny it without consuming usage.
    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    pub async fn block_session(
        &self,
        session_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<TrialSession, TrialError> {
        let session = self.store.block_session(session_id, until).await?;
        warn!(blocked_until = %until, "Trial session blocked for abuse");
        Ok(session)
    }

    /// Best effort; a failed publish never changes a decision.
    async fn publish(&self, event: TrialUsageEvent) {
        if let Err(e) = self.publisher.publish(&event).await {
            record_publish_failure();
            debug!(error = %e, "Trial usage publish failed (non-blocking)");
        }
    }
}
