//! Request-time trial policy. The only entry point route handlers call.
//!
//! Every check fails closed: an error from the resolver, the store or the
//! ledger becomes a denial with [`TRIAL_VERIFICATION_FAILED`] as reason.

use super::error::TrialError;
use super::ledger::UsageLedger;
use super::metrics::{record_abuse_block, record_gate_failure};
use super::resolver::{RequestContext, SessionResolver};
use crate::models::{
    short_id, ResourceKind, TrialCheckResult, TrialLimits, TrialSession, UsageSnapshot,
    VoiceCheckResult, TRIAL_VERIFICATION_FAILED,
};
use chrono::{Duration, Utc};
use tracing::{error, instrument, warn};
use uuid::Uuid;

/// How long an abuse block lasts by default.
pub const DEFAULT_ABUSE_BLOCK_HOURS: i64 = 24;

#[derive(Clone)]
pub struct TrialGate {
    resolver: SessionResolver,
    ledger: UsageLedger,
}

impl TrialGate {
    pub fn new(resolver: SessionResolver, ledger: UsageLedger) -> Self {
        Self { resolver, ledger }
    }

    pub fn limits(&self) -> &TrialLimits {
        self.ledger.limits()
    }

    /// Gate a chat message for an anonymous visitor.
    ///
    /// `tools_remaining` in the result comes from the session snapshot read
    /// before the chat increment; `chats_remaining` is the atomic result.
    pub async fn check_trial_for_anonymous(
        &self,
        ctx: &RequestContext,
        is_authenticated: bool,
        user_id: Option<&str>,
    ) -> TrialCheckResult {
        self.check_for_anonymous(ctx, is_authenticated, user_id, ResourceKind::Chat)
            .await
    }

    /// Gate a tool invocation for an anonymous visitor.
    pub async fn check_tool_for_anonymous(
        &self,
        ctx: &RequestContext,
        is_authenticated: bool,
        user_id: Option<&str>,
    ) -> TrialCheckResult {
        self.check_for_anonymous(ctx, is_authenticated, user_id, ResourceKind::Tool)
            .await
    }

    /// Gate a tool invocation for an already-resolved session.
    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    pub async fn check_trial_tool_limit(&self, session_id: Uuid) -> TrialCheckResult {
        match self
            .ledger
            .check_and_increment(session_id, ResourceKind::Tool)
            .await
        {
            Ok(decision) => {
                let remaining = decision.remaining;
                let mut result = TrialCheckResult::checked(session_id, decision);
                result.tools_remaining = Some(remaining);
                result
            }
            Err(e) => self.fail_closed("check_trial_tool_limit", Some(session_id), &e),
        }
    }

    #[instrument(skip(self, ctx, user_id), fields(resource = %kind))]
    async fn check_for_anonymous(
        &self,
        ctx: &RequestContext,
        is_authenticated: bool,
        user_id: Option<&str>,
        kind: ResourceKind,
    ) -> TrialCheckResult {
        if is_authenticated {
            return TrialCheckResult::authenticated_bypass();
        }

        match self.try_check(ctx, user_id, kind).await {
            Ok(result) => result,
            Err(e) => self.fail_closed(kind.as_str(), None, &e),
        }
    }

    async fn try_check(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
        kind: ResourceKind,
    ) -> Result<TrialCheckResult, TrialError> {
        let Some(session) = self.resolver.resolve(ctx, false, user_id).await? else {
            return Ok(TrialCheckResult::no_session_yet());
        };

        if session.is_blocked(Utc::now()) {
            record_abuse_block(kind);
            warn!(
                session = %session.short_id(),
                blocked_until = ?session.blocked_until,
                "Trial session blocked for abuse"
            );
            return Ok(TrialCheckResult::abuse_blocked(session.id));
        }

        let decision = self.ledger.check_and_increment(session.id, kind).await?;
        let remaining = decision.remaining;
        let limits = self.limits();
        let mut result = TrialCheckResult::checked(session.id, decision);

        // The counter that was not incremented is read from the snapshot and
        // may be one request stale under concurrency.
        match kind {
            ResourceKind::Chat => {
                result.chats_remaining = Some(remaining);
                result.tools_remaining = Some((limits.max_tools - session.tools_used).max(0));
            }
            ResourceKind::Tool => {
                result.tools_remaining = Some(remaining);
                result.chats_remaining = Some((limits.max_chats - session.chats_used).max(0));
            }
        }

        Ok(result)
    }

    /// Read-only voice allowance check. Never consumes seconds.
    #[instrument(skip(self, ctx, user_id))]
    pub async fn check_voice_limit(
        &self,
        ctx: &RequestContext,
        is_authenticated: bool,
        user_id: Option<&str>,
    ) -> VoiceCheckResult {
        if is_authenticated {
            return VoiceCheckResult::unrestricted();
        }

        match self.resolver.resolve(ctx, false, user_id).await {
            Ok(Some(session)) => VoiceCheckResult::from_session(&session, self.limits()),
            Ok(None) => VoiceCheckResult::unrestricted(),
            Err(e) => {
                self.log_failure("check_voice_limit", None, &e);
                VoiceCheckResult::verification_failed()
            }
        }
    }

    /// Record voice seconds for the visitor's session, if there is one.
    pub async fn record_voice_usage(
        &self,
        ctx: &RequestContext,
        seconds: i32,
    ) -> Result<Option<UsageSnapshot>, TrialError> {
        let Some(session) = self.resolver.lookup(ctx).await? else {
            return Ok(None);
        };
        let updated = self.ledger.record_voice_seconds(session.id, seconds).await?;
        Ok(Some(UsageSnapshot::new(&updated, self.limits())))
    }

    /// Find-or-create the visitor's session and return its usage.
    ///
    /// This is the provisioning step that runs before the first gated
    /// request; the context must carry a visitor id.
    pub async fn provision_session(
        &self,
        ctx: &RequestContext,
        user_id: Option<&str>,
    ) -> Result<Option<UsageSnapshot>, TrialError> {
        let session: Option<TrialSession> = self.resolver.resolve(ctx, false, user_id).await?;
        Ok(session.map(|s| UsageSnapshot::new(&s, self.limits())))
    }

    /// Current usage for the visitor without creating a session.
    pub async fn session_usage(
        &self,
        ctx: &RequestContext,
    ) -> Result<Option<UsageSnapshot>, TrialError> {
        let session = self.resolver.lookup(ctx).await?;
        Ok(session.map(|s| UsageSnapshot::new(&s, self.limits())))
    }

    /// Block a session for `hours`. Chat and tool checks then deny it
    /// without touching its counters until the block lapses.
    pub async fn block_session(
        &self,
        session_id: Uuid,
        hours: i64,
    ) -> Result<TrialSession, TrialError> {
        let until = Utc::now() + Duration::hours(hours);
        self.ledger.block_session(session_id, until).await
    }

    fn fail_closed(
        &self,
        operation: &'static str,
        session_id: Option<Uuid>,
        err: &TrialError,
    ) -> TrialCheckResult {
        self.log_failure(operation, session_id, err);
        TrialCheckResult::verification_failed(session_id)
    }

    fn log_failure(&self, operation: &'static str, session_id: Option<Uuid>, err: &TrialError) {
        record_gate_failure(operation);
        error!(
            operation,
            session = ?session_id.map(short_id),
            error = %err,
            reason = TRIAL_VERIFICATION_FAILED,
            "Trial check failed, denying request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CheckOutcome, UsageDecision, TRIAL_ABUSE_BLOCKED_REASON};
    use crate::services::{MemoryStore, NoopPublisher, TrialStore};
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Store that fails every call and counts how often it was touched.
    #[derive(Default)]
    struct BrokenStore {
        calls: AtomicUsize,
        fail_on_increment_only: bool,
        inner: MemoryStore,
    }

    impl BrokenStore {
        fn unavailable(&self) -> TrialError {
            self.calls.fetch_add(1, Ordering::SeqCst);
            TrialError::Unavailable("connection refused".to_string())
        }
    }

    #[async_trait]
    impl TrialStore for BrokenStore {
        async fn find_or_create(
            &self,
            ip_address: &str,
            visitor_id: &str,
            user_id: Option<&str>,
        ) -> Result<TrialSession, TrialError> {
            if self.fail_on_increment_only {
                return self.inner.find_or_create(ip_address, visitor_id, user_id).await;
            }
            Err(self.unavailable())
        }

        async fn find_by_identity(
            &self,
            _ip_address: &str,
            _visitor_id: &str,
        ) -> Result<Option<TrialSession>, TrialError> {
            Err(self.unavailable())
        }

        async fn get_session(&self, _session_id: Uuid) -> Result<Option<TrialSession>, TrialError> {
            Err(self.unavailable())
        }

        async fn check_and_increment(
            &self,
            _session_id: Uuid,
            _kind: ResourceKind,
            _limit: i32,
        ) -> Result<UsageDecision, TrialError> {
            Err(self.unavailable())
        }

        async fn add_voice_seconds(
            &self,
            _session_id: Uuid,
            _seconds: i32,
            _cap: i32,
        ) -> Result<TrialSession, TrialError> {
            Err(self.unavailable())
        }

        async fn block_session(
            &self,
            session_id: Uuid,
            until: DateTime<Utc>,
        ) -> Result<TrialSession, TrialError> {
            if self.fail_on_increment_only {
                return self.inner.block_session(session_id, until).await;
            }
            Err(self.unavailable())
        }

        async fn health_check(&self) -> Result<(), TrialError> {
            Err(self.unavailable())
        }
    }

    fn gate_over(store: Arc<dyn TrialStore>) -> TrialGate {
        let ledger = UsageLedger::new(
            store.clone(),
            Arc::new(NoopPublisher),
            TrialLimits::default(),
        );
        TrialGate::new(SessionResolver::new(store), ledger)
    }

    fn visitor() -> RequestContext {
        RequestContext::new(Some("visitor-1"), "203.0.113.7")
    }

    #[tokio::test]
    async fn authenticated_user_bypasses_without_touching_store() {
        let store = Arc::new(BrokenStore::default());
        let gate = gate_over(store.clone());

        let result = gate
            .check_trial_for_anonymous(&visitor(), true, Some("user-123"))
            .await;

        assert!(result.allowed);
        assert_eq!(result.outcome, CheckOutcome::AuthenticatedBypass);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_cookie_is_allowed_without_creating_session() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_over(store.clone());

        let ctx = RequestContext::new(None, "203.0.113.7");
        let result = gate.check_trial_for_anonymous(&ctx, false, None).await;

        assert!(result.allowed);
        assert_eq!(result.outcome, CheckOutcome::NoSessionYet);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn resolver_failure_fails_closed() {
        let gate = gate_over(Arc::new(BrokenStore::default()));

        let result = gate.check_trial_for_anonymous(&visitor(), false, None).await;

        assert!(!result.allowed);
        assert_eq!(result.outcome, CheckOutcome::VerificationFailed);
        assert_eq!(result.reason.as_deref(), Some(TRIAL_VERIFICATION_FAILED));
    }

    #[tokio::test]
    async fn ledger_failure_fails_closed() {
        let store = Arc::new(BrokenStore {
            fail_on_increment_only: true,
            ..BrokenStore::default()
        });
        let gate = gate_over(store);

        let chat = gate.check_trial_for_anonymous(&visitor(), false, None).await;
        assert!(!chat.allowed);
        assert!(!chat.reason.unwrap_or_default().is_empty());

        let tool = gate.check_trial_tool_limit(Uuid::new_v4()).await;
        assert!(!tool.allowed);
        assert_eq!(tool.outcome, CheckOutcome::VerificationFailed);
    }

    #[tokio::test]
    async fn voice_check_fails_closed() {
        let gate = gate_over(Arc::new(BrokenStore::default()));
        let result = gate.check_voice_limit(&visitor(), false, None).await;
        assert!(!result.allowed);
        assert_eq!(result.reason.as_deref(), Some(TRIAL_VERIFICATION_FAILED));
    }

    #[tokio::test]
    async fn chat_check_reports_both_remaining_counts() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_over(store.clone());
        let session = store
            .find_or_create("203.0.113.7", "visitor-1", None)
            .await
            .unwrap();
        store.update_session(session.id, |s| {
            s.chats_used = 4;
            s.tools_used = 3;
        });

        let result = gate.check_trial_for_anonymous(&visitor(), false, None).await;

        assert!(result.allowed);
        assert_eq!(result.outcome, CheckOutcome::Checked);
        assert_eq!(result.session_id, Some(session.id));
        assert_eq!(result.chats_remaining, Some(5));
        assert_eq!(result.tools_remaining, Some(7));
    }

    #[tokio::test]
    async fn blocked_session_is_denied_before_the_ledger() {
        // Increments would fail, so reaching the ledger shows up as a
        // verification failure instead of a block.
        let store = Arc::new(BrokenStore {
            fail_on_increment_only: true,
            ..BrokenStore::default()
        });
        let gate = gate_over(store.clone());
        let session = store
            .find_or_create("203.0.113.7", "visitor-1", None)
            .await
            .unwrap();
        gate.block_session(session.id, DEFAULT_ABUSE_BLOCK_HOURS)
            .await
            .unwrap();

        for result in [
            gate.check_trial_for_anonymous(&visitor(), false, None).await,
            gate.check_tool_for_anonymous(&visitor(), false, None).await,
        ] {
            assert!(!result.allowed);
            assert_eq!(result.outcome, CheckOutcome::AbuseBlocked);
            assert_eq!(result.session_id, Some(session.id));
            assert_eq!(result.reason.as_deref(), Some(TRIAL_ABUSE_BLOCKED_REASON));
        }
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lapsed_block_allows_usage_again() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_over(store.clone());
        let session = store
            .find_or_create("203.0.113.7", "visitor-1", None)
            .await
            .unwrap();
        store.update_session(session.id, |s| {
            s.blocked_until = Some(Utc::now() - Duration::minutes(1));
        });

        let result = gate.check_trial_for_anonymous(&visitor(), false, None).await;

        assert!(result.allowed);
        assert_eq!(result.outcome, CheckOutcome::Checked);
    }

    #[tokio::test]
    async fn tool_limit_by_session_id() {
        let store = Arc::new(MemoryStore::new());
        let gate = gate_over(store.clone());
        let session = store
            .find_or_create("203.0.113.7", "visitor-1", None)
            .await
            .unwrap();
        store.update_session(session.id, |s| s.tools_used = 9);

        let first = gate.check_trial_tool_limit(session.id).await;
        assert!(first.allowed);
        assert_eq!(first.tools_remaining, Some(0));

        let second = gate.check_trial_tool_limit(session.id).await;
        assert!(!second.allowed);
        assert_eq!(second.reason.as_deref(), Some("tool limit reached"));
    }
}
