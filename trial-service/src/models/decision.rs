//! Ledger and gate results returned to request handlers.

use super::session::{ResourceKind, TrialLimits, TrialSession};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason attached to every fail-closed denial.
pub const TRIAL_VERIFICATION_FAILED: &str = "Trial verification failed";

/// Reason attached to requests from a session under an abuse block.
pub const TRIAL_ABUSE_BLOCKED_REASON: &str = "Trial session blocked for suspicious activity";

/// Verdict of a single atomic check-and-increment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDecision {
    pub allowed: bool,
    pub remaining: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UsageDecision {
    pub fn allow(remaining: i32) -> Self {
        Self {
            allowed: true,
            remaining: remaining.max(0),
            reason: None,
        }
    }

    pub fn limit_reached(kind: ResourceKind) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reason: Some(kind.limit_reason()),
        }
    }
}

/// Which path the gate took for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    AuthenticatedBypass,
    NoSessionYet,
    Checked,
    AbuseBlocked,
    VerificationFailed,
}

/// Result object handed to route handlers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialCheckResult {
    pub allowed: bool,
    pub outcome: CheckOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chats_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_remaining: Option<i32>,
}

impl TrialCheckResult {
    pub fn authenticated_bypass() -> Self {
        Self::allowed_without_session(CheckOutcome::AuthenticatedBypass)
    }

    pub fn no_session_yet() -> Self {
        Self::allowed_without_session(CheckOutcome::NoSessionYet)
    }

    fn allowed_without_session(outcome: CheckOutcome) -> Self {
        Self {
            allowed: true,
            outcome,
            session_id: None,
            reason: None,
            chats_remaining: None,
            tools_remaining: None,
        }
    }

    /// Fail-closed denial. Never carries the underlying error text.
    pub fn verification_failed(session_id: Option<Uuid>) -> Self {
        Self {
            allowed: false,
            outcome: CheckOutcome::VerificationFailed,
            session_id,
            reason: Some(TRIAL_VERIFICATION_FAILED.to_string()),
            chats_remaining: None,
            tools_remaining: None,
        }
    }

    /// Denial for a blocked session. No usage is consumed.
    pub fn abuse_blocked(session_id: Uuid) -> Self {
        Self {
            allowed: false,
            outcome: CheckOutcome::AbuseBlocked,
            session_id: Some(session_id),
            reason: Some(TRIAL_ABUSE_BLOCKED_REASON.to_string()),
            chats_remaining: None,
            tools_remaining: None,
        }
    }

    pub(crate) fn checked(session_id: Uuid, decision: UsageDecision) -> Self {
        Self {
            allowed: decision.allowed,
            outcome: CheckOutcome::Checked,
            session_id: Some(session_id),
            reason: decision.reason,
            chats_remaining: None,
            tools_remaining: None,
        }
    }
}

/// Read-only voice allowance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceCheckResult {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// `None` when no trial constraint applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_seconds_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VoiceCheckResult {
    pub fn from_session(session: &TrialSession, limits: &TrialLimits) -> Self {
        let remaining = (limits.max_voice_seconds - session.voice_seconds_used).max(0);
        Self {
            allowed: remaining > 0,
            session_id: Some(session.id),
            voice_seconds_remaining: Some(remaining),
            reason: (remaining == 0).then(|| "voice limit reached".to_string()),
        }
    }

    /// Authenticated users and visitors not yet provisioned.
    pub fn unrestricted() -> Self {
        Self {
            allowed: true,
            session_id: None,
            voice_seconds_remaining: None,
            reason: None,
        }
    }

    pub fn verification_failed() -> Self {
        Self {
            allowed: false,
            session_id: None,
            voice_seconds_remaining: None,
            reason: Some(TRIAL_VERIFICATION_FAILED.to_string()),
        }
    }
}

/// Usage snapshot served to the trial dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub session_id: Uuid,
    pub chats_used: i32,
    pub chats_remaining: i32,
    pub max_chats: i32,
    pub tools_used: i32,
    pub tools_remaining: i32,
    pub max_tools: i32,
    pub voice_seconds_used: i32,
    pub voice_seconds_remaining: i32,
    pub max_voice_seconds: i32,
}

impl UsageSnapshot {
    pub fn new(session: &TrialSession, limits: &TrialLimits) -> Self {
        Self {
            session_id: session.id,
            chats_used: session.chats_used,
            chats_remaining: (limits.max_chats - session.chats_used).max(0),
            max_chats: limits.max_chats,
            tools_used: session.tools_used,
            tools_remaining: (limits.max_tools - session.tools_used).max(0),
            max_tools: limits.max_tools,
            voice_seconds_used: session.voice_seconds_used,
            voice_seconds_remaining: (limits.max_voice_seconds - session.voice_seconds_used)
                .max(0),
            max_voice_seconds: limits.max_voice_seconds,
        }
    }
}
