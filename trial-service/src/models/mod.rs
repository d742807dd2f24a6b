//! Domain models for trial-service.

mod decision;
mod session;

pub use decision::{
    CheckOutcome, TrialCheckResult, UsageDecision, UsageSnapshot, VoiceCheckResult,
    TRIAL_ABUSE_BLOCKED_REASON, TRIAL_VERIFICATION_FAILED,
};
pub use session::{short_id, ResourceKind, TrialLimits, TrialSession};
