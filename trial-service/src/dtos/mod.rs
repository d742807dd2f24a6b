use crate::services::DEFAULT_ABUSE_BLOCK_HOURS;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Error code for a denied chat.
pub const TRIAL_LIMIT_REACHED: &str = "TRIAL_LIMIT_REACHED";
/// Error code for a denied tool invocation.
pub const TRIAL_TOOL_LIMIT_REACHED: &str = "TRIAL_TOOL_LIMIT_REACHED";
/// Error code for a denied voice session.
pub const TRIAL_VOICE_LIMIT_REACHED: &str = "TRIAL_VOICE_LIMIT_REACHED";
/// Error code for a session under an abuse block. Sent with 429.
pub const TRIAL_ABUSE_BLOCKED: &str = "TRIAL_ABUSE_BLOCKED";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VoiceUsageRequest {
    #[validate(range(min = 1, max = 3600, message = "seconds must be between 1 and 3600"))]
    pub seconds: i32,
}

/// Admin request to block a trial session.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct BlockSessionRequest {
    #[serde(default = "default_block_hours")]
    #[validate(range(min = 1, max = 720, message = "hours must be between 1 and 720"))]
    pub hours: i64,
}

fn default_block_hours() -> i64 {
    DEFAULT_ABUSE_BLOCK_HOURS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockSessionResponse {
    pub session_id: Uuid,
    pub blocked_until: DateTime<Utc>,
}

/// Body of a 403 returned when a trial check denies the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialDeniedResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chats_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_remaining: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_seconds_remaining: Option<i32>,
}

impl TrialDeniedResponse {
    pub fn new(code: &str, reason: Option<String>) -> Self {
        Self::with_error("Trial limit reached", code, reason)
    }

    pub fn abuse_blocked(reason: Option<String>) -> Self {
        Self::with_error("Trial session blocked", TRIAL_ABUSE_BLOCKED, reason)
    }

    fn with_error(error: &str, code: &str, reason: Option<String>) -> Self {
        Self {
            error: error.to_string(),
            code: code.to_string(),
            reason,
            chats_remaining: None,
            tools_remaining: None,
            voice_seconds_remaining: None,
        }
    }
}
