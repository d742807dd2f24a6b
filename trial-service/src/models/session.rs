//! Trial session model for anonymous visitor usage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Counted resource kinds routed through the atomic ledger.
///
/// Voice is accounted in seconds and is not part of this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Chat,
    Tool,
}

impl ResourceKind {
    /// Get string representation for logs, metrics and reasons.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Tool => "tool",
        }
    }

    /// Denial reason returned once the daily cap is hit.
    pub fn limit_reason(&self) -> String {
        format!("{} limit reached", self.as_str())
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

/// Daily caps for anonymous visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialLimits {
    pub max_chats: i32,
    pub max_tools: i32,
    pub max_voice_seconds: i32,
}

impl Default for TrialLimits {
    fn default() -> Self {
        Self {
            max_chats: 10,
            max_tools: 10,
            max_voice_seconds: 300,
        }
    }
}

impl TrialLimits {
    /// Daily cap for a ledger resource.
    pub fn limit_for(&self, kind: ResourceKind) -> i32 {
        match kind {
            ResourceKind::Chat => self.max_chats,
            ResourceKind::Tool => self.max_tools,
        }
    }
}

/// Per-visitor trial session row.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct TrialSession {
    pub id: Uuid,
    pub ip_address: String,
    pub visitor_id: String,
    pub user_id: Option<String>,
    pub chats_used: i32,
    pub tools_used: i32,
    pub voice_seconds_used: i32,
    pub usage_day: NaiveDate,
    /// Set when the session is blocked for abuse; lapses on its own.
    pub blocked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TrialSession {
    /// Build a fresh session with zeroed counters.
    pub fn new(ip_address: &str, visitor_id: &str, user_id: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            ip_address: ip_address.to_string(),
            visitor_id: visitor_id.to_string(),
            user_id: user_id.map(str::to_string),
            chats_used: 0,
            tools_used: 0,
            voice_seconds_used: 0,
            usage_day: now.date_naive(),
            blocked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current counter value for a ledger resource.
    pub fn used(&self, kind: ResourceKind) -> i32 {
        match kind {
            ResourceKind::Chat => self.chats_used,
            ResourceKind::Tool => self.tools_used,
        }
    }

    pub(crate) fn used_mut(&mut self, kind: ResourceKind) -> &mut i32 {
        match kind {
            ResourceKind::Chat => &mut self.chats_used,
            ResourceKind::Tool => &mut self.tools_used,
        }
    }

    /// Zero all counters if they belong to an earlier day.
    ///
    /// Returns true when a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.usage_day >= today {
            return false;
        }
        self.chats_used = 0;
        self.tools_used = 0;
        self.voice_seconds_used = 0;
        self.usage_day = today;
        true
    }

    /// Whether an abuse block is still in force at `now`.
    pub fn is_blocked(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Short identifier prefix safe for logs and published events.
    pub fn short_id(&self) -> String {
        short_id(self.id)
    }
}

/// First eight characters of a session id.
pub fn short_id(id: Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn limit_reason_names_the_resource() {
        assert_eq!(ResourceKind::Chat.limit_reason(), "chat limit reached");
        assert_eq!(ResourceKind::Tool.limit_reason(), "tool limit reached");
    }

    #[test]
    fn resource_kind_parses_lowercase_names() {
        assert_eq!("chat".parse::<ResourceKind>(), Ok(ResourceKind::Chat));
        assert_eq!("tool".parse::<ResourceKind>(), Ok(ResourceKind::Tool));
        assert!("voice".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn roll_over_resets_counters_from_previous_day() {
        let mut session = TrialSession::new("10.0.0.1", "visitor", None);
        session.chats_used = 7;
        session.tools_used = 3;
        session.voice_seconds_used = 120;
        let today = session.usage_day;

        assert!(!session.roll_over(today));
        assert_eq!(session.chats_used, 7);

        assert!(session.roll_over(today + Duration::days(1)));
        assert_eq!(session.chats_used, 0);
        assert_eq!(session.tools_used, 0);
        assert_eq!(session.voice_seconds_used, 0);
        assert_eq!(session.usage_day, today + Duration::days(1));
    }

    #[test]
    fn block_lapses_at_its_deadline() {
        let mut session = TrialSession::new("10.0.0.1", "visitor", None);
        let now = Utc::now();
        assert!(!session.is_blocked(now));

        session.blocked_until = Some(now + Duration::hours(24));
        assert!(session.is_blocked(now));
        assert!(!session.is_blocked(now + Duration::hours(24)));
    }

    #[test]
    fn short_id_is_eight_chars() {
        let session = TrialSession::new("10.0.0.1", "visitor", Some("user-1"));
        assert_eq!(session.short_id().len(), 8);
        assert_eq!(session.user_id.as_deref(), Some("user-1"));
    }
}
