//! Kept for callers written against the two-step check-then-increment API.

use tracing::debug;
use uuid::Uuid;

use crate::models::short_id;

/// No-op. Usage is consumed by the atomic check in
/// [`UsageLedger::check_and_increment`](super::UsageLedger::check_and_increment);
/// incrementing again here would double count.
#[deprecated(note = "usage is incremented inside the atomic check; drop this call")]
pub async fn increment_trial_usage(session_id: Uuid) {
    debug!(
        session = %short_id(session_id),
        "increment_trial_usage called; usage is already recorded by the atomic check"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceKind, TrialLimits};
    use crate::services::{MemoryStore, NoopPublisher, TrialStore, UsageLedger};
    use std::sync::Arc;

    #[tokio::test]
    #[allow(deprecated)]
    async fn legacy_increment_does_not_change_counters() {
        let store = Arc::new(MemoryStore::new());
        let ledger = UsageLedger::new(
            store.clone(),
            Arc::new(NoopPublisher),
            TrialLimits::default(),
        );
        let session = store.find_or_create("1.2.3.4", "v", None).await.unwrap();

        ledger
            .check_and_increment(session.id, ResourceKind::Chat)
            .await
            .unwrap();
        increment_trial_usage(session.id).await;

        let stored = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(stored.chats_used, 1);
    }
}
