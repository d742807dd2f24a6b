pub mod compat;
pub mod database;
pub mod error;
pub mod gate;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod publisher;
pub mod resolver;
pub mod store;

#[allow(deprecated)]
pub use compat::increment_trial_usage;
pub use database::Database;
pub use error::TrialError;
pub use gate::{TrialGate, DEFAULT_ABUSE_BLOCK_HOURS};
pub use ledger::UsageLedger;
pub use memory::MemoryStore;
pub use self::metrics::{get_metrics, init_metrics};
pub use publisher::{
    NoopPublisher, RecordingPublisher, RedisPublisher, TrialUsageEvent, UsagePublisher,
    TRIAL_USAGE_CHANNEL,
};
pub use resolver::{client_ip, RequestContext, SessionResolver, DEFAULT_VISITOR_COOKIE};
pub use store::TrialStore;
