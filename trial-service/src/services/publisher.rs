//! Usage event fan-out for live admin dashboards.

use super::error::TrialError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, Client};
use serde::{Deserialize, Serialize};

/// Default pub/sub channel admin dashboards subscribe to.
pub const TRIAL_USAGE_CHANNEL: &str = "trial:usage";

/// Message type tag carried by every usage event.
pub const TRIAL_USAGE_EVENT_TYPE: &str = "trial:usage";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialUsageData {
    /// Session id prefix, never the full id.
    pub session: String,
    pub resource: String,
    pub used: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialUsageEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: TrialUsageData,
    pub published_at: DateTime<Utc>,
}

impl TrialUsageEvent {
    pub fn new(session: String, resource: &str, used: i32, remaining: i32) -> Self {
        Self {
            event_type: TRIAL_USAGE_EVENT_TYPE.to_string(),
            data: TrialUsageData {
                session,
                resource: resource.to_string(),
                used,
                remaining,
            },
            published_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait UsagePublisher: Send + Sync {
    async fn publish(&self, event: &TrialUsageEvent) -> Result<(), TrialError>;

    /// Publishers without a backing connection are always healthy.
    async fn health_check(&self) -> Result<(), TrialError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisPublisher {
    manager: ConnectionManager,
    channel: String,
}

impl RedisPublisher {
    pub async fn new(url: &str, channel: &str) -> Result<Self, TrialError> {
        tracing::info!(channel = %channel, "Connecting to Redis for usage events");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            e
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            manager,
            channel: channel.to_string(),
        })
    }
}

#[async_trait]
impl UsagePublisher for RedisPublisher {
    async fn publish(&self, event: &TrialUsageEvent) -> Result<(), TrialError> {
        let payload = serde_json::to_string(event)
            .map_err(|e| TrialError::Internal(anyhow::anyhow!("Failed to encode event: {}", e)))?;

        let mut conn = self.manager.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;

        tracing::trace!(receivers, channel = %self.channel, "Usage event published");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), TrialError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Publisher used when Redis is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

#[async_trait]
impl UsagePublisher for NoopPublisher {
    async fn publish(&self, _event: &TrialUsageEvent) -> Result<(), TrialError> {
        Ok(())
    }
}

/// Keeps published events in memory.
pub struct RecordingPublisher {
    pub events: std::sync::Mutex<Vec<TrialUsageEvent>>,
}

impl Default for RecordingPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self {
            events: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<TrialUsageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl UsagePublisher for RecordingPublisher {
    async fn publish(&self, event: &TrialUsageEvent) -> Result<(), TrialError> {
        self.events
            .lock()
            .map_err(|_| TrialError::Internal(anyhow::anyhow!("Recording publisher poisoned")))?
            .push(event.clone());
        Ok(())
    }
}
