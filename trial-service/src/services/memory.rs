//! In-process store for local development and tests.
//!
//! The store is owned by whoever constructs it and shared through `Arc`;
//! it is not a process global. Atomicity of check-and-increment comes from
//! holding the DashMap entry guard for the whole read-compare-write.

use super::error::TrialError;
use super::store::{apply_increment, apply_voice_seconds, usage_today, TrialStore};
use crate::models::{ResourceKind, TrialSession, UsageDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    sessions: DashMap<Uuid, TrialSession>,
    identities: DashMap<(String, String), Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions held.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Mutate a stored session in place. Returns false if it does not exist.
    ///
    /// Used to seed usage and to age sessions across the daily boundary.
    pub fn update_session<F>(&self, session_id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut TrialSession),
    {
        match self.sessions.get_mut(&session_id) {
            Some(mut entry) => {
                f(entry.value_mut());
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TrialStore for MemoryStore {
    async fn find_or_create(
        &self,
        ip_address: &str,
        visitor_id: &str,
        user_id: Option<&str>,
    ) -> Result<TrialSession, TrialError> {
        let key = (ip_address.to_string(), visitor_id.to_string());

        // Lock order is always identities -> sessions.
        let session_id = *self.identities.entry(key).or_insert_with(|| {
            let session = TrialSession::new(ip_address, visitor_id, user_id);
            let id = session.id;
            self.sessions.insert(id, session);
            id
        });

        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(TrialError::SessionNotFound(session_id))?;
        let session = entry.value_mut();
        if let Some(user_id) = user_id {
            session.user_id = Some(user_id.to_string());
        }
        if session.roll_over(usage_today()) {
            session.updated_at = Utc::now();
        }

        Ok(session.clone())
    }

    async fn find_by_identity(
        &self,
        ip_address: &str,
        visitor_id: &str,
    ) -> Result<Option<TrialSession>, TrialError> {
        let session_id = self
            .identities
            .get(&(ip_address.to_string(), visitor_id.to_string()))
            .map(|entry| *entry.value());

        match session_id {
            Some(id) => self.get_session(id).await,
            None => Ok(None),
        }
    }

    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrialSession>, TrialError> {
        Ok(self.sessions.get(&session_id).map(|entry| {
            let mut session = entry.value().clone();
            session.roll_over(usage_today());
            session
        }))
    }

    async fn check_and_increment(
        &self,
        session_id: Uuid,
        kind: ResourceKind,
        limit: i32,
    ) -> Result<UsageDecision, TrialError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(TrialError::SessionNotFound(session_id))?;

        Ok(apply_increment(
            entry.value_mut(),
            kind,
            limit,
            usage_today(),
        ))
    }

    async fn add_voice_seconds(
        &self,
        session_id: Uuid,
        seconds: i32,
        cap: i32,
    ) -> Result<TrialSession, TrialError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(TrialError::SessionNotFound(session_id))?;

        let session = entry.value_mut();
        apply_voice_seconds(session, seconds, cap, usage_today());
        Ok(session.clone())
    }

    async fn block_session(
        &self,
        session_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<TrialSession, TrialError> {
        let mut entry = self
            .sessions
            .get_mut(&session_id)
            .ok_or(TrialError::SessionNotFound(session_id))?;

        let session = entry.value_mut();
        session.blocked_until = Some(until);
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn health_check(&self) -> Result<(), TrialError> {
        Ok(())
    }
}
