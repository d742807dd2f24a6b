//! PostgreSQL store for trial-service.

use super::error::TrialError;
use super::metrics::QueryTimer;
use super::store::{apply_increment, apply_voice_seconds, usage_today, TrialStore};
use crate::models::{short_id, ResourceKind, TrialSession, UsageDecision};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "trial-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, TrialError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), TrialError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn begin_serializable(&self) -> Result<Transaction<'static, Postgres>, TrialError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn lock_session(
        tx: &mut Transaction<'static, Postgres>,
        session_id: Uuid,
    ) -> Result<TrialSession, TrialError> {
        sqlx::query_as::<_, TrialSession>(
            r#"
            SELECT id, ip_address, visitor_id, user_id, chats_used, tools_used, voice_seconds_used, usage_day, blocked_until, created_at, updated_at
            FROM trial_sessions
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(session_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(TrialError::SessionNotFound(session_id))
    }

    async fn write_counters(
        tx: &mut Transaction<'static, Postgres>,
        session: &TrialSession,
    ) -> Result<(), TrialError> {
        sqlx::query(
            r#"
            UPDATE trial_sessions
            SET chats_used = $2, tools_used = $3, voice_seconds_used = $4, usage_day = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(session.id)
        .bind(session.chats_used)
        .bind(session.tools_used)
        .bind(session.voice_seconds_used)
        .bind(session.usage_day)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn try_check_and_increment(
        &self,
        session_id: Uuid,
        kind: ResourceKind,
        limit: i32,
        today: NaiveDate,
    ) -> Result<UsageDecision, TrialError> {
        let mut tx = self.begin_serializable().await?;
        let mut session = Self::lock_session(&mut tx, session_id).await?;

        let decision = apply_increment(&mut session, kind, limit, today);
        if decision.allowed {
            Self::write_counters(&mut tx, &session).await?;
        }

        tx.commit().await?;
        Ok(decision)
    }

    async fn try_add_voice_seconds(
        &self,
        session_id: Uuid,
        seconds: i32,
        cap: i32,
        today: NaiveDate,
    ) -> Result<TrialSession, TrialError> {
        let mut tx = self.begin_serializable().await?;
        let mut session = Self::lock_session(&mut tx, session_id).await?;

        apply_voice_seconds(&mut session, seconds, cap, today);
        Self::write_counters(&mut tx, &session).await?;

        tx.commit().await?;
        Ok(session)
    }
}

/// Run `attempt` until it commits, retrying serialization failures.
///
/// Each retry starts a fresh transaction and so re-reads the committed
/// counters. Any other error is returned immediately.
pub(crate) async fn retry_on_serialization_failure<T, F, Fut>(
    operation: &'static str,
    attempt: F,
) -> Result<T, TrialError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, TrialError>>,
{
    let policy = ExponentialBackoff {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(250),
        max_elapsed_time: Some(Duration::from_secs(5)),
        ..Default::default()
    };

    retry(policy, || {
        let fut = attempt();
        async move {
            fut.await.map_err(|e| {
                if e.is_serialization_failure() {
                    debug!(operation, "Serialization conflict, retrying transaction");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        }
    })
    .await
}

#[async_trait]
impl TrialStore for Database {
    #[instrument(skip(self, visitor_id, user_id), fields(ip_address = %ip_address))]
    async fn find_or_create(
        &self,
        ip_address: &str,
        visitor_id: &str,
        user_id: Option<&str>,
    ) -> Result<TrialSession, TrialError> {
        let _timer = QueryTimer::start("find_or_create");

        let session = sqlx::query_as::<_, TrialSession>(
            r#"
            INSERT INTO trial_sessions (id, ip_address, visitor_id, user_id, usage_day)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ip_address, visitor_id) DO UPDATE SET
                user_id = COALESCE(EXCLUDED.user_id, trial_sessions.user_id),
                chats_used = CASE WHEN trial_sessions.usage_day < EXCLUDED.usage_day THEN 0 ELSE trial_sessions.chats_used END,
                tools_used = CASE WHEN trial_sessions.usage_day < EXCLUDED.usage_day THEN 0 ELSE trial_sessions.tools_used END,
                voice_seconds_used = CASE WHEN trial_sessions.usage_day < EXCLUDED.usage_day THEN 0 ELSE trial_sessions.voice_seconds_used END,
                usage_day = GREATEST(trial_sessions.usage_day, EXCLUDED.usage_day),
                updated_at = NOW()
            RETURNING id, ip_address, visitor_id, user_id, chats_used, tools_used, voice_seconds_used, usage_day, blocked_until, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ip_address)
        .bind(visitor_id)
        .bind(user_id)
        .bind(usage_today())
        .fetch_one(&self.pool)
        .await?;

        debug!(session = %session.short_id(), "Trial session resolved");

        Ok(session)
    }

    #[instrument(skip(self, visitor_id), fields(ip_address = %ip_address))]
    async fn find_by_identity(
        &self,
        ip_address: &str,
        visitor_id: &str,
    ) -> Result<Option<TrialSession>, TrialError> {
        let _timer = QueryTimer::start("find_by_identity");

        let session = sqlx::query_as::<_, TrialSession>(
            r#"
            SELECT id, ip_address, visitor_id, user_id, chats_used, tools_used, voice_seconds_used, usage_day, blocked_until, created_at, updated_at
            FROM trial_sessions
            WHERE ip_address = $1 AND visitor_id = $2
            "#,
        )
        .bind(ip_address)
        .bind(visitor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session.map(|mut s| {
            s.roll_over(usage_today());
            s
        }))
    }

    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    async fn get_session(&self, session_id: Uuid) -> Result<Option<TrialSession>, TrialError> {
        let _timer = QueryTimer::start("get_session");

        let session = sqlx::query_as::<_, TrialSession>(
            r#"
            SELECT id, ip_address, visitor_id, user_id, chats_used, tools_used, voice_seconds_used, usage_day, blocked_until, created_at, updated_at
            FROM trial_sessions
            WHERE id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session.map(|mut s| {
            s.roll_over(usage_today());
            s
        }))
    }

    #[instrument(skip(self), fields(session = %short_id(session_id), resource = %kind))]
    async fn check_and_increment(
        &self,
        session_id: Uuid,
        kind: ResourceKind,
        limit: i32,
    ) -> Result<UsageDecision, TrialError> {
        let _timer = QueryTimer::start("check_and_increment");
        let today = usage_today();

        retry_on_serialization_failure("check_and_increment", move || {
            self.try_check_and_increment(session_id, kind, limit, today)
        })
        .await
    }

    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    async fn add_voice_seconds(
        &self,
        session_id: Uuid,
        seconds: i32,
        cap: i32,
    ) -> Result<TrialSession, TrialError> {
        let _timer = QueryTimer::start("add_voice_seconds");
        let today = usage_today();

        retry_on_serialization_failure("add_voice_seconds", move || {
            self.try_add_voice_seconds(session_id, seconds, cap, today)
        })
        .await
    }

    #[instrument(skip(self), fields(session = %short_id(session_id)))]
    async fn block_session(
        &self,
        session_id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<TrialSession, TrialError> {
        let _timer = QueryTimer::start("block_session");

        sqlx::query_as::<_, TrialSession>(
            r#"
            UPDATE trial_sessions
            SET blocked_until = $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, ip_address, visitor_id, user_id, chats_used, tools_used, voice_seconds_used, usage_day, blocked_until, created_at, updated_at
            "#,
        )
        .bind(session_id)
        .bind(until)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(TrialError::SessionNotFound(session_id))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), TrialError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::error::tests::conflict;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn serialization_conflicts_are_retried_until_commit() {
        let calls = AtomicUsize::new(0);

        let result = retry_on_serialization_failure("test", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err(conflict("40001")),
                    1 => Err(conflict("40P01")),
                    _ => Ok(attempt),
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);

        let result: Result<(), TrialError> = retry_on_serialization_failure("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(conflict("23505")) }
        })
        .await;

        assert!(matches!(result, Err(TrialError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_session_is_not_retried() {
        let calls = AtomicUsize::new(0);
        let session_id = Uuid::new_v4();

        let result: Result<(), TrialError> = retry_on_serialization_failure("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(TrialError::SessionNotFound(session_id)) }
        })
        .await;

        assert!(matches!(result, Err(TrialError::SessionNotFound(id)) if id == session_id));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
