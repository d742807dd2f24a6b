use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Trial session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl TrialError {
    /// SQLSTATE 40001 (serialization_failure) or 40P01 (deadlock_detected).
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            TrialError::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }
}

impl From<TrialError> for AppError {
    fn from(err: TrialError) -> Self {
        match err {
            TrialError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            TrialError::Migration(e) => AppError::DatabaseError(anyhow::Error::new(e)),
            TrialError::Redis(e) => AppError::RedisError(e),
            TrialError::SessionNotFound(id) => {
                AppError::NotFound(anyhow::anyhow!("Trial session {} not found", id))
            }
            TrialError::Unavailable(_) => AppError::ServiceUnavailable,
            TrialError::Internal(e) => AppError::InternalError(e),
        }
    }
}
