//! Application startup and lifecycle management.

use crate::config::TrialConfig;
use crate::services::{
    init_metrics, Database, MemoryStore, NoopPublisher, RedisPublisher, TrialStore,
    UsagePublisher,
};
use crate::{build_router, AppState};
use service_core::error::AppError;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: TrialConfig) -> Result<Self, AppError> {
        init_metrics();

        let store = Self::connect_store(&config).await?;
        let publisher = Self::connect_publisher(&config).await;

        let listener = TcpListener::bind(config.common.bind_address()).await?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(
            http_port,
            max_chats = config.limits.max_chats,
            max_tools = config.limits.max_tools,
            max_voice_seconds = config.limits.max_voice_seconds,
            "Trial service configured"
        );

        let state = AppState::new(config, store, publisher);

        Ok(Self {
            http_port,
            listener,
            state,
        })
    }

    async fn connect_store(config: &TrialConfig) -> Result<Arc<dyn TrialStore>, AppError> {
        let Some(db_config) = &config.database else {
            tracing::warn!("DATABASE_URL not set, using in-process trial store");
            return Ok(Arc::new(MemoryStore::new()));
        };

        let db = Database::new(
            &db_config.url,
            db_config.max_connections,
            db_config.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        db.run_migrations().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            e
        })?;

        Ok(Arc::new(db))
    }

    /// Redis is optional; a failed connection disables fan-out.
    async fn connect_publisher(config: &TrialConfig) -> Arc<dyn UsagePublisher> {
        let Some(redis_config) = &config.redis else {
            tracing::info!("REDIS_URL not set, usage events disabled");
            return Arc::new(NoopPublisher);
        };

        match RedisPublisher::new(&redis_config.url, &redis_config.channel).await {
            Ok(publisher) => Arc::new(publisher),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unavailable, usage events disabled");
                Arc::new(NoopPublisher)
            }
        }
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the HTTP server until stopped.
    pub async fn run_until_stopped(self) -> Result<(), std::io::Error> {
        let app = build_router(self.state);

        tracing::info!(port = self.http_port, "HTTP server listening");

        axum::serve(self.listener, app).await
    }
}
