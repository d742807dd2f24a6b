//! Configuration module for trial-service.

use crate::models::TrialLimits;
use crate::services::{DEFAULT_VISITOR_COOKIE, TRIAL_USAGE_CHANNEL};
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct TrialConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` selects the in-process store.
    pub database: Option<DatabaseConfig>,
    /// `None` disables usage event fan-out.
    pub redis: Option<RedisConfig>,
    pub limits: TrialLimits,
    pub visitor_cookie: String,
    /// `None` disables the admin routes.
    pub admin_api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub channel: String,
}

impl TrialConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = TrialLimits::default();

        let limits = TrialLimits {
            max_chats: env_parse("TRIAL_MAX_CHATS", defaults.max_chats),
            max_tools: env_parse("TRIAL_MAX_TOOLS", defaults.max_tools),
            max_voice_seconds: env_parse("TRIAL_MAX_VOICE_SECONDS", defaults.max_voice_seconds),
        };
        if limits.max_chats < 0 || limits.max_tools < 0 || limits.max_voice_seconds < 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Trial limits must not be negative"
            )));
        }

        Ok(Self {
            common,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "trial-service".to_string()),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: non_empty_var("OTLP_ENDPOINT"),
            database: non_empty_var("DATABASE_URL").map(|url| DatabaseConfig {
                url,
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: env_parse("DATABASE_MIN_CONNECTIONS", 2),
            }),
            redis: non_empty_var("REDIS_URL").map(|url| RedisConfig {
                url,
                channel: env::var("TRIAL_USAGE_CHANNEL")
                    .unwrap_or_else(|_| TRIAL_USAGE_CHANNEL.to_string()),
            }),
            limits,
            visitor_cookie: env::var("TRIAL_VISITOR_COOKIE")
                .unwrap_or_else(|_| DEFAULT_VISITOR_COOKIE.to_string()),
            admin_api_key: non_empty_var("ADMIN_API_KEY"),
        })
    }

    /// Configuration for tests and local runs: in-process store, no Redis.
    pub fn in_memory(limits: TrialLimits) -> Self {
        Self {
            common: core_config::Config::default(),
            service_name: "trial-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: "info".to_string(),
            otlp_endpoint: None,
            database: None,
            redis: None,
            limits,
            visitor_cookie: DEFAULT_VISITOR_COOKIE.to_string(),
            admin_api_key: None,
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_has_no_backends() {
        let config = TrialConfig::in_memory(TrialLimits::default());
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert!(config.admin_api_key.is_none());
        assert_eq!(config.visitor_cookie, DEFAULT_VISITOR_COOKIE);
        assert_eq!(config.limits.max_voice_seconds, 300);
    }

    #[test]
    fn env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("TRIAL_TEST_UNSET_VARIABLE", 7), 7);
    }
}
