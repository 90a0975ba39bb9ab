//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second, per client IP
    pub rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    /// Secret Supabase signs session tokens with
    pub jwt_secret: String,
    /// Bearer secret for the cron trigger endpoints; unset disables them
    pub cron_secret: Option<String>,
    /// Shared secret expected on provider callbacks; unset accepts any caller
    pub callback_secret: Option<String>,
    /// Run reconcile and migrate passes on timers inside this process
    pub enable_background_reconcile: bool,
    pub reconcile_interval: Duration,
    pub migrate_interval: Duration,
    /// Page size for task listings
    pub list_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_body_size: 20 * 1024 * 1024, // 20MB, two base64 images
            environment: "development".to_string(),
            jwt_secret: String::new(),
            cron_secret: None,
            callback_secret: None,
            enable_background_reconcile: false,
            reconcile_interval: Duration::from_secs(60),
            migrate_interval: Duration::from_secs(300),
            list_limit: 100,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            jwt_secret: std::env::var("SUPABASE_JWT_SECRET").unwrap_or_default(),
            cron_secret: env_secret("CRON_SECRET"),
            callback_secret: env_secret("CALLBACK_SECRET"),
            enable_background_reconcile: std::env::var("ENABLE_BACKGROUND_RECONCILE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.enable_background_reconcile),
            reconcile_interval: env_parse("RECONCILE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reconcile_interval),
            migrate_interval: env_parse("MIGRATE_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.migrate_interval),
            list_limit: env_parse("TASK_LIST_LIMIT").unwrap_or(defaults.list_limit),
        }
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_blank_secrets_are_unset() {
        std::env::set_var("CRON_SECRET", "  ");
        std::env::set_var("ENABLE_BACKGROUND_RECONCILE", "1");
        std::env::set_var("RECONCILE_INTERVAL_SECS", "15");

        let config = ApiConfig::from_env();
        assert!(config.cron_secret.is_none());
        assert!(config.enable_background_reconcile);
        assert_eq!(config.reconcile_interval, Duration::from_secs(15));

        std::env::remove_var("CRON_SECRET");
        std::env::remove_var("ENABLE_BACKGROUND_RECONCILE");
        std::env::remove_var("RECONCILE_INTERVAL_SECS");
    }
}
