use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub hooks_env: String,
    pub api_bind: String,
    /// Required by the API, unused by the worker.
    pub admin_token: Option<String>,
    pub delivery_timeout_secs: u64,
    pub retry_interval_secs: u64,
    pub retry_batch_size: i64,
    pub worker_concurrency: usize,
    pub response_body_limit: usize,
}

impl Settings {
    pub fn from_env() -> Result<Self, std::env::VarError> {
        let database_url =
            std::env::var("DATABASE_URL").or_else(|_| std::env::var("HOOKS_DATABASE_URL"))?;
        let hooks_env = std::env::var("HOOKS_ENV").unwrap_or_else(|_| "dev".to_string());
        let api_bind =
            std::env::var("HOOKS_API_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let admin_token = std::env::var("HOOKS_ADMIN_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        Ok(Self {
            database_url,
            hooks_env,
            api_bind,
            admin_token,
            delivery_timeout_secs: parse_or("HOOKS_DELIVERY_TIMEOUT_SECS", 30),
            retry_interval_secs: parse_or("HOOKS_RETRY_INTERVAL_SECS", 15),
            retry_batch_size: parse_or("HOOKS_RETRY_BATCH_SIZE", 100),
            worker_concurrency: parse_or("HOOKS_WORKER_CONCURRENCY", 4),
            response_body_limit: parse_or("HOOKS_RESPONSE_BODY_LIMIT", 1024),
        })
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }

    pub fn is_production(&self) -> bool {
        self.hooks_env == "production"
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
