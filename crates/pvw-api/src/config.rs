//! Server configuration.

use std::time::Duration;

use pvw_core::{defaults, UploadConfig};
use pvw_jobs::{RetentionConfig, WorkerConfig};

use crate::ws::WsConfig;

/// Everything the API process reads from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub rate_limit_enabled: bool,
    /// Requests allowed per client per period.
    pub rate_limit_requests: u32,
    pub rate_limit_period: Duration,
    pub max_body_bytes: usize,
    /// Origins allowed by CORS (`ALLOWED_ORIGINS`, comma separated).
    pub allowed_origins: Vec<String>,
    /// Run the job worker inside the API process (`JOB_WORKER_ENABLED=true`).
    pub run_worker: bool,
    pub worker: WorkerConfig,
    pub retention: RetentionConfig,
    pub uploads: UploadConfig,
    pub ws: WsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/pvw".to_string(),
            host: "0.0.0.0".to_string(),
            port: defaults::SERVER_PORT,
            rate_limit_enabled: true,
            rate_limit_requests: defaults::RATE_LIMIT_REQUESTS,
            rate_limit_period: Duration::from_secs(defaults::RATE_LIMIT_PERIOD_SECS),
            max_body_bytes: defaults::MAX_BODY_SIZE_BYTES,
            allowed_origins: vec!["http://localhost:3000".to_string()],
            run_worker: false,
            worker: WorkerConfig::default(),
            retention: RetentionConfig::default(),
            uploads: UploadConfig::default(),
            ws: WsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_URL` | `postgres://localhost/pvw` |
    /// | `HOST` / `PORT` | `0.0.0.0` / `8000` |
    /// | `RATE_LIMIT_ENABLED` | `true` |
    /// | `RATE_LIMIT_REQUESTS` / `RATE_LIMIT_PERIOD_SECS` | `100` / `60` |
    /// | `MAX_BODY_SIZE_BYTES` | 110 MiB |
    /// | `ALLOWED_ORIGINS` | `http://localhost:3000` |
    /// | `JOB_WORKER_ENABLED` | `false` |
    ///
    /// Worker, retention, upload and WebSocket settings are read by their own
    /// `from_env` constructors.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);
        let host = std::env::var("HOST").unwrap_or(defaults.host);
        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port);
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(defaults.rate_limit_enabled);
        let rate_limit_requests = std::env::var("RATE_LIMIT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.rate_limit_requests);
        let rate_limit_period = std::env::var("RATE_LIMIT_PERIOD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.rate_limit_period);
        let max_body_bytes = std::env::var("MAX_BODY_SIZE_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_body_bytes);
        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .ok()
            .map(|v| parse_origins(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.allowed_origins);
        let run_worker = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Self {
            database_url,
            host,
            port,
            rate_limit_enabled,
            rate_limit_requests,
            rate_limit_period,
            max_body_bytes,
            allowed_origins,
            run_worker,
            worker: WorkerConfig::from_env(),
            retention: RetentionConfig::from_env(),
            uploads: UploadConfig::from_env(),
            ws: WsConfig::from_env(),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn with_rate_limit(mut self, requests: u32, period: Duration) -> Self {
        self.rate_limit_enabled = true;
        self.rate_limit_requests = requests;
        self.rate_limit_period = period;
        self
    }

    pub fn without_rate_limit(mut self) -> Self {
        self.rate_limit_enabled = false;
        self
    }

    pub fn with_uploads(mut self, uploads: UploadConfig) -> Self {
        self.uploads = uploads;
        self
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins(" https://a.example , ,http://localhost:3000"),
            vec!["https://a.example", "http://localhost:3000"]
        );
        assert!(parse_origins(" , ").is_empty());
    }

    #[test]
    fn test_builders() {
        let config = ServerConfig::default().without_rate_limit();
        assert!(!config.rate_limit_enabled);
        let config = config.with_rate_limit(5, Duration::from_secs(1));
        assert!(config.rate_limit_enabled);
        assert_eq!(config.rate_limit_requests, 5);
        assert_eq!(config.bind_address(), format!("0.0.0.0:{}", defaults::SERVER_PORT));
    }
}
