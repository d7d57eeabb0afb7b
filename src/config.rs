use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::AppError;
use crate::store::HttpStoreConfig;

const DEFAULT_DATABASE_URL: &str = "sqlite://scholarix.db?mode=rwc";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_APP_ID: &str = "scholarix-app";
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Name the service reports itself as in logs.
    pub app_id: String,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_addr = lookup("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Config(format!("BIND_ADDR is invalid: {}", e)))?;

        let app_id = lookup("APP_ID")
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_APP_ID.to_string());

        let poll_interval_ms = match lookup("POLL_INTERVAL_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| AppError::Config(format!("POLL_INTERVAL_MS is invalid: {:?}", raw)))?,
            None => DEFAULT_POLL_INTERVAL_MS,
        };

        Ok(Self {
            database_url,
            bind_addr,
            app_id,
            poll_interval: Duration::from_millis(poll_interval_ms),
        })
    }

    /// Client settings for talking to a running document service.
    pub fn http_store(&self, base_url: impl Into<String>) -> HttpStoreConfig {
        HttpStoreConfig::new(base_url).with_poll_interval(self.poll_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr.port(), 3000);
        assert_eq!(config.app_id, "scholarix-app");
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("POLL_INTERVAL_MS", "250"),
            ("APP_ID", "demo"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.app_id, "demo");

        let client = config.http_store("http://localhost:8080/");
        assert_eq!(client.base_url, "http://localhost:8080");
        assert_eq!(client.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("BIND_ADDR", "nowhere")])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&[("POLL_INTERVAL_MS", "0")])),
            Err(AppError::Config(_))
        ));
    }
}
