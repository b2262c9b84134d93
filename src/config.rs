//! Configuration loaded from environment variables with sensible defaults.
//!
//! Every knob is prefixed `UPTIME_CHOPPER_`.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A notification channel declared via process configuration rather than the
/// store. Monitors reference these by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationWebhook {
    pub name: String,
    pub url: String,
    /// Channel wire format: webhook, dingtalk, wechat or discord.
    #[serde(rename = "type", default)]
    pub kind: String,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the HTTP server.
    pub http_addr: String,
    /// Path to the data file. A `.db`/`.sqlite` extension selects the
    /// embedded SQLite store, anything else the JSON file store.
    pub data_file_path: String,
    /// Legacy webhook channels, keyed by name at dispatch time.
    pub notifications: Vec<NotificationWebhook>,
    /// Cap on captured container log bytes (engine attachments and the
    /// container logs endpoint).
    pub max_docker_log_bytes: usize,
    /// How far back container log fetches reach by default.
    pub default_docker_log_since: Duration,
    pub allowed_cors_origin: String,
    pub serve_frontend_from_dist: bool,
    pub frontend_dist_directory: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8080".to_string(),
            data_file_path: "uptime-chopper.json".to_string(),
            notifications: Vec::new(),
            max_docker_log_bytes: 64 * 1024,
            default_docker_log_since: Duration::from_secs(3600),
            allowed_cors_origin: "*".to_string(),
            serve_frontend_from_dist: false,
            frontend_dist_directory: "web/dist".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// - `UPTIME_CHOPPER_HTTP_ADDR`: listen address (default: "0.0.0.0:8080")
    /// - `UPTIME_CHOPPER_DATA_FILE_PATH`: data file (default: "uptime-chopper.json")
    /// - `UPTIME_CHOPPER_NOTIFICATIONS`: JSON array of `{name, url, type}`
    /// - `UPTIME_CHOPPER_MAX_DOCKER_LOG_BYTES`: log capture cap (default: 65536)
    /// - `UPTIME_CHOPPER_DEFAULT_DOCKER_LOG_SINCE_SECONDS`: log window (default: 3600)
    /// - `UPTIME_CHOPPER_ALLOWED_CORS_ORIGIN`: CORS origin (default: "*")
    /// - `UPTIME_CHOPPER_SERVE_FRONTEND_FROM_DIST`: serve the SPA (default: false)
    /// - `UPTIME_CHOPPER_FRONTEND_DIST_DIRECTORY`: SPA directory (default: "web/dist")
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(addr) = env::var("UPTIME_CHOPPER_HTTP_ADDR") {
            cfg.http_addr = addr;
        }
        if let Ok(path) = env::var("UPTIME_CHOPPER_DATA_FILE_PATH") {
            cfg.data_file_path = path;
        }
        if let Ok(raw) = env::var("UPTIME_CHOPPER_NOTIFICATIONS") {
            match serde_json::from_str(&raw) {
                Ok(webhooks) => cfg.notifications = webhooks,
                Err(err) => {
                    tracing::warn!(error = %err, "ignoring malformed UPTIME_CHOPPER_NOTIFICATIONS")
                }
            }
        }
        if let Ok(raw) = env::var("UPTIME_CHOPPER_MAX_DOCKER_LOG_BYTES") {
            if let Ok(n) = raw.parse() {
                cfg.max_docker_log_bytes = n;
            }
        }
        if let Ok(raw) = env::var("UPTIME_CHOPPER_DEFAULT_DOCKER_LOG_SINCE_SECONDS") {
            if let Ok(secs) = raw.parse() {
                cfg.default_docker_log_since = Duration::from_secs(secs);
            }
        }
        if let Ok(origin) = env::var("UPTIME_CHOPPER_ALLOWED_CORS_ORIGIN") {
            cfg.allowed_cors_origin = origin;
        }
        if let Ok(raw) = env::var("UPTIME_CHOPPER_SERVE_FRONTEND_FROM_DIST") {
            cfg.serve_frontend_from_dist = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        if let Ok(dir) = env::var("UPTIME_CHOPPER_FRONTEND_DIST_DIRECTORY") {
            cfg.frontend_dist_directory = dir;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.http_addr, "0.0.0.0:8080");
        assert_eq!(cfg.data_file_path, "uptime-chopper.json");
        assert_eq!(cfg.max_docker_log_bytes, 64 * 1024);
        assert_eq!(cfg.default_docker_log_since, Duration::from_secs(3600));
        assert_eq!(cfg.allowed_cors_origin, "*");
        assert!(!cfg.serve_frontend_from_dist);
    }

    #[test]
    fn test_webhook_list_parses() {
        let raw = r#"[{"name":"ops","url":"https://hooks.example/x","type":"dingtalk"}]"#;
        let webhooks: Vec<NotificationWebhook> = serde_json::from_str(raw).unwrap();
        assert_eq!(webhooks.len(), 1);
        assert_eq!(webhooks[0].name, "ops");
        assert_eq!(webhooks[0].kind, "dingtalk");
    }

    #[test]
    fn test_webhook_type_defaults_empty() {
        let raw = r#"[{"name":"ops","url":"https://hooks.example/x"}]"#;
        let webhooks: Vec<NotificationWebhook> = serde_json::from_str(raw).unwrap();
        assert_eq!(webhooks[0].kind, "");
    }
}
