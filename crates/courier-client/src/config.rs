//! Client configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use courier_shared::constants::DEFAULT_HEARTBEAT_SECS;
use courier_sync::config::env_parse;
use courier_sync::SyncConfig;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the chat server.
    /// Env: `COURIER_SERVER_URL`
    pub server_url: String,

    /// Bearer token sent with every request.
    /// Env: `COURIER_API_TOKEN`
    pub api_token: Option<String>,

    /// Database file. `None` uses the platform data directory.
    /// Env: `COURIER_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Period of the `/health` connectivity probe.
    /// Env: `COURIER_HEARTBEAT_SECS`
    pub heartbeat_interval: Duration,

    /// Per-request timeout; a timeout counts as a transient failure.
    /// Env: `COURIER_REQUEST_TIMEOUT_SECS`
    pub request_timeout: Duration,

    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            api_token: None,
            db_path: None,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_SECS),
            request_timeout: Duration::from_secs(10),
            sync: SyncConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self {
            sync: SyncConfig::from_env(),
            ..Self::default()
        };

        if let Ok(url) = std::env::var("COURIER_SERVER_URL") {
            if !url.trim().is_empty() {
                config.server_url = url.trim().to_string();
            }
        }

        config.api_token = std::env::var("COURIER_API_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        if let Ok(path) = std::env::var("COURIER_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(secs) = env_parse::<u64>("COURIER_HEARTBEAT_SECS") {
            config.heartbeat_interval = Duration::from_secs(secs.max(1));
        }

        if let Some(secs) = env_parse::<u64>("COURIER_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs.max(1));
        }

        config
    }
}
