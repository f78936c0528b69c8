//! # Agent Configuration
//!
//! Configuration management for the edge agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     FLYPRINT_CLOUD_ENABLED=true                                        │
//! │     FLYPRINT_CLIENT_SECRET=...                                         │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/flyprint-edge/agent.toml (Linux)                         │
//! │     ~/Library/Application Support/io.flyprint.edge/agent.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     cloud disabled, 30s heartbeat, 5s reconnect                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! devices_file = "/etc/flyprint/devices.toml"
//!
//! [node]
//! name = "EdgeNode-frontdesk"
//! location = "Front desk"
//!
//! [cloud]
//! enabled = true
//! base_url = "https://cloud.flyprint.example"
//! auth_url = "https://auth.flyprint.example/oauth2/token"
//! client_id = "edge-frontdesk"
//! client_secret = "..."
//!
//! [heartbeat]
//! interval_secs = 30
//!
//! [jobs]
//! poll_interval_secs = 10
//! max_wait_secs = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// OAuth2 scope requested by the edge node.
pub const DEFAULT_SCOPE: &str = "openid profile edge:heartbeat edge:printer edge:register";

// =============================================================================
// Node Settings
// =============================================================================

/// Locally chosen facts about this node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Display name; defaults to `EdgeNode-<hostname>`.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default = "default_location")]
    pub location: String,

    /// Interface whose MAC identifies the node (first one found otherwise).
    #[serde(default)]
    pub network_interface: Option<String>,

    /// Node id to use when auto registration is off.
    #[serde(default)]
    pub id: Option<String>,
}

fn default_location() -> String {
    "unspecified".to_string()
}

// =============================================================================
// Cloud Settings
// =============================================================================

/// Where the cloud lives and how to authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default)]
    pub enabled: bool,

    /// REST base URL; the realtime URL is derived from it.
    #[serde(default)]
    pub base_url: String,

    /// OAuth2 token endpoint.
    #[serde(default)]
    pub auth_url: String,

    #[serde(default)]
    pub client_id: String,

    #[serde(default)]
    pub client_secret: String,

    #[serde(default = "default_scope")]
    pub scope: String,

    /// Register the node on start.
    #[serde(default = "default_true")]
    pub auto_register: bool,

    /// Register managed devices on start.
    #[serde(default = "default_true")]
    pub auto_register_printers: bool,

    /// Timeout for token and REST calls (seconds).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    10
}

impl Default for CloudSettings {
    fn default() -> Self {
        CloudSettings {
            enabled: false,
            base_url: String::new(),
            auth_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scope: default_scope(),
            auto_register: true,
            auto_register_printers: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// =============================================================================
// Component Settings
// =============================================================================

/// Heartbeat behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,

    /// Consecutive failures after which the node reports itself degraded.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Timeout of the `HEAD /api/v1/health` latency probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_max_failures() -> u32 {
    flyprint_core::status::DEFAULT_MAX_HEARTBEAT_FAILURES
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        HeartbeatSettings {
            interval_secs: default_heartbeat_interval(),
            max_failures: default_max_failures(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Realtime channel behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_secs: u64,

    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Capacity of the outbound message queue.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

fn default_reconnect_interval() -> u64 {
    5
}
fn default_ping_interval() -> u64 {
    30
}
fn default_pong_timeout() -> u64 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_outbound_capacity() -> usize {
    100
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        RealtimeSettings {
            reconnect_interval_secs: default_reconnect_interval(),
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Job pipeline behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Ceiling on completion polling per job.
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,

    /// Wait before reporting a job the backend gave no handle for.
    #[serde(default = "default_no_handle_grace")]
    pub no_handle_grace_secs: u64,

    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    /// Upper bound on completion monitors running at once.
    #[serde(default = "default_max_concurrent_monitors")]
    pub max_concurrent_monitors: usize,
}

fn default_poll_interval() -> u64 {
    10
}
fn default_max_wait() -> u64 {
    600
}
fn default_no_handle_grace() -> u64 {
    10
}
fn default_download_timeout() -> u64 {
    30
}
fn default_max_concurrent_monitors() -> usize {
    64
}

impl Default for JobSettings {
    fn default() -> Self {
        JobSettings {
            poll_interval_secs: default_poll_interval(),
            max_wait_secs: default_max_wait(),
            no_handle_grace_secs: default_no_handle_grace(),
            download_timeout_secs: default_download_timeout(),
            max_concurrent_monitors: default_max_concurrent_monitors(),
        }
    }
}

/// Status reporter behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSettings {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

fn default_check_interval() -> u64 {
    30
}

impl Default for StatusSettings {
    fn default() -> Self {
        StatusSettings {
            check_interval_secs: default_check_interval(),
        }
    }
}

// =============================================================================
// Main Agent Configuration
// =============================================================================

/// Complete edge agent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Managed-device list (TOML). Defaults next to the config file.
    #[serde(default)]
    pub devices_file: Option<PathBuf>,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub cloud: CloudSettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    #[serde(default)]
    pub realtime: RealtimeSettings,

    #[serde(default)]
    pub jobs: JobSettings,

    #[serde(default)]
    pub status: StatusSettings,
}

impl AgentConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (agent.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading agent config from file");
                let contents = std::fs::read_to_string(&path).map_err(|e| {
                    SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e))
                })?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load agent config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Agent config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.cloud.enabled {
            Self::validate_http_url("cloud.base_url", &self.cloud.base_url)?;
            Self::validate_http_url("cloud.auth_url", &self.cloud.auth_url)?;

            if self.cloud.client_id.trim().is_empty() {
                return Err(SyncError::InvalidConfig("cloud.client_id is required".into()));
            }
            if self.cloud.client_secret.is_empty() {
                return Err(SyncError::InvalidConfig(
                    "cloud.client_secret is required".into(),
                ));
            }
        }

        let intervals = [
            ("heartbeat.interval_secs", self.heartbeat.interval_secs),
            ("realtime.reconnect_interval_secs", self.realtime.reconnect_interval_secs),
            ("realtime.ping_interval_secs", self.realtime.ping_interval_secs),
            ("jobs.poll_interval_secs", self.jobs.poll_interval_secs),
            ("status.check_interval_secs", self.status.check_interval_secs),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SyncError::InvalidConfig(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.realtime.outbound_capacity == 0 || self.jobs.max_concurrent_monitors == 0 {
            return Err(SyncError::InvalidConfig(
                "queue and monitor limits must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    fn validate_http_url(field: &str, value: &str) -> SyncResult<()> {
        let url = Url::parse(value)
            .map_err(|e| SyncError::InvalidUrl(format!("{}: {} ({})", field, value, e)))?;
        match url.scheme() {
            "http" | "https" => Ok(()),
            other => Err(SyncError::InvalidUrl(format!(
                "{} must use http or https, got: {}",
                field, other
            ))),
        }
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("FLYPRINT_CLOUD_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.cloud.enabled = true,
                "0" | "false" | "no" => self.cloud.enabled = false,
                _ => warn!(value = %enabled, "Ignoring FLYPRINT_CLOUD_ENABLED"),
            }
        }

        if let Ok(url) = std::env::var("FLYPRINT_BASE_URL") {
            debug!(url = %url, "Overriding cloud base URL from environment");
            self.cloud.base_url = url;
        }

        if let Ok(url) = std::env::var("FLYPRINT_AUTH_URL") {
            debug!(url = %url, "Overriding auth URL from environment");
            self.cloud.auth_url = url;
        }

        if let Ok(id) = std::env::var("FLYPRINT_CLIENT_ID") {
            self.cloud.client_id = id;
        }

        // Never logged
        if let Ok(secret) = std::env::var("FLYPRINT_CLIENT_SECRET") {
            self.cloud.client_secret = secret;
        }

        if let Ok(name) = std::env::var("FLYPRINT_NODE_NAME") {
            self.node.name = Some(name);
        }

        if let Ok(location) = std::env::var("FLYPRINT_NODE_LOCATION") {
            self.node.location = location;
        }

        if let Ok(interval) = std::env::var("FLYPRINT_HEARTBEAT_INTERVAL") {
            match interval.parse::<u64>() {
                Ok(secs) => self.heartbeat.interval_secs = secs,
                Err(_) => warn!(value = %interval, "Ignoring FLYPRINT_HEARTBEAT_INTERVAL"),
            }
        }

        if let Ok(path) = std::env::var("FLYPRINT_DEVICES_FILE") {
            self.devices_file = Some(PathBuf::from(path));
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("agent.toml"))
    }

    /// Devices file from the config, or `devices.toml` in the config dir.
    pub fn devices_path(&self) -> Option<PathBuf> {
        self.devices_file.clone().or_else(|| {
            Self::project_dirs().map(|dirs| dirs.config_dir().join("devices.toml"))
        })
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("io", "flyprint", "flyprint-edge")
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// REST base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.cloud.base_url.trim_end_matches('/')
    }

    /// Realtime channel URL for a node.
    ///
    /// `http` becomes `ws` and `https` becomes `wss`.
    pub fn websocket_url(&self, node_id: &str) -> SyncResult<String> {
        let mut url = Url::parse(self.base_url())?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(SyncError::InvalidUrl(format!(
                    "cannot derive realtime URL from scheme {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::InvalidUrl(format!("cannot switch scheme to {}", scheme)))?;

        let path = format!("{}/api/v1/edge/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("node_id", node_id);

        Ok(url.to_string())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.cloud.request_timeout_secs)
    }
}
