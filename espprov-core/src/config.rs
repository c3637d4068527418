//! Provider configuration, stored as JSON

use std::path::Path;
use std::time::Duration;

use crate::callback::DEFAULT_PROVIDER;
use crate::connection::{DEFAULT_PROOF_OF_POSSESSION, DEFAULT_USERNAME};

pub const DEFAULT_API_URL: &str = "http://localhost:8080/api/master";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid api url {0:?}")]
    InvalidUrl(String),
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Backend base url, the device is registered at `<api_url>/rest/battery`
    pub api_url: String,
    /// Name tagged onto every event
    pub provider: String,
    pub device_search_timeout_secs: u64,
    pub device_search_max_iterations: u32,
    pub wifi_search_timeout_secs: u64,
    pub wifi_search_max_iterations: u32,
    /// How long the device gets to report a live backend connection
    pub backend_connection_timeout_secs: u64,
    pub backend_poll_interval_ms: u64,
    pub backend_request_timeout_secs: u64,
    pub dedupe_wifi_networks: bool,
    pub proof_of_possession: String,
    pub username: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            provider: DEFAULT_PROVIDER.to_string(),
            device_search_timeout_secs: 120,
            device_search_max_iterations: 25,
            wifi_search_timeout_secs: 120,
            wifi_search_max_iterations: 25,
            backend_connection_timeout_secs: 60,
            backend_poll_interval_ms: 500,
            backend_request_timeout_secs: 30,
            dedupe_wifi_networks: false,
            proof_of_possession: DEFAULT_PROOF_OF_POSSESSION.to_string(),
            username: DEFAULT_USERNAME.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Read `path`, writing the defaults there first if it does not exist
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: ProviderConfig = serde_json::from_str(&data)?;
            config.api_uri()?;
            Ok(config)
        } else {
            let config = ProviderConfig::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, serde_json::to_string_pretty(&config)?)?;
            log::info!("wrote default config to {}", path.display());
            Ok(config)
        }
    }

    pub fn api_uri(&self) -> Result<hyper::Uri, ConfigError> {
        self.api_url
            .parse::<hyper::Uri>()
            .map_err(|_| ConfigError::InvalidUrl(self.api_url.clone()))
    }

    pub fn device_search_timeout(&self) -> Duration {
        Duration::from_secs(self.device_search_timeout_secs)
    }

    pub fn wifi_search_timeout(&self) -> Duration {
        Duration::from_secs(self.wifi_search_timeout_secs)
    }

    pub fn backend_connection_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_connection_timeout_secs)
    }

    pub fn backend_poll_interval(&self) -> Duration {
        Duration::from_millis(self.backend_poll_interval_ms)
    }

    pub fn backend_request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_request_timeout_secs)
    }
}
