use std::fs;
use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::error::{Result, SyncError};

pub const API_PREFIX_DEFAULT: &str = "/api/v1";
pub const BG_OPERATIONS_UPDATE_INTERVAL_MS_DEFAULT: u64 = 6000;
pub const DEFAULT_STACK_VERSION: &str = "HDP-2.0.5";
pub const FINALIZE_CONTEXT_DEFAULT: &str = "Confirm Finalize";

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct AmbariServer {
    pub url: String,
    #[serde(default = "AmbariServer::api_prefix")]
    pub api_prefix: String,
    pub user: Option<String>,
    pub password_file: Option<String>,
}

impl AmbariServer {
    pub fn api_prefix() -> String {
        API_PREFIX_DEFAULT.to_string()
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Polling {
    #[serde(default = "Polling::bg_operations_update_interval_ms")]
    pub bg_operations_update_interval_ms: u64,
    pub request_timeout_s: Option<u64>,
}

impl Polling {
    pub fn bg_operations_update_interval_ms() -> u64 {
        BG_OPERATIONS_UPDATE_INTERVAL_MS_DEFAULT
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.bg_operations_update_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_s.map(Duration::from_secs)
    }
}

impl Default for Polling {
    fn default() -> Self {
        Polling {
            bg_operations_update_interval_ms: BG_OPERATIONS_UPDATE_INTERVAL_MS_DEFAULT,
            request_timeout_s: None,
        }
    }
}

/// Capability flags the server side advertises for the running stack.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct Supports {
    #[serde(default = "Supports::stack_upgrade")]
    pub stack_upgrade: bool,
    #[serde(default)]
    pub display_older_versions: bool,
}

impl Supports {
    pub fn stack_upgrade() -> bool {
        true
    }
}

impl Default for Supports {
    fn default() -> Self {
        Supports {
            stack_upgrade: true,
            display_older_versions: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SyncConfig {
    pub ambari: AmbariServer,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub supports: Supports,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default = "SyncConfig::default_stack_version")]
    pub default_stack_version: String,
    #[serde(default = "SyncConfig::finalize_context")]
    pub finalize_context: String,
}

impl SyncConfig {
    pub fn default_stack_version() -> String {
        DEFAULT_STACK_VERSION.to_string()
    }

    pub fn finalize_context() -> String {
        FINALIZE_CONTEXT_DEFAULT.to_string()
    }

    pub fn new(url: &str) -> SyncConfig {
        SyncConfig {
            ambari: AmbariServer {
                url: url.to_string(),
                api_prefix: AmbariServer::api_prefix(),
                user: None,
                password_file: None,
            },
            polling: Polling::default(),
            supports: Supports::default(),
            test_mode: false,
            default_stack_version: Self::default_stack_version(),
            finalize_context: Self::finalize_context(),
        }
    }

    /// Reads `<config_dir>/sync.toml`.
    pub fn from_dir(config_dir: &str) -> Result<SyncConfig> {
        let config = Self::read_item::<SyncConfig>(config_dir, "sync")?;
        debug!("sync config: {:?}", &config);
        Ok(config)
    }

    /// Basic-auth credentials, `admin`/`admin` unless configured otherwise.
    pub fn credentials(&self) -> Result<(String, String)> {
        let user = match &self.ambari.user {
            Some(user) => String::from(user),
            None => String::from("admin"),
        };
        let password = match &self.ambari.password_file {
            Some(password_file) => fs::read_to_string(Path::new(password_file))?
                .trim_end()
                .to_string(),
            None => String::from("admin"),
        };
        Ok((user, password))
    }
}

impl ConfigHandler for SyncConfig {}

pub trait ConfigHandler {
    fn read_item<T: DeserializeOwned>(config_dir: &str, config_name: &str) -> Result<T> {
        let config_path = format!("{}/{}.toml", config_dir, config_name);
        let contents = fs::read_to_string(&config_path)?;
        toml::from_str::<T>(&contents).map_err(|source| SyncError::Config {
            path: config_path,
            source,
        })
    }
}
