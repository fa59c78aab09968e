use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::DEFAULT_COUNTRY_CODE;
use crate::push::{EndpointConfig, DEFAULT_BATCH_SIZE};

pub const ENV_SOURCE_DB: &str = "SHADOWMSG_SOURCE_DB";
pub const ENV_STORE: &str = "SHADOWMSG_STORE";
pub const ENV_LOG: &str = "SHADOWMSG_LOG";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_db_path: PathBuf,
    pub contacts_root: Option<PathBuf>,
    pub store_path: PathBuf,
    pub default_country_code: String,
    pub busy_timeout_ms: u64,
    pub auto_sync_max_age_secs: u64,
    pub push_batch_size: usize,
    pub log_level: String,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        let data_dir = dirs::data_dir().unwrap_or_else(|| home.join(".local/share"));

        Self {
            source_db_path: home.join("Library/Messages/chat.db"),
            contacts_root: Some(home.join("Library/Application Support/AddressBook")),
            store_path: data_dir.join("shadowmsg").join("shadow.db"),
            default_country_code: DEFAULT_COUNTRY_CODE.to_string(),
            busy_timeout_ms: 5000,
            auto_sync_max_age_secs: 300,
            push_batch_size: DEFAULT_BATCH_SIZE,
            log_level: "info".to_string(),
            endpoints: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads the default config file, or defaults when it does not exist.
    pub fn load() -> Result<Self, CoreError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self, CoreError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Config(format!("failed to parse config: {}", e)))
    }

    pub fn config_path() -> Result<PathBuf, CoreError> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| CoreError::Config("could not determine config directory".to_string()))?;
        Ok(config_dir.join("shadowmsg").join("config.toml"))
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(path) = lookup(ENV_SOURCE_DB) {
            self.source_db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_STORE) {
            self.store_path = PathBuf::from(path);
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.log_level = level.trim().to_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.push_batch_size == 0 {
            return Err(CoreError::Config("push_batch_size must be positive".to_string()));
        }
        if self.busy_timeout_ms == 0 {
            return Err(CoreError::Config("busy_timeout_ms must be positive".to_string()));
        }
        if self.default_country_code.is_empty()
            || !self.default_country_code.chars().all(|c| c.is_ascii_digit())
        {
            return Err(CoreError::Config(format!(
                "default_country_code must be digits, got {:?}",
                self.default_country_code
            )));
        }
        if !LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(CoreError::Config(format!("unknown log_level {:?}", self.log_level)));
        }
        let mut names = HashSet::new();
        for endpoint in &self.endpoints {
            if endpoint.name.trim().is_empty() {
                return Err(CoreError::Config("endpoint name is empty".to_string()));
            }
            if endpoint.url.trim().is_empty() {
                return Err(CoreError::Config(format!("endpoint {} has no url", endpoint.name)));
            }
            if !names.insert(endpoint.name.as_str()) {
                return Err(CoreError::Config(format!("duplicate endpoint {}", endpoint.name)));
            }
        }
        Ok(())
    }

    pub fn endpoint(&self, name: &str) -> Option<&EndpointConfig> {
        self.endpoints.iter().find(|endpoint| endpoint.name == name)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn auto_sync_max_age(&self) -> Duration {
        Duration::from_secs(self.auto_sync_max_age_secs)
    }
}
