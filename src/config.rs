use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::PreparerError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    /// PostgreSQL connection URL; `DATABASE_URL` overrides it
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub postgres_pool_size: u32,
    #[serde(default)]
    pub preparer: PreparerConfig,
}

fn default_pool_size() -> u32 {
    8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            postgres_url: None,
            postgres_pool_size: default_pool_size(),
            preparer: PreparerConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_level: String,
    /// Level of the preparation pass target; `log_level` when unset
    pub preparer_log_level: Option<String>,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    /// `hourly`, `daily` or anything else for a single file
    pub rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            preparer_log_level: None,
            log_dir: "./logs".to_string(),
            log_file: "preparer.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
        }
    }
}

/// What a WAITING request keeps of its provisional assignment
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WaitingAssignmentPolicy {
    /// Source endpoint and transfertools are written with the state
    #[default]
    Persist,
    /// Only the state is written
    StateOnly,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PreparerConfig {
    /// Maximum PREPARING requests per pass
    pub bulk: usize,
    /// Pause between passes of the daemon loop
    pub sleep_time_ms: u64,
    /// Used for endpoints without a usable `transfertool` attribute
    pub default_transfertools: Vec<String>,
    /// Used when the shared `throttler.mode` option is unset
    pub throttler_mode: Option<String>,
    pub waiting_assignment: WaitingAssignmentPolicy,
    pub attribute_cache_ttl_secs: u64,
}

impl Default for PreparerConfig {
    fn default() -> Self {
        Self {
            bulk: 100,
            sleep_time_ms: 1000,
            default_transfertools: vec!["fts3".to_string(), "globus".to_string()],
            throttler_mode: None,
            waiting_assignment: WaitingAssignmentPolicy::Persist,
            attribute_cache_ttl_secs: 600,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, PreparerError> {
        Self::from_file(format!("config/{}.yaml", env))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PreparerError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PreparerError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PreparerError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), PreparerError> {
        if self.preparer.bulk == 0 {
            return Err(PreparerError::Config("preparer.bulk must be > 0".into()));
        }
        if self.postgres_pool_size == 0 {
            return Err(PreparerError::Config("postgres_pool_size must be > 0".into()));
        }
        Ok(())
    }

    /// `DATABASE_URL` first, then `postgres_url`
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .or_else(|| self.postgres_url.clone())
    }
}
