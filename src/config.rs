//! Configuration management for the rifa service
//!
//! TOML file loading with environment variable overrides and validation.
//! The scratch-card prize table lives here; it is deliberately *not*
//! validated at load time, because a misconfigured table must never block
//! a purchase. Invalid entries are skipped when the table is compiled for
//! drawing.

use crate::errors::{ConfigurationError, RifaResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RifaConfig {
    pub api: ApiSettings,
    pub storage: StorageSettings,
    pub scratchcards: ScratchCardSettings,
    pub withdrawals: WithdrawalSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub listen_address: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchCardSettings {
    /// Length of the generated display codes.
    pub code_length: usize,
    /// Ordered prize table; selection probability of an entry is its
    /// weight over the sum of all valid weights.
    pub prize_table: Vec<PrizeTableEntry>,
}

/// One row of the scratch-card prize table.
///
/// Fields default to zero so a partially written entry parses instead of
/// rejecting the whole file; a zero weight makes the entry inert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeTableEntry {
    #[serde(default)]
    pub prize_cents: u64,
    #[serde(default)]
    pub weight: u32,
}

/// Affiliate withdrawal settings. Read by the admin surface; unused by
/// the fulfillment core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalSettings {
    pub min_withdraw_cents: u64,
}

impl Default for RifaConfig {
    fn default() -> Self {
        Self {
            api: ApiSettings::default(),
            storage: StorageSettings::default(),
            scratchcards: ScratchCardSettings::default(),
            withdrawals: WithdrawalSettings::default(),
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: "./rifa_data".to_string(),
        }
    }
}

impl Default for ScratchCardSettings {
    fn default() -> Self {
        Self {
            code_length: 12,
            prize_table: vec![
                PrizeTableEntry { prize_cents: 0, weight: 80 },
                PrizeTableEntry { prize_cents: 500, weight: 15 },
                PrizeTableEntry { prize_cents: 2000, weight: 5 },
            ],
        }
    }
}

impl Default for WithdrawalSettings {
    fn default() -> Self {
        Self {
            min_withdraw_cents: 5000,
        }
    }
}

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> RifaResult<RifaConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            RifaConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        self.validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> RifaResult<RifaConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e))
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut RifaConfig) -> RifaResult<()> {
        if let Ok(addr) = env::var("RIFA_API_ADDRESS") {
            config.api.listen_address = addr;
        }
        if let Ok(port) = env::var("RIFA_API_PORT") {
            config.api.port = port.parse().map_err(|_| ConfigurationError::InvalidValue {
                field: "RIFA_API_PORT".to_string(),
                value: port,
                reason: "Invalid port number".to_string(),
            })?;
        }
        if let Ok(data_dir) = env::var("RIFA_DATA_DIR") {
            config.storage.data_dir = data_dir;
        }
        if let Ok(timeout) = env::var("RIFA_REQUEST_TIMEOUT_SECS") {
            config.api.request_timeout_secs =
                timeout.parse().map_err(|_| ConfigurationError::InvalidValue {
                    field: "RIFA_REQUEST_TIMEOUT_SECS".to_string(),
                    value: timeout,
                    reason: "Invalid timeout value".to_string(),
                })?;
        }

        Ok(())
    }

    fn validate(&self, config: &RifaConfig) -> RifaResult<()> {
        if config.api.port == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "api.port".to_string(),
                value: "0".to_string(),
                reason: "Port cannot be zero".to_string(),
            }
            .into());
        }

        if config.api.request_timeout_secs == 0 {
            return Err(ConfigurationError::InvalidValue {
                field: "api.request_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "Timeout cannot be zero".to_string(),
            }
            .into());
        }

        if config.storage.data_dir.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_dir".to_string()).into());
        }

        if config.scratchcards.code_length < 4 {
            return Err(ConfigurationError::InvalidValue {
                field: "scratchcards.code_length".to_string(),
                value: config.scratchcards.code_length.to_string(),
                reason: "Code length must be at least 4".to_string(),
            }
            .into());
        }

        // The prize table is intentionally left unvalidated: invalid
        // entries are skipped at draw time instead of blocking startup.
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
