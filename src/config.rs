//! Configuration management for the ledger service

use serde::Deserialize;
use thiserror::Error;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "WALLET_LEDGER_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Largest accepted difficulty, in leading zero bits
pub const MAX_DIFFICULTY: u32 = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read { path: String, source: io::Error },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ledger: LedgerConfig,
    pub miner: MinerConfig,
    pub auth: AuthConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: String,
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/ledger".to_string(),
            in_memory: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Required leading zero bits of every mined block hash
    pub difficulty: u32,

    /// Starting balance per wallet id; absent wallets start at zero
    pub genesis_allocations: HashMap<String, u64>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            difficulty: 12,
            genesis_allocations: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MinerConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub max_transactions_per_block: usize,

    /// Wallet credited with the block reward. Rewards are off when unset.
    pub reward_wallet: Option<String>,
    pub reward_amount: u64,

    /// Produce blocks even when there is nothing to include
    pub mine_empty_blocks: bool,

    /// Wake the miner as soon as a transaction is accepted
    pub trigger_on_submit: bool,

    /// Nonce attempts between checks for a moved tip or shutdown
    pub cancel_check_every: u64,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 10,
            max_transactions_per_block: 100,
            reward_wallet: None,
            reward_amount: 50,
            mine_empty_blocks: false,
            trigger_on_submit: true,
            cancel_check_every: 10_000,
        }
    }
}

impl MinerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    /// Print codes to stdout; development only
    Console,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub otp_ttl_secs: u64,
    pub session_ttl_secs: u64,

    /// Wrong codes accepted before a pending login is burned
    pub max_otp_attempts: u32,

    pub delivery_timeout_secs: u64,
    pub delivery: DeliveryKind,

    /// Wallets promoted to Admin at startup if registered
    pub admin_wallets: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            otp_ttl_secs: 300,
            session_ttl_secs: 3600,
            max_otp_attempts: 5,
            delivery_timeout_secs: 10,
            delivery: DeliveryKind::Console,
            admin_wallets: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Config {
    /// Parses and validates a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::Invalid(format!(
                "ledger.difficulty must be at most {}",
                MAX_DIFFICULTY
            )));
        }

        if self.miner.max_transactions_per_block == 0 {
            return Err(ConfigError::Invalid(
                "miner.max_transactions_per_block must be at least 1".to_string(),
            ));
        }

        if self.miner.interval_secs == 0 || self.miner.cancel_check_every == 0 {
            return Err(ConfigError::Invalid(
                "miner.interval_secs and miner.cancel_check_every must be positive".to_string(),
            ));
        }

        if matches!(&self.miner.reward_wallet, Some(wallet) if wallet.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "miner.reward_wallet must not be empty when set".to_string(),
            ));
        }

        if self.miner.reward_wallet.is_some() && self.miner.reward_amount == 0 {
            return Err(ConfigError::Invalid(
                "miner.reward_amount must be positive when a reward wallet is set".to_string(),
            ));
        }

        if self.auth.otp_ttl_secs == 0 || self.auth.session_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "auth.otp_ttl_secs and auth.session_ttl_secs must be positive".to_string(),
            ));
        }

        if self.auth.max_otp_attempts == 0 {
            return Err(ConfigError::Invalid(
                "auth.max_otp_attempts must be at least 1".to_string(),
            ));
        }

        if self.storage.path.trim().is_empty() && !self.storage.in_memory {
            return Err(ConfigError::Invalid(
                "storage.path must be set unless storage.in_memory is true".to_string(),
            ));
        }

        Ok(())
    }
}

/// Loads the config named by `WALLET_LEDGER_CONFIG`, or `config.toml`.
///
/// A missing file yields the defaults.
pub fn load_config() -> Result<Config, ConfigError> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(&path)
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    match fs::read_to_string(path) {
        Ok(text) => Config::from_toml(&text),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
        Err(source) => Err(ConfigError::Read {
            path: path.display().to_string(),
            source,
        }),
    }
}
