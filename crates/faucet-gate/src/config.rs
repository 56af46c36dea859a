//! Configuration management for the faucet gate.

use crate::clock::parse_utc_offset;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for the faucet gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// HTTP server configuration
    pub http: HttpConfig,

    /// Daily quota configuration
    pub quota: QuotaConfig,

    /// Record storage configuration
    pub storage: StorageConfig,

    /// On-chain transfer configuration
    pub transfer: TransferConfig,

    /// Identity scorer configuration
    pub scorer: ScorerConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port to bind to
    pub port: u16,

    /// Address to bind to
    pub bind_address: String,

    /// Interval for pruning idle quota locks in minutes
    pub lock_prune_interval_minutes: u64,
}

/// Daily quota configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Maximum tokens per identity per day
    pub daily_limit_per_identity: u64,

    /// Maximum tokens per destination address per day
    pub daily_limit_per_destination: u64,

    /// UTC offset whose local midnight starts a new day (`UTC`, `+08:00`, ...)
    pub window_timezone_or_offset: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sled,
}

/// Record storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage backend
    pub backend: StorageBackend,

    /// Database directory (sled backend only)
    pub path: String,
}

/// On-chain transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Enables `/faucet/claim`
    pub enabled: bool,

    /// RPC endpoint URL
    pub rpc_url: String,

    /// Private key for the faucet wallet (hex string)
    pub private_key: String,

    /// Decimals used to scale whole-token amounts to base units
    pub token_decimals: u8,

    /// Whole tokens that must remain in the faucet wallet
    pub min_faucet_balance: u64,

    /// Upper bound on submitting and confirming one transfer
    pub timeout_secs: u64,
}

/// Identity scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Require a minimum score on `/faucet/claim`
    pub enabled: bool,

    /// Scorer API base URL
    pub api_url: String,

    /// Scorer API key
    pub api_key: String,

    /// Scorer (community) id
    pub scorer_id: String,

    /// Minimum score to qualify
    pub min_score: f64,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: 3030,
                bind_address: "127.0.0.1".to_string(),
                lock_prune_interval_minutes: 10,
            },
            quota: QuotaConfig {
                daily_limit_per_identity: 100,
                daily_limit_per_destination: 100,
                window_timezone_or_offset: "UTC".to_string(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Sled,
                path: "faucet-gate-db".to_string(),
            },
            transfer: TransferConfig {
                enabled: false,
                rpc_url: "https://rpc.sepolia.org".to_string(),
                private_key: "your_private_key_here".to_string(),
                token_decimals: 18,
                min_faucet_balance: 10,
                timeout_secs: 120,
            },
            scorer: ScorerConfig {
                enabled: false,
                api_url: "https://api.scorer.gitcoin.co".to_string(),
                api_key: "your_scorer_api_key".to_string(),
                scorer_id: "your_scorer_id".to_string(),
                min_score: 1.0,
                timeout_secs: 10,
            },
        }
    }
}

impl GateConfig {
    /// Load configuration from a TOML file, with `FAUCET_SECTION__KEY`
    /// environment overrides (e.g. `FAUCET_QUOTA__DAILY_LIMIT_PER_IDENTITY`)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        Self::load(path, environment())
    }

    fn load<P: AsRef<Path>>(
        path: P,
        environment: config::Environment,
    ) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(environment)
            .build()?;

        settings.try_deserialize()
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.quota.daily_limit_per_identity == 0 || self.quota.daily_limit_per_destination == 0 {
            return Err(anyhow::anyhow!("Daily limits must be positive"));
        }

        parse_utc_offset(&self.quota.window_timezone_or_offset)
            .map_err(|e| anyhow::anyhow!("quota.window_timezone_or_offset: {}", e))?;

        if self.storage.backend == StorageBackend::Sled && self.storage.path.trim().is_empty() {
            return Err(anyhow::anyhow!("Storage path must be set for the sled backend"));
        }

        if self.transfer.enabled {
            if self.transfer.private_key == "your_private_key_here" {
                return Err(anyhow::anyhow!("Private key must be configured"));
            }

            let key = self
                .transfer
                .private_key
                .strip_prefix("0x")
                .unwrap_or(&self.transfer.private_key);
            if key.len() != 64 {
                return Err(anyhow::anyhow!("Private key must be 64 hex characters"));
            }

            if self.transfer.timeout_secs == 0 {
                return Err(anyhow::anyhow!("Transfer timeout must be greater than 0"));
            }
        }

        if self.scorer.enabled {
            if self.scorer.api_key == "your_scorer_api_key" || self.scorer.scorer_id == "your_scorer_id" {
                return Err(anyhow::anyhow!("Scorer API key and scorer id must be configured"));
            }
            if !self.scorer.min_score.is_finite() || self.scorer.min_score < 0.0 {
                return Err(anyhow::anyhow!("Minimum score must be a non-negative number"));
            }
        }

        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("FAUCET")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "abcd1234567890abcd1234567890abcd1234567890abcd1234567890abcd1234";

    #[test]
    fn test_default_config() {
        let config = GateConfig::default();

        assert_eq!(config.http.port, 3030);
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.quota.daily_limit_per_identity, 100);
        assert_eq!(config.quota.window_timezone_or_offset, "UTC");
        assert_eq!(config.storage.backend, StorageBackend::Sled);
        assert!(!config.transfer.enabled);
    }

    #[test]
    fn test_default_config_is_valid() {
        // Transfers and scoring are off by default, so placeholders are fine
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = GateConfig::default();

        let serialized = toml::to_string(&config).unwrap();
        let deserialized: GateConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(config.http.port, deserialized.http.port);
        assert_eq!(config.storage.backend, deserialized.storage.backend);
        assert_eq!(config.scorer.min_score, deserialized.scorer.min_score);
    }

    #[test]
    fn test_config_from_file() -> anyhow::Result<()> {
        let toml_content = r#"
[http]
port = 8080
bind_address = "0.0.0.0"
lock_prune_interval_minutes = 5

[quota]
daily_limit_per_identity = 100
daily_limit_per_destination = 50
window_timezone_or_offset = "+08:00"

[storage]
backend = "memory"
path = ""

[transfer]
enabled = true
rpc_url = "http://127.0.0.1:8545"
private_key = "abcd1234567890abcd1234567890abcd1234567890abcd1234567890abcd1234"
token_decimals = 12
min_faucet_balance = 1000
timeout_secs = 30

[scorer]
enabled = false
api_url = "https://api.scorer.gitcoin.co"
api_key = "k"
scorer_id = "7"
min_score = 1.5
timeout_secs = 10
"#;

        let temp_dir = tempfile::tempdir()?;
        let temp_path = temp_dir.path().join("test_config.toml");
        std::fs::write(&temp_path, toml_content)?;

        let config = GateConfig::from_file(&temp_path)?;

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.quota.daily_limit_per_destination, 50);
        assert_eq!(config.quota.window_timezone_or_offset, "+08:00");
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.transfer.token_decimals, 12);
        assert!(config.validate().is_ok());

        Ok(())
    }

    #[test]
    fn test_config_validation() {
        let mut config = GateConfig::default();

        config.quota.daily_limit_per_identity = 0;
        assert!(config.validate().is_err());
        config.quota.daily_limit_per_identity = 100;

        config.quota.window_timezone_or_offset = "Europe/Berlin".to_string();
        assert!(config.validate().is_err());
        config.quota.window_timezone_or_offset = "-05:00".to_string();
        assert!(config.validate().is_ok());

        // Enabling transfers requires a real key
        config.transfer.enabled = true;
        assert!(config.validate().is_err());
        config.transfer.private_key = TEST_KEY.to_string();
        assert!(config.validate().is_ok());
        config.transfer.private_key = format!("0x{}", TEST_KEY);
        assert!(config.validate().is_ok());
        config.transfer.private_key = "short".to_string();
        assert!(config.validate().is_err());
        config.transfer.private_key = TEST_KEY.to_string();

        config.scorer.enabled = true;
        assert!(config.validate().is_err());
        config.scorer.api_key = "key".to_string();
        config.scorer.scorer_id = "1".to_string();
        assert!(config.validate().is_ok());
        config.scorer.min_score = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides_file() -> anyhow::Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let temp_path = temp_dir.path().join("env_config.toml");
        GateConfig::default().save_to_file(&temp_path)?;

        let mut vars = config::Map::new();
        vars.insert("FAUCET_QUOTA__DAILY_LIMIT_PER_IDENTITY".to_string(), "250".to_string());
        vars.insert("FAUCET_QUOTA__WINDOW_TIMEZONE_OR_OFFSET".to_string(), "+08:00".to_string());
        vars.insert("FAUCET_HTTP__PORT".to_string(), "9090".to_string());
        vars.insert("FAUCET_STORAGE__BACKEND".to_string(), "memory".to_string());
        // Without the prefix separator nothing matches
        vars.insert("FAUCET__QUOTA__DAILY_LIMIT_PER_DESTINATION".to_string(), "1".to_string());

        let config = GateConfig::load(&temp_path, environment().source(Some(vars)))?;

        assert_eq!(config.quota.daily_limit_per_identity, 250);
        assert_eq!(config.quota.daily_limit_per_destination, 100);
        assert_eq!(config.quota.window_timezone_or_offset, "+08:00");
        assert_eq!(config.http.port, 9090);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.validate().is_ok());

        Ok(())
    }

    #[test]
    fn test_save_and_load_config() -> anyhow::Result<()> {
        let mut config = GateConfig::default();
        config.http.port = 8080;
        config.quota.daily_limit_per_destination = 42;

        let temp_dir = tempfile::tempdir()?;
        let temp_path = temp_dir.path().join("test_save_config.toml");
        config.save_to_file(&temp_path)?;

        let loaded_config = GateConfig::from_file(&temp_path)?;

        assert_eq!(config.http.port, loaded_config.http.port);
        assert_eq!(loaded_config.quota.daily_limit_per_destination, 42);
        assert_eq!(config.transfer.private_key, loaded_config.transfer.private_key);

        Ok(())
    }
}
