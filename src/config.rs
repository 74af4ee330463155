//! Configuration management for the RBF relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::intent::OperationConfig;
use crate::tx::EngineConfig;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub relayer: RelayerConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Run in order for every account
    #[serde(default)]
    pub operations: Vec<OperationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// Initial maxPriorityFeePerGas
    pub priority_fee_gwei: f64,
    /// Seconds to wait for a receipt before replacing
    pub wait_budget_secs: u64,
    pub poll_interval_secs: u64,
    /// Replace-by-fee rounds after the original submission
    pub max_replacements: u32,
    pub bump_percent: u64,
    pub gas_limit_buffer_percent: u64,
    pub fee_history_blocks: u64,
    pub max_concurrent_accounts: usize,
    /// Keep going with an account's remaining operations after a non-success
    pub continue_on_failure: bool,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            priority_fee_gwei: 1.5,
            wait_budget_secs: 60,
            poll_interval_secs: 5,
            max_replacements: 3,
            bump_percent: 20,
            gas_limit_buffer_percent: 10,
            fee_history_blocks: 3,
            max_concurrent_accounts: 1,
            continue_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    #[serde(default = "default_chain_name")]
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// Prefix for transaction links, e.g. "https://etherscan.io/tx/"
    #[serde(default)]
    pub explorer_tx_url: Option<String>,
}

fn default_chain_name() -> String {
    "ethereum".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// File with one private key per line
    pub keys_path: Option<PathBuf>,
    /// Environment variable holding a single private key
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9090,
        }
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("RELAYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate a TOML document
    pub fn from_toml(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.name);
        }

        if self.operations.is_empty() {
            anyhow::bail!("At least one operation must be configured");
        }

        if self.wallet.keys_path.is_none() && self.wallet.private_key_env.is_none() {
            anyhow::bail!("Configure wallet.keys_path or wallet.private_key_env");
        }

        if self.relayer.max_concurrent_accounts == 0 {
            anyhow::bail!("max_concurrent_accounts must be at least 1");
        }

        EngineConfig::try_from(&self.relayer).context("Invalid relayer configuration")?;

        if self.relayer.bump_percent < 10 {
            tracing::warn!(
                "bump_percent={} is below the 10% most nodes require for replacements",
                self.relayer.bump_percent
            );
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
