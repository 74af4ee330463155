//! Private key loading

use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::{LocalSigner, TxSigner};

use ethers::signers::LocalWallet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Parse a keys file: one 0x-prefixed hex key per line, blank lines ignored
pub fn load_keys(path: &Path) -> RelayerResult<Vec<LocalWallet>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| RelayerError::Wallet(format!("Cannot read {:?}: {}", path, e)))?;

    let mut wallets = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        let key = line.trim();
        if key.is_empty() {
            continue;
        }
        wallets.push(parse_key(key).map_err(|e| {
            RelayerError::Wallet(format!("{:?} line {}: {}", path, idx + 1, e))
        })?);
    }

    if wallets.is_empty() {
        return Err(RelayerError::Wallet(format!("{:?} contains no keys", path)));
    }

    Ok(wallets)
}

fn parse_key(key: &str) -> Result<LocalWallet, String> {
    if !key.starts_with("0x") || key.len() < 66 {
        return Err("expected a 0x-prefixed 32-byte hex private key".to_string());
    }
    key.parse::<LocalWallet>()
        .map_err(|_| "invalid private key".to_string())
}

/// Build signers from the configured key source
pub fn load_signers(config: &WalletConfig, chain_id: u64) -> RelayerResult<Vec<Arc<dyn TxSigner>>> {
    let wallets = if let Some(path) = &config.keys_path {
        load_keys(path)?
    } else if let Some(var) = &config.private_key_env {
        let key = std::env::var(var)
            .map_err(|_| RelayerError::Wallet(format!("Environment variable {} is not set", var)))?;
        vec![parse_key(key.trim()).map_err(|e| RelayerError::Wallet(format!("{}: {}", var, e)))?]
    } else {
        return Err(RelayerError::Wallet(
            "No wallet configured. Set wallet.keys_path or wallet.private_key_env".to_string(),
        ));
    };

    info!("Loaded {} signing key(s)", wallets.len());
    Ok(wallets
        .into_iter()
        .map(|w| Arc::new(LocalSigner::new(w, chain_id)) as Arc<dyn TxSigner>)
        .collect())
}
