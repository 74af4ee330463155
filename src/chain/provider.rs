//! ethers HTTP backend for `ChainRpc`, rotating through the configured
//! endpoints when one stops answering

use super::{ChainRpc, ReceiptStatus, TxReceipt};
use crate::config::ChainConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::tx::{SignedTransaction, TxDraft};

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider, ProviderError, RpcError};
use ethers::types::{Address, BlockNumber, TransactionReceipt, H256, U256, U64};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Node access over one or more HTTP endpoints
pub struct ChainProvider {
    config: ChainConfig,
    endpoints: Vec<Provider<Http>>,
    /// Index of the endpoint requests go to
    active: AtomicUsize,
}

impl ChainProvider {
    /// Connect to every configured URL; unusable URLs are skipped with a warning
    pub fn new(config: ChainConfig) -> RelayerResult<Self> {
        let endpoints: Vec<Provider<Http>> = config
            .rpc_urls
            .iter()
            .filter_map(|url| match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    debug!("RPC endpoint for chain {}: {}", config.chain_id, url);
                    Some(provider.interval(Duration::from_millis(100)))
                }
                Err(e) => {
                    warn!("Skipping RPC endpoint {}: {}", url, e);
                    None
                }
            })
            .collect();

        if endpoints.is_empty() {
            return Err(RelayerError::Config(format!(
                "No usable RPC endpoint for chain {}",
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            endpoints,
            active: AtomicUsize::new(0),
        })
    }

    pub fn http(&self) -> &Provider<Http> {
        &self.endpoints[self.active.load(Ordering::Relaxed) % self.endpoints.len()]
    }

    /// Move on to the next endpoint
    pub fn failover(&self) {
        if self.endpoints.len() < 2 {
            return;
        }
        let next = (self.active.load(Ordering::Relaxed) + 1) % self.endpoints.len();
        self.active.store(next, Ordering::Relaxed);
        warn!(
            "Switching chain {} to RPC endpoint #{}",
            self.config.chain_id, next
        );
    }

    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Warn when the node serves a different chain than configured
    pub async fn check_chain_id(&self) {
        match self.http().get_chainid().await {
            Ok(id) if id == U256::from(self.config.chain_id) => {
                info!("Connected to {} (chain {})", self.config.name, id);
            }
            Ok(id) => {
                warn!(
                    "Node reports chain_id={}, expected {} ({})",
                    id, self.config.chain_id, self.config.name
                );
            }
            Err(e) => {
                warn!("Could not read chain id from node: {}", e);
            }
        }
    }

    fn all_failed(&self, what: &str) -> RelayerError {
        RelayerError::Rpc(format!(
            "All providers for chain {} failed to {}",
            self.config.chain_id, what
        ))
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64> {
        for _ in 0..self.endpoints.len() {
            match self
                .http()
                .get_transaction_count(address, Some(BlockNumber::Pending.into()))
                .await
            {
                Ok(count) => return nonce_from_count(count),
                Err(e) => {
                    warn!(
                        "Failed to get pending nonce from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.all_failed("return a pending nonce"))
    }

    async fn estimate_gas(&self, draft: &TxDraft) -> RelayerResult<U256> {
        self.http()
            .estimate_gas(&draft.to_typed(), None)
            .await
            .map_err(|e| RelayerError::GasEstimation(e.to_string()))
    }

    async fn fee_history(&self, block_count: u64) -> RelayerResult<Vec<U256>> {
        for _ in 0..self.endpoints.len() {
            match self
                .http()
                .fee_history(block_count, BlockNumber::Latest, &[])
                .await
            {
                Ok(history) => return Ok(history.base_fee_per_gas),
                Err(e) => {
                    warn!(
                        "Failed to get fee history from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.all_failed("return fee history"))
    }

    async fn gas_price(&self) -> RelayerResult<U256> {
        for _ in 0..self.endpoints.len() {
            match self.http().get_gas_price().await {
                Ok(price) => return Ok(price),
                Err(e) => {
                    warn!(
                        "Failed to get gas price from chain {}: {}",
                        self.config.chain_id, e
                    );
                    self.failover();
                }
            }
        }

        Err(self.all_failed("return a gas price"))
    }

    async fn submit(&self, tx: &SignedTransaction) -> RelayerResult<H256> {
        match self.http().send_raw_transaction(tx.raw().clone()).await {
            Ok(pending) => Ok(*pending),
            Err(e) => {
                let err = classify_submit_error(e);
                if matches!(err, RelayerError::Rpc(_)) {
                    self.failover();
                }
                Err(err)
            }
        }
    }

    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TxReceipt>> {
        match self.http().get_transaction_receipt(tx_hash).await {
            Ok(receipt) => Ok(receipt.map(convert_receipt)),
            Err(e) => {
                self.failover();
                Err(RelayerError::Rpc(e.to_string()))
            }
        }
    }
}

fn nonce_from_count(count: U256) -> RelayerResult<u64> {
    u64::try_from(count)
        .map_err(|_| RelayerError::Rpc(format!("transaction count {} exceeds u64", count)))
}

fn convert_receipt(receipt: TransactionReceipt) -> TxReceipt {
    let status = if receipt.status == Some(U64::one()) {
        ReceiptStatus::Success
    } else {
        ReceiptStatus::Failure
    };

    TxReceipt {
        tx_hash: receipt.transaction_hash,
        status,
        block_number: receipt.block_number.map(|b| b.as_u64()),
        gas_used: receipt.gas_used,
    }
}

/// Map a node response to submission outcomes. Transport failures are
/// `Rpc`; JSON-RPC error responses are classified by message.
fn classify_submit_error(err: ProviderError) -> RelayerError {
    match err.as_error_response() {
        Some(response) => classify_rejection(&response.message),
        None => RelayerError::Rpc(err.to_string()),
    }
}

fn classify_rejection(message: &str) -> RelayerError {
    let lower = message.to_lowercase();

    if lower.contains("already known") || lower.contains("known transaction") {
        RelayerError::AlreadyKnown
    } else if lower.contains("underpriced") || lower.contains("fee too low") {
        RelayerError::Underpriced(message.to_string())
    } else if lower.contains("nonce too low") {
        RelayerError::NonceTooLow(message.to_string())
    } else {
        RelayerError::Submission(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_config(urls: Vec<&str>) -> ChainConfig {
        ChainConfig {
            chain_id: 1,
            name: "ethereum".to_string(),
            rpc_urls: urls.into_iter().map(String::from).collect(),
            explorer_tx_url: None,
        }
    }

    #[test]
    fn test_classify_node_rejections() {
        assert!(matches!(
            classify_rejection("already known"),
            RelayerError::AlreadyKnown
        ));
        assert!(matches!(
            classify_rejection("replacement transaction underpriced"),
            RelayerError::Underpriced(_)
        ));
        assert!(matches!(
            classify_rejection("transaction underpriced"),
            RelayerError::Underpriced(_)
        ));
        assert!(matches!(
            classify_rejection("nonce too low: next nonce 12, tx nonce 11"),
            RelayerError::NonceTooLow(_)
        ));
        assert!(matches!(
            classify_rejection("insufficient funds for gas * price + value"),
            RelayerError::Submission(_)
        ));
    }

    #[test]
    fn test_oversized_transaction_count_is_an_error() {
        assert_eq!(nonce_from_count(U256::from(42u64)).unwrap(), 42);
        assert!(matches!(
            nonce_from_count(U256::from(u64::MAX) + 1),
            Err(RelayerError::Rpc(_))
        ));
    }

    #[test]
    fn test_convert_receipt_status() {
        let mut receipt = TransactionReceipt {
            transaction_hash: H256::repeat_byte(7),
            block_number: Some(U64::from(100u64)),
            gas_used: Some(U256::from(50_000u64)),
            status: Some(U64::one()),
            ..Default::default()
        };
        let converted = convert_receipt(receipt.clone());
        assert_eq!(converted.status, ReceiptStatus::Success);
        assert_eq!(converted.block_number, Some(100));

        receipt.status = Some(U64::zero());
        assert_eq!(convert_receipt(receipt).status, ReceiptStatus::Failure);
    }

    #[test]
    fn test_provider_requires_a_valid_url() {
        assert!(ChainProvider::new(chain_config(vec!["not a url"])).is_err());
        assert!(ChainProvider::new(chain_config(vec![])).is_err());
    }

    #[test]
    fn test_failover_rotates_providers() {
        let provider = ChainProvider::new(chain_config(vec![
            "http://127.0.0.1:8545",
            "http://127.0.0.1:9545",
        ]))
        .unwrap();
        assert_eq!(provider.active.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.active.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.active.load(Ordering::Relaxed), 0);
        assert_eq!(provider.chain_id(), 1);
    }
}
