//! Chain module - the node interface consumed by the broadcast engine
//!
//! This module provides:
//! - The `ChainRpc` trait: nonce, gas, fee, submission and receipt queries
//! - An ethers HTTP implementation with multi-RPC failover

pub mod provider;

pub use provider::ChainProvider;

use crate::error::RelayerResult;
use crate::tx::{SignedTransaction, TxDraft};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// Execution outcome recorded in a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    Success,
    /// Mined but reverted
    Failure,
}

/// Receipt fields the engine cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: H256,
    pub status: ReceiptStatus,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Node operations used by the relayer. Implementations must be safe to share
/// between accounts processed concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// Transaction count of `address` including pending transactions
    async fn pending_nonce(&self, address: Address) -> RelayerResult<u64>;

    /// Gas estimate for a draft; fails with `GasEstimation`
    async fn estimate_gas(&self, draft: &TxDraft) -> RelayerResult<U256>;

    /// Base fees per gas over the last `block_count` blocks, oldest first
    async fn fee_history(&self, block_count: u64) -> RelayerResult<Vec<U256>>;

    /// Legacy gas price
    async fn gas_price(&self) -> RelayerResult<U256>;

    /// Broadcast a signed transaction and return its hash
    async fn submit(&self, tx: &SignedTransaction) -> RelayerResult<H256>;

    /// Receipt for a transaction, `None` while it is not mined
    async fn receipt(&self, tx_hash: H256) -> RelayerResult<Option<TxReceipt>>;
}
