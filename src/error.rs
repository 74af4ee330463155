//! Error types for the RBF relayer

use ethers::types::H256;
use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Transaction underpriced: {0}")]
    Underpriced(String),

    #[error("Transaction already known to the node")]
    AlreadyKnown,

    #[error("Nonce too low: {0}")]
    NonceTooLow(String),

    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Replacement for {label} (nonce {nonce}) rejected after exhausting retries")]
    ReplacementRejected {
        label: String,
        nonce: u64,
        last_tx_hash: Option<H256>,
    },

    #[error("Invalid fee bid: {0}")]
    InvalidFeeBid(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Operation {label} (nonce {nonce}) cancelled while waiting for confirmation")]
    Cancelled {
        label: String,
        nonce: u64,
        last_tx_hash: Option<H256>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayerError::Rpc(_) | RelayerError::Underpriced(_))
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayerError::ReplacementRejected { .. }
                | RelayerError::NonceTooLow(_)
                | RelayerError::Wallet(_)
        )
    }

    /// Hash of the last transaction broadcast before the failure, if any
    pub fn last_tx_hash(&self) -> Option<H256> {
        match self {
            RelayerError::ReplacementRejected { last_tx_hash, .. }
            | RelayerError::Cancelled { last_tx_hash, .. } => *last_tx_hash,
            _ => None,
        }
    }
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
