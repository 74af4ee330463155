//! RBF Relayer - replace-by-fee transaction broadcasting for EVM accounts
//!
//! Submits contract calls with EIP-1559 fees, waits for receipts and
//! re-broadcasts under the same nonce with bumped fees when a transaction
//! stalls.

pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod intent;
pub mod metrics;
pub mod tx;
pub mod wallet;
pub mod workflow;

pub use error::{RelayerError, RelayerResult};
