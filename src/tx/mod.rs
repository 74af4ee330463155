//! Transaction submission module with nonce management and fee escalation

mod draft;
mod engine;
mod gas;
mod nonce;
mod signer;

pub use draft::TxDraft;
pub use engine::{
    BroadcastEngine, EngineConfig, OperationRequest, OperationResult, OperationStatus,
    TransactionAttempt,
};
pub use gas::{FeeBid, FeeEstimator};
pub use nonce::NonceSequencer;
pub use signer::{LocalSigner, SignedTransaction, TxSigner};

#[cfg(test)]
pub use signer::MockTxSigner;
