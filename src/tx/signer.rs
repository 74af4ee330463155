//! Transaction signing

use super::draft::TxDraft;
use crate::error::{RelayerError, RelayerResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, H256};
use ethers::utils::keccak256;

/// Signed, RLP-encoded transaction ready for broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn new(raw: Bytes) -> Self {
        let hash = H256::from(keccak256(&raw));
        Self { raw, hash }
    }

    /// Raw bytes for `eth_sendRawTransaction`
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Transaction hash the node will report for these bytes
    pub fn hash(&self) -> H256 {
        self.hash
    }
}

/// Produces signed transactions for one identity
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TxSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a fully populated draft. Same draft and key give the same bytes.
    async fn sign(&self, draft: &TxDraft) -> RelayerResult<SignedTransaction>;
}

/// Signer backed by an in-memory private key
pub struct LocalSigner {
    wallet: LocalWallet,
}

impl LocalSigner {
    pub fn new(wallet: LocalWallet, chain_id: u64) -> Self {
        Self {
            wallet: wallet.with_chain_id(chain_id),
        }
    }
}

#[async_trait]
impl TxSigner for LocalSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, draft: &TxDraft) -> RelayerResult<SignedTransaction> {
        if draft.from != self.wallet.address() {
            return Err(RelayerError::Signing(format!(
                "draft sender {:?} does not match signer {:?}",
                draft.from,
                self.wallet.address()
            )));
        }
        if draft.chain_id != self.wallet.chain_id() {
            return Err(RelayerError::Signing(format!(
                "draft chain id {} does not match signer chain id {}",
                draft.chain_id,
                self.wallet.chain_id()
            )));
        }
        if draft.gas_limit.is_none() {
            return Err(RelayerError::Signing("draft has no gas limit".to_string()));
        }

        let tx = draft.to_typed();
        let signature = self
            .wallet
            .sign_transaction(&tx)
            .await
            .map_err(|e| RelayerError::Signing(e.to_string()))?;

        Ok(SignedTransaction::new(tx.rlp_signed(&signature)))
    }
}
