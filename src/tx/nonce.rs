//! Per-account nonce sequencing
//!
//! Handles:
//! - Seeding the local cursor from the node's pending transaction count
//! - Handing out one nonce per logical operation
//! - Rolling the cursor back after an abandoned operation
//! - Operator-driven resync with the node

use crate::chain::ChainRpc;
use crate::error::RelayerResult;

use ethers::types::Address;
use tracing::{debug, info, warn};

/// Local nonce cursor for one signing identity.
///
/// Rolling back does not cancel an abandoned transaction on-chain. If that
/// transaction is mined later, the next operation reusing its nonce will be
/// rejected by the node.
#[derive(Debug)]
pub struct NonceSequencer {
    address: Address,
    /// Next nonce to hand out
    next: u64,
    /// Pending count observed at the last node read
    last_synced: u64,
}

impl NonceSequencer {
    /// Seed the cursor from the node's pending transaction count
    pub async fn initialize(address: Address, rpc: &dyn ChainRpc) -> RelayerResult<Self> {
        let pending = rpc.pending_nonce(address).await?;
        debug!("Initialized nonce for {:?}: {}", address, pending);

        Ok(Self {
            address,
            next: pending,
            last_synced: pending,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Next nonce that `take` would return
    pub fn current(&self) -> u64 {
        self.next
    }

    /// Pending count observed at the last node read
    pub fn last_synced(&self) -> u64 {
        self.last_synced
    }

    /// Allocate the nonce for a new operation
    pub fn take(&mut self) -> u64 {
        let nonce = self.next;
        self.next += 1;
        debug!("Allocated nonce {} for {:?}", nonce, self.address);
        nonce
    }

    /// Give back the most recently taken nonce, floored at zero
    pub fn rollback(&mut self) {
        self.next = self.next.saturating_sub(1);
        warn!(
            "Rolled back nonce cursor for {:?} to {}",
            self.address, self.next
        );
    }

    /// Make sure `nonce` is never handed out again
    pub fn advance_past(&mut self, nonce: u64) {
        let floor = nonce.saturating_add(1);
        if self.next < floor {
            debug!(
                "Advancing nonce cursor for {:?} from {} to {}",
                self.address, self.next, floor
            );
            self.next = floor;
        }
    }

    /// Overwrite the cursor with the node's pending count
    pub async fn resync(&mut self, rpc: &dyn ChainRpc) -> RelayerResult<()> {
        let pending = rpc.pending_nonce(self.address).await?;

        if pending != self.next {
            info!(
                "Nonce resync for {:?}: local {} -> node {}",
                self.address, self.next, pending
            );
        }

        self.next = pending;
        self.last_synced = pending;
        Ok(())
    }
}
