//! Per-account orchestration
//!
//! For every signing key: seed a nonce cursor, estimate fees once, then run
//! the configured operations in order through that account's engine.
//! Accounts are independent and may run concurrently.

use crate::chain::ChainRpc;
use crate::clock::Clock;
use crate::config::Settings;
use crate::error::RelayerResult;
use crate::intent::OperationConfig;
use crate::tx::{
    BroadcastEngine, EngineConfig, NonceSequencer, OperationResult, OperationStatus, TxSigner,
};

use ethers::types::Address;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// What happened to one account
#[derive(Debug, Clone, Serialize)]
pub struct AccountReport {
    pub address: Address,
    pub starting_nonce: Option<u64>,
    pub results: Vec<OperationResult>,
    /// Operations not attempted after a failure or a shutdown request
    pub skipped: usize,
    pub error: Option<String>,
}

impl AccountReport {
    fn new(address: Address) -> Self {
        Self {
            address,
            starting_nonce: None,
            results: Vec::new(),
            skipped: 0,
            error: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
            && self.skipped == 0
            && self
                .results
                .iter()
                .all(|r| r.status == OperationStatus::ConfirmedSuccess)
    }
}

/// Runs the configured operations for a set of accounts
pub struct WorkflowRunner {
    rpc: Arc<dyn ChainRpc>,
    clock: Arc<dyn Clock>,
    engine_config: EngineConfig,
    chain_id: u64,
    explorer_tx_url: Option<String>,
    operations: Vec<OperationConfig>,
    max_concurrent_accounts: usize,
    continue_on_failure: bool,
    shutdown: watch::Receiver<bool>,
}

impl WorkflowRunner {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        clock: Arc<dyn Clock>,
        engine_config: EngineConfig,
        settings: &Settings,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            rpc,
            clock,
            engine_config,
            chain_id: settings.chain.chain_id,
            explorer_tx_url: settings.chain.explorer_tx_url.clone(),
            operations: settings.operations.clone(),
            max_concurrent_accounts: settings.relayer.max_concurrent_accounts.max(1),
            continue_on_failure: settings.relayer.continue_on_failure,
            shutdown,
        }
    }

    /// Process every account; reports come back in input order
    pub async fn run(&self, signers: Vec<Arc<dyn TxSigner>>) -> Vec<AccountReport> {
        stream::iter(signers.into_iter().enumerate())
            .map(|(idx, signer)| self.run_account(idx + 1, signer))
            .buffered(self.max_concurrent_accounts)
            .collect()
            .await
    }

    async fn run_account(&self, index: usize, signer: Arc<dyn TxSigner>) -> AccountReport {
        let address = signer.address();
        let mut report = AccountReport::new(address);

        if *self.shutdown.borrow() {
            report.skipped = self.operations.len();
            report.error = Some("shutdown requested".to_string());
            return report;
        }

        if let Err(e) = self.process(index, signer, &mut report).await {
            if e.should_alert() {
                error!("=== Wallet {:?}: needs attention: {} ===", address, e);
            } else {
                error!("=== Wallet {:?}: unexpected error: {} ===", address, e);
            }
            if let Some(hash) = e.last_tx_hash() {
                warn!("Wallet {:?}: last broadcast {:?} may still be pending", address, hash);
            }
            report.error = Some(e.to_string());
        }
        report
    }

    async fn process(
        &self,
        index: usize,
        signer: Arc<dyn TxSigner>,
        report: &mut AccountReport,
    ) -> RelayerResult<()> {
        let address = signer.address();
        let engine = BroadcastEngine::new(
            self.rpc.clone(),
            signer,
            self.clock.clone(),
            self.engine_config.clone(),
            self.chain_id,
            self.shutdown.clone(),
        )?
        .with_explorer(self.explorer_tx_url.clone());

        let mut sequencer = NonceSequencer::initialize(address, self.rpc.as_ref()).await?;
        report.starting_nonce = Some(sequencer.current());
        info!(
            "=== Wallet #{}: {:?} (start pending nonce={}) ===",
            index,
            address,
            sequencer.current()
        );

        let fees = engine.initial_fees().await?;

        for (done, op) in self.operations.iter().enumerate() {
            if *self.shutdown.borrow() {
                report.skipped = self.operations.len() - done;
                report.error = Some("shutdown requested".to_string());
                warn!(
                    "Wallet {:?}: shutdown requested, skipping {} remaining operation(s)",
                    address, report.skipped
                );
                break;
            }

            let request = op.to_request(address, fees);

            let result = match engine.run_operation(&mut sequencer, &request).await {
                Ok(result) => result,
                Err(e) => {
                    report.skipped = self.operations.len() - done - 1;
                    return Err(e);
                }
            };

            let status = result.status;
            report.results.push(result);

            if status != OperationStatus::ConfirmedSuccess && !self.continue_on_failure {
                report.skipped = self.operations.len() - done - 1;
                if report.skipped > 0 {
                    warn!(
                        "Wallet {:?}: {} ended {}, skipping {} remaining operation(s)",
                        address,
                        request.label,
                        status.as_str(),
                        report.skipped
                    );
                }
                break;
            }
        }

        Ok(())
    }
}
