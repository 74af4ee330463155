//! Broadcast-and-confirm engine with replace-by-fee escalation
//!
//! One `run_operation` call drives a single logical operation through
//! `Building -> Submitted -> {ConfirmedSuccess, ConfirmedFailure, Abandoned}`.
//! Every attempt of an operation shares one nonce; a replacement is the same
//! draft re-signed with bumped fees.

use super::draft::TxDraft;
use super::gas::{FeeBid, FeeEstimator};
use super::nonce::NonceSequencer;
use super::signer::TxSigner;
use crate::chain::{ChainRpc, ReceiptStatus, TxReceipt};
use crate::clock::Clock;
use crate::config::RelayerConfig;
use crate::error::{RelayerError, RelayerResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::parse_units;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Engine parameters, validated once at construction
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Initial maxPriorityFeePerGas in wei
    pub priority_fee: U256,
    /// How long to wait for a receipt before replacing
    pub wait_budget: Duration,
    /// Delay between receipt polls
    pub poll_interval: Duration,
    /// Replacement rounds after the original submission
    pub max_replacements: u32,
    /// Fee increase per replacement, in percent
    pub bump_percent: u64,
    /// Margin added to node gas estimates, in percent
    pub gas_limit_buffer_percent: u64,
    /// Blocks of fee history used for the base fee
    pub fee_history_blocks: u64,
}

impl EngineConfig {
    pub fn validate(&self) -> RelayerResult<()> {
        if self.wait_budget.is_zero() {
            return Err(RelayerError::Config(
                "confirmation wait budget must be positive".to_string(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(RelayerError::Config(
                "receipt poll interval must be positive".to_string(),
            ));
        }
        if self.bump_percent == 0 {
            return Err(RelayerError::Config(
                "fee bump percentage must be positive".to_string(),
            ));
        }
        if self.fee_history_blocks == 0 {
            return Err(RelayerError::Config(
                "fee history window must cover at least one block".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            priority_fee: U256::from(1_500_000_000u64),
            wait_budget: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            max_replacements: 3,
            bump_percent: 20,
            gas_limit_buffer_percent: 10,
            fee_history_blocks: 3,
        }
    }
}

impl TryFrom<&RelayerConfig> for EngineConfig {
    type Error = RelayerError;

    fn try_from(config: &RelayerConfig) -> RelayerResult<Self> {
        let gwei = config.priority_fee_gwei;
        if !gwei.is_finite() || gwei < 0.0 {
            return Err(RelayerError::Config(format!(
                "priority_fee_gwei must be a non-negative number, got {}",
                gwei
            )));
        }
        let priority_fee: U256 = parse_units(gwei.to_string(), "gwei")
            .map_err(|e| RelayerError::Config(format!("priority_fee_gwei {}: {}", gwei, e)))?
            .into();

        let engine = Self {
            priority_fee,
            wait_budget: Duration::from_secs(config.wait_budget_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_replacements: config.max_replacements,
            bump_percent: config.bump_percent,
            gas_limit_buffer_percent: config.gas_limit_buffer_percent,
            fee_history_blocks: config.fee_history_blocks,
        };
        engine.validate()?;
        Ok(engine)
    }
}

/// Terminal outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    ConfirmedSuccess,
    /// Mined but reverted
    ConfirmedFailure,
    /// Retry budget exhausted without a receipt
    Abandoned,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::ConfirmedSuccess => "confirmed_success",
            OperationStatus::ConfirmedFailure => "confirmed_failure",
            OperationStatus::Abandoned => "abandoned",
        }
    }
}

/// One logical unit of work handed to the engine
#[derive(Debug, Clone)]
pub struct OperationRequest {
    /// Human-readable description used in logs
    pub label: String,
    /// Short operation kind used as a metrics label
    pub kind: String,
    pub to: Address,
    pub value: U256,
    pub call_data: Bytes,
    pub fee_bid: FeeBid,
    /// Gas limit used when estimation fails
    pub gas_fallback: Option<U256>,
}

/// One concrete signed submission
#[derive(Debug, Clone, Serialize)]
pub struct TransactionAttempt {
    pub nonce: u64,
    /// 0 for the original, 1..N for replacements
    pub ordinal: u32,
    pub fees: FeeBid,
    pub gas_limit: U256,
    #[serde(skip)]
    pub call_data: Bytes,
    pub tx_hash: H256,
}

/// Report returned for every completed operation
#[derive(Debug, Clone, Serialize)]
pub struct OperationResult {
    pub operation_id: Uuid,
    pub label: String,
    pub status: OperationStatus,
    pub nonce: u64,
    pub last_tx_hash: H256,
    pub attempts: Vec<TransactionAttempt>,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl OperationResult {
    /// Number of fee-bumped replacements that were broadcast
    pub fn replacements(&self) -> usize {
        self.attempts.iter().filter(|a| a.ordinal > 0).count()
    }

    pub fn final_fees(&self) -> Option<FeeBid> {
        self.attempts.last().map(|a| a.fees)
    }
}

/// Per-account broadcast engine
pub struct BroadcastEngine {
    rpc: Arc<dyn ChainRpc>,
    signer: Arc<dyn TxSigner>,
    clock: Arc<dyn Clock>,
    estimator: FeeEstimator,
    config: EngineConfig,
    chain_id: u64,
    explorer_tx_url: Option<String>,
    /// Flips to `true` on shutdown
    shutdown: watch::Receiver<bool>,
}

impl BroadcastEngine {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        signer: Arc<dyn TxSigner>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
        chain_id: u64,
        shutdown: watch::Receiver<bool>,
    ) -> RelayerResult<Self> {
        config.validate()?;
        let estimator =
            FeeEstimator::new(config.fee_history_blocks, config.gas_limit_buffer_percent);

        Ok(Self {
            rpc,
            signer,
            clock,
            estimator,
            config,
            chain_id,
            explorer_tx_url: None,
            shutdown,
        })
    }

    /// Prefix for explorer links in broadcast logs
    pub fn with_explorer(mut self, explorer_tx_url: Option<String>) -> Self {
        self.explorer_tx_url = explorer_tx_url;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Initial bid for this engine's configured priority fee
    pub async fn initial_fees(&self) -> RelayerResult<FeeBid> {
        self.estimator
            .estimate_initial(self.rpc.as_ref(), self.config.priority_fee)
            .await
    }

    /// Drive one operation to a terminal state.
    ///
    /// Exactly one nonce is taken from `sequencer`. It is rolled back when the
    /// operation is abandoned, or when it fails before anything was broadcast.
    pub async fn run_operation(
        &self,
        sequencer: &mut NonceSequencer,
        request: &OperationRequest,
    ) -> RelayerResult<OperationResult> {
        if sequencer.address() != self.signer.address() {
            return Err(RelayerError::Internal(format!(
                "nonce sequencer for {:?} used with signer {:?}",
                sequencer.address(),
                self.signer.address()
            )));
        }

        let operation_id = Uuid::new_v4();
        let span = info_span!("operation", id = %operation_id, label = %request.label);

        let result = self
            .drive(operation_id, sequencer, request)
            .instrument(span)
            .await;

        let outcome = match &result {
            Ok(outcome) => outcome.status.as_str(),
            Err(_) => "error",
        };
        crate::metrics::record_operation(&request.kind, outcome);
        result
    }

    async fn drive(
        &self,
        operation_id: Uuid,
        sequencer: &mut NonceSequencer,
        request: &OperationRequest,
    ) -> RelayerResult<OperationResult> {
        let started_at = Utc::now();
        let label = request.label.as_str();

        if *self.shutdown.borrow() {
            info!("{}: shutdown requested, not starting", label);
            return Err(RelayerError::Cancelled {
                label: request.label.clone(),
                nonce: sequencer.current(),
                last_tx_hash: None,
            });
        }

        // Building
        let nonce = sequencer.take();
        let mut draft = TxDraft {
            chain_id: self.chain_id,
            from: self.signer.address(),
            to: request.to,
            value: request.value,
            data: request.call_data.clone(),
            nonce,
            gas_limit: None,
            fees: request.fee_bid,
        };

        let gas_limit = match self
            .estimator
            .estimate_gas_limit(self.rpc.as_ref(), &draft, request.gas_fallback)
            .await
        {
            Ok(gas) => gas,
            Err(e) => return Err(self.abort(sequencer, request, &[], e)),
        };
        draft.gas_limit = Some(gas_limit);

        info!(
            "{}: nonce={} gas={} maxFeePerGas={} maxPriorityFeePerGas={} maxCost={}",
            label,
            nonce,
            gas_limit,
            draft.fees.max_fee(),
            draft.fees.priority_fee(),
            FeeEstimator::max_cost(gas_limit, &draft.fees)
        );

        let mut attempts: Vec<TransactionAttempt> = Vec::new();
        let mut ordinal: u32 = 0;
        let mut first_broadcast: Option<Duration> = None;
        // Set once the node reports this nonce as already mined
        let mut nonce_used = false;

        loop {
            let signed = match self.signer.sign(&draft).await {
                Ok(signed) => signed,
                Err(e) => return Err(self.abort(sequencer, request, &attempts, e)),
            };

            let broadcast = match self.rpc.submit(&signed).await {
                Ok(hash) => Some(hash),
                Err(RelayerError::AlreadyKnown) => {
                    debug!("{}: node already has {:?}", label, signed.hash());
                    Some(signed.hash())
                }
                Err(RelayerError::Rpc(e)) => {
                    warn!(
                        "{}: submission of {:?} failed in transit ({}), tracking it anyway",
                        label,
                        signed.hash(),
                        e
                    );
                    Some(signed.hash())
                }
                Err(RelayerError::Underpriced(e)) => {
                    warn!(
                        "{}: node rejected attempt {} as underpriced: {}",
                        label, ordinal, e
                    );
                    if ordinal >= self.config.max_replacements {
                        sequencer.rollback();
                        crate::metrics::record_nonce_rollback(&request.kind);
                        error!(
                            "{}: replacement rejected with no rounds left (nonce {})",
                            label, nonce
                        );
                        return Err(RelayerError::ReplacementRejected {
                            label: request.label.clone(),
                            nonce,
                            last_tx_hash: attempts.last().map(|a| a.tx_hash),
                        });
                    }
                    draft.fees = self.bump(request, &draft.fees)?;
                    ordinal += 1;
                    continue;
                }
                Err(RelayerError::NonceTooLow(e)) if !attempts.is_empty() => {
                    info!(
                        "{}: nonce {} already used ({}), an earlier attempt was likely mined",
                        label, nonce, e
                    );
                    nonce_used = true;
                    None
                }
                Err(RelayerError::NonceTooLow(e)) => {
                    error!(
                        "{}: nonce {} already used on chain before any broadcast: {}",
                        label, nonce, e
                    );
                    self.skip_used_nonce(sequencer, nonce).await;
                    return Err(RelayerError::NonceTooLow(e));
                }
                Err(e) => return Err(self.abort(sequencer, request, &attempts, e)),
            };

            if let Some(tx_hash) = broadcast {
                attempts.push(TransactionAttempt {
                    nonce,
                    ordinal,
                    fees: draft.fees,
                    gas_limit,
                    call_data: draft.data.clone(),
                    tx_hash,
                });
                first_broadcast.get_or_insert_with(|| self.clock.now());
                crate::metrics::record_attempt_submitted(&request.kind);
                info!(
                    "  -> {}: sent {:?} (attempt {}/{})",
                    label, tx_hash, ordinal, self.config.max_replacements
                );
                if let Some(url) = &self.explorer_tx_url {
                    info!("     link: {}{:?}", url, tx_hash);
                }
            }

            // Submitted
            if let Some(receipt) = self.await_receipt(request, nonce, &attempts).await? {
                if let Some(first) = first_broadcast {
                    let latency = self.clock.now().saturating_sub(first);
                    crate::metrics::record_confirmation_latency(
                        &request.kind,
                        latency.as_secs_f64(),
                    );
                }
                return Ok(self.confirmed(
                    operation_id,
                    request,
                    nonce,
                    attempts,
                    receipt,
                    started_at,
                ));
            }

            if ordinal >= self.config.max_replacements || nonce_used {
                let last_tx_hash = attempts
                    .last()
                    .map(|a| a.tx_hash)
                    .ok_or_else(|| RelayerError::Internal("abandoned with no broadcast".into()))?;

                if nonce_used {
                    warn!(
                        "{}: nonce {} was consumed but none of our hashes has a receipt \
                         (last tx {:?})",
                        label, nonce, last_tx_hash
                    );
                    self.skip_used_nonce(sequencer, nonce).await;
                } else {
                    sequencer.rollback();
                    crate::metrics::record_nonce_rollback(&request.kind);
                    warn!(
                        "{}: no receipt within {:?} after {} replacements, \
                         abandoning nonce {} (last tx {:?})",
                        label, self.config.wait_budget, ordinal, nonce, last_tx_hash
                    );
                }

                return Ok(OperationResult {
                    operation_id,
                    label: request.label.clone(),
                    status: OperationStatus::Abandoned,
                    nonce,
                    last_tx_hash,
                    attempts,
                    block_number: None,
                    gas_used: None,
                    started_at,
                    finished_at: Utc::now(),
                });
            }

            draft.fees = self.bump(request, &draft.fees)?;
            ordinal += 1;
        }
    }

    /// The node reported `nonce` as mined: move the cursor past it, never back
    async fn skip_used_nonce(&self, sequencer: &mut NonceSequencer, nonce: u64) {
        if let Err(e) = sequencer.resync(self.rpc.as_ref()).await {
            warn!("Nonce resync for {:?} failed: {}", sequencer.address(), e);
        }
        sequencer.advance_past(nonce);
    }

    fn bump(&self, request: &OperationRequest, fees: &FeeBid) -> RelayerResult<FeeBid> {
        let bumped = FeeEstimator::bump(fees, self.config.bump_percent)?;
        crate::metrics::record_fee_bump(&request.kind);
        info!(
            "     {}: RBF bump +{}% -> maxFeePerGas={} maxPriorityFeePerGas={}",
            request.label,
            self.config.bump_percent,
            bumped.max_fee(),
            bumped.priority_fee()
        );
        Ok(bumped)
    }

    /// Fatal failure; gives the nonce back when nothing reached the node
    fn abort(
        &self,
        sequencer: &mut NonceSequencer,
        request: &OperationRequest,
        attempts: &[TransactionAttempt],
        err: RelayerError,
    ) -> RelayerError {
        if attempts.is_empty() {
            sequencer.rollback();
            crate::metrics::record_nonce_rollback(&request.kind);
        }
        error!(
            "{}: operation failed after {} broadcast(s): {}",
            request.label,
            attempts.len(),
            err
        );
        if let Some(last) = attempts.last() {
            error!("{}: last broadcast was {:?}", request.label, last.tx_hash);
        }
        err
    }

    /// Poll receipts for every hash of this operation until one is mined or
    /// the wait budget runs out. RPC errors while polling are ignored.
    async fn await_receipt(
        &self,
        request: &OperationRequest,
        nonce: u64,
        attempts: &[TransactionAttempt],
    ) -> RelayerResult<Option<TxReceipt>> {
        let mut shutdown = self.shutdown.clone();
        let start = self.clock.now();

        while self.clock.now().saturating_sub(start) < self.config.wait_budget {
            for attempt in attempts.iter().rev() {
                match self.rpc.receipt(attempt.tx_hash).await {
                    Ok(Some(receipt)) => return Ok(Some(receipt)),
                    Ok(None) => {}
                    Err(e) => debug!("Receipt poll for {:?} failed: {}", attempt.tx_hash, e),
                }
            }

            if self.pause(&mut shutdown).await {
                warn!(
                    "{}: shutdown while waiting on nonce {}, transaction stays in the mempool",
                    request.label, nonce
                );
                return Err(RelayerError::Cancelled {
                    label: request.label.clone(),
                    nonce,
                    last_tx_hash: attempts.last().map(|a| a.tx_hash),
                });
            }
        }

        Ok(None)
    }

    /// Sleep one poll interval; returns `true` if shutdown was requested
    async fn pause(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        if *shutdown.borrow() {
            return true;
        }

        let sleep = self.clock.sleep(self.config.poll_interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => return true,
                    Ok(()) => continue,
                    Err(_) => {
                        // Sender gone: nobody can cancel any more
                        (&mut sleep).await;
                        return false;
                    }
                },
            }
        }
    }

    fn confirmed(
        &self,
        operation_id: Uuid,
        request: &OperationRequest,
        nonce: u64,
        attempts: Vec<TransactionAttempt>,
        receipt: TxReceipt,
        started_at: DateTime<Utc>,
    ) -> OperationResult {
        let status = match receipt.status {
            ReceiptStatus::Success => {
                info!(
                    "     {}: success {:?} (block={:?}, gasUsed={:?})",
                    request.label, receipt.tx_hash, receipt.block_number, receipt.gas_used
                );
                OperationStatus::ConfirmedSuccess
            }
            ReceiptStatus::Failure => {
                warn!(
                    "     {}: reverted {:?} (block={:?})",
                    request.label, receipt.tx_hash, receipt.block_number
                );
                OperationStatus::ConfirmedFailure
            }
        };

        OperationResult {
            operation_id,
            label: request.label.clone(),
            status,
            nonce,
            last_tx_hash: receipt.tx_hash,
            attempts,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            started_at,
            finished_at: Utc::now(),
        }
    }
}
