//! Fee bids, replacement bumps and gas-limit estimation

use super::draft::TxDraft;
use crate::chain::ChainRpc;
use crate::error::{RelayerError, RelayerResult};

use ethers::types::U256;
use serde::Serialize;
use tracing::{debug, warn};

/// EIP-1559 fee pair offered for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBid {
    priority_fee: U256,
    max_fee: U256,
}

impl FeeBid {
    /// Create a bid; `max_fee` must cover `priority_fee`
    pub fn new(priority_fee: U256, max_fee: U256) -> RelayerResult<Self> {
        if max_fee < priority_fee {
            return Err(RelayerError::InvalidFeeBid(format!(
                "maxFeePerGas {} below maxPriorityFeePerGas {}",
                max_fee, priority_fee
            )));
        }
        Ok(Self {
            priority_fee,
            max_fee,
        })
    }

    pub fn priority_fee(&self) -> U256 {
        self.priority_fee
    }

    pub fn max_fee(&self) -> U256 {
        self.max_fee
    }

    /// Scale both fields by `(100 + percent) / 100`, rounding down.
    ///
    /// A field that rounding would leave unchanged is raised by one wei, so
    /// the result is always strictly above `self` on both fields.
    pub fn bumped(&self, percent: u64) -> RelayerResult<Self> {
        if percent == 0 {
            return Err(RelayerError::InvalidFeeBid(
                "bump percentage must be positive".to_string(),
            ));
        }
        Ok(Self {
            priority_fee: scale_up(self.priority_fee, percent)?,
            max_fee: scale_up(self.max_fee, percent)?,
        })
    }
}

fn scale_up(value: U256, percent: u64) -> RelayerResult<U256> {
    let factor = U256::from(100u64) + U256::from(percent);
    let scaled = value
        .checked_mul(factor)
        .map(|v| v / U256::from(100u64))
        .ok_or_else(|| RelayerError::InvalidFeeBid(format!("fee {} overflows on bump", value)))?;

    if scaled > value {
        Ok(scaled)
    } else {
        value
            .checked_add(U256::one())
            .ok_or_else(|| RelayerError::InvalidFeeBid(format!("fee {} overflows on bump", value)))
    }
}

/// Fee and gas-limit estimator
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    /// Blocks of fee history to request
    fee_history_blocks: u64,
    /// Buffer percentage for gas limit (e.g., 10 = 10% buffer)
    gas_limit_buffer_percent: u64,
}

impl FeeEstimator {
    pub fn new(fee_history_blocks: u64, gas_limit_buffer_percent: u64) -> Self {
        Self {
            fee_history_blocks,
            gas_limit_buffer_percent,
        }
    }

    /// Initial bid: `{priority: hint, max: base_fee + 2 * hint}`
    pub async fn estimate_initial(
        &self,
        rpc: &dyn ChainRpc,
        priority_hint: U256,
    ) -> RelayerResult<FeeBid> {
        let base_fee = self.base_fee(rpc).await?;
        let max_fee = priority_hint
            .checked_mul(U256::from(2u64))
            .and_then(|p| p.checked_add(base_fee))
            .ok_or_else(|| RelayerError::InvalidFeeBid("initial maxFeePerGas overflows".into()))?;

        debug!(
            "Initial fees: baseFee={} maxFeePerGas={} maxPriorityFeePerGas={}",
            base_fee, max_fee, priority_hint
        );
        FeeBid::new(priority_hint, max_fee)
    }

    /// Latest base fee from fee history, falling back to the node's gas price
    async fn base_fee(&self, rpc: &dyn ChainRpc) -> RelayerResult<U256> {
        match rpc.fee_history(self.fee_history_blocks).await {
            Ok(base_fees) => {
                if let Some(base) = base_fees.last() {
                    return Ok(*base);
                }
                warn!("Fee history returned no base fees, falling back to gas price");
            }
            Err(e) => {
                warn!("Fee history unavailable ({}), falling back to gas price", e);
            }
        }

        rpc.gas_price().await
    }

    /// Replacement bid for the next RBF round
    pub fn bump(previous: &FeeBid, bump_percent: u64) -> RelayerResult<FeeBid> {
        previous.bumped(bump_percent)
    }

    /// Gas limit from a node estimate plus buffer, or the caller's fallback
    pub async fn estimate_gas_limit(
        &self,
        rpc: &dyn ChainRpc,
        draft: &TxDraft,
        fallback: Option<U256>,
    ) -> RelayerResult<U256> {
        match rpc.estimate_gas(draft).await {
            Ok(estimate) => {
                let buffer = estimate * U256::from(self.gas_limit_buffer_percent) / 100u64;
                Ok(estimate + buffer)
            }
            Err(e) => match fallback {
                Some(gas) => {
                    warn!("Gas estimation failed ({}), using fallback gas limit {}", e, gas);
                    Ok(gas)
                }
                None => Err(e),
            },
        }
    }

    /// Upper bound on what one attempt can cost in wei
    pub fn max_cost(gas_limit: U256, fees: &FeeBid) -> U256 {
        gas_limit.saturating_mul(fees.max_fee())
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new(3, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockChainRpc;
    use ethers::types::{Address, Bytes};
    use tokio_test::{assert_err, assert_ok};

    fn gwei(n: u64) -> U256 {
        U256::from(n) * U256::exp10(9)
    }

    fn draft() -> TxDraft {
        TxDraft {
            chain_id: 1,
            from: Address::repeat_byte(1),
            to: Address::repeat_byte(2),
            value: U256::zero(),
            data: Bytes::from(vec![0x09, 0x5e, 0xa7, 0xb3]),
            nonce: 0,
            gas_limit: None,
            fees: FeeBid::new(gwei(1), gwei(3)).unwrap(),
        }
    }

    #[test]
    fn test_bid_rejects_max_below_priority() {
        assert_err!(FeeBid::new(gwei(2), gwei(1)));
        assert_ok!(FeeBid::new(gwei(2), gwei(2)));
    }

    #[test]
    fn test_bump_scales_and_rounds_down() {
        let bid = FeeBid::new(U256::from(1_500_000_000u64), U256::from(23_000_000_007u64)).unwrap();
        let bumped = FeeEstimator::bump(&bid, 20).unwrap();
        assert_eq!(bumped.priority_fee(), U256::from(1_800_000_000u64));
        // 23_000_000_007 * 1.2 = 27_600_000_008.4
        assert_eq!(bumped.max_fee(), U256::from(27_600_000_008u64));
    }

    #[test]
    fn test_bump_strictly_increases_tiny_values() {
        let bid = FeeBid::new(U256::from(1u64), U256::from(4u64)).unwrap();
        let bumped = bid.bumped(10).unwrap();
        assert_eq!(bumped.priority_fee(), U256::from(2u64));
        assert_eq!(bumped.max_fee(), U256::from(5u64));

        let zero = FeeBid::new(U256::zero(), U256::zero()).unwrap();
        let bumped = zero.bumped(50).unwrap();
        assert!(bumped.priority_fee() > U256::zero());
        assert!(bumped.max_fee() >= bumped.priority_fee());
    }

    #[test]
    fn test_bump_strictly_increases_across_rounds() {
        let mut bid = FeeBid::new(gwei(1), gwei(30)).unwrap();
        for percent in [1u64, 10, 12, 20, 100] {
            let next = bid.bumped(percent).unwrap();
            assert!(next.priority_fee() > bid.priority_fee());
            assert!(next.max_fee() > bid.max_fee());
            assert!(next.max_fee() >= next.priority_fee());
            bid = next;
        }
    }

    #[test]
    fn test_bump_requires_positive_percent() {
        let bid = FeeBid::new(gwei(1), gwei(3)).unwrap();
        assert_err!(bid.bumped(0));
    }

    #[test]
    fn test_bump_overflow_is_an_error() {
        let bid = FeeBid::new(U256::MAX, U256::MAX).unwrap();
        assert_err!(bid.bumped(20));
    }

    #[tokio::test]
    async fn test_initial_bid_uses_latest_base_fee() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_fee_history()
            .withf(|blocks| *blocks == 3)
            .returning(|_| Ok(vec![gwei(18), gwei(19), gwei(20)]));
        rpc.expect_gas_price().never();

        let estimator = FeeEstimator::default();
        let bid = estimator.estimate_initial(&rpc, gwei(2)).await.unwrap();
        assert_eq!(bid.priority_fee(), gwei(2));
        assert_eq!(bid.max_fee(), gwei(24));
    }

    #[tokio::test]
    async fn test_initial_bid_is_idempotent() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_fee_history()
            .times(2)
            .returning(|_| Ok(vec![gwei(30)]));

        let estimator = FeeEstimator::default();
        let first = estimator.estimate_initial(&rpc, gwei(1)).await.unwrap();
        let second = estimator.estimate_initial(&rpc, gwei(1)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fee_history_failure_falls_back_to_gas_price() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_fee_history()
            .returning(|_| Err(RelayerError::Rpc("method not found".into())));
        rpc.expect_gas_price().times(1).returning(|| Ok(gwei(12)));

        let bid = FeeEstimator::default()
            .estimate_initial(&rpc, gwei(3))
            .await
            .unwrap();
        assert_eq!(bid.max_fee(), gwei(18));
        assert!(bid.max_fee() >= bid.priority_fee());
    }

    #[tokio::test]
    async fn test_empty_fee_history_falls_back_to_gas_price() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_fee_history().returning(|_| Ok(Vec::new()));
        rpc.expect_gas_price().times(1).returning(|| Ok(gwei(7)));

        let bid = FeeEstimator::default()
            .estimate_initial(&rpc, U256::zero())
            .await
            .unwrap();
        assert_eq!(bid.max_fee(), gwei(7));
    }

    #[tokio::test]
    async fn test_initial_bid_fails_when_no_fee_source() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_fee_history()
            .returning(|_| Err(RelayerError::Rpc("down".into())));
        rpc.expect_gas_price()
            .returning(|| Err(RelayerError::Rpc("down".into())));

        let result = FeeEstimator::default().estimate_initial(&rpc, gwei(1)).await;
        assert!(matches!(result, Err(RelayerError::Rpc(_))));
    }

    #[tokio::test]
    async fn test_gas_limit_adds_buffer() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_estimate_gas()
            .returning(|_| Ok(U256::from(46_000u64)));

        let gas = FeeEstimator::default()
            .estimate_gas_limit(&rpc, &draft(), None)
            .await
            .unwrap();
        assert_eq!(gas, U256::from(50_600u64));
    }

    #[tokio::test]
    async fn test_gas_limit_uses_fallback_on_estimation_failure() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_estimate_gas()
            .returning(|_| Err(RelayerError::GasEstimation("execution reverted".into())));

        let estimator = FeeEstimator::default();
        let gas = estimator
            .estimate_gas_limit(&rpc, &draft(), Some(U256::from(120_000u64)))
            .await
            .unwrap();
        assert_eq!(gas, U256::from(120_000u64));

        let result = estimator.estimate_gas_limit(&rpc, &draft(), None).await;
        assert!(matches!(result, Err(RelayerError::GasEstimation(_))));
    }

    #[test]
    fn test_max_cost() {
        let fees = FeeBid::new(gwei(1), gwei(20)).unwrap();
        assert_eq!(
            FeeEstimator::max_cost(U256::from(21_000u64), &fees),
            U256::from(420_000_000_000_000u64)
        );
    }
}
