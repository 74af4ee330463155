//! Unsigned transaction drafts

use super::gas::FeeBid;

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, U256};

/// Everything needed to sign one attempt
#[derive(Debug, Clone, PartialEq)]
pub struct TxDraft {
    pub chain_id: u64,
    pub from: Address,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
    pub nonce: u64,
    /// Unset until gas estimation has run
    pub gas_limit: Option<U256>,
    pub fees: FeeBid,
}

impl TxDraft {
    /// Build the EIP-1559 request understood by ethers providers and signers
    pub fn to_typed(&self) -> TypedTransaction {
        let mut tx = Eip1559TransactionRequest::new()
            .from(self.from)
            .to(self.to)
            .value(self.value)
            .data(self.data.clone())
            .nonce(self.nonce)
            .chain_id(self.chain_id)
            .max_fee_per_gas(self.fees.max_fee())
            .max_priority_fee_per_gas(self.fees.priority_fee());

        if let Some(gas) = self.gas_limit {
            tx = tx.gas(gas);
        }

        TypedTransaction::Eip1559(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_transaction_carries_draft_fields() {
        let draft = TxDraft {
            chain_id: 1,
            from: Address::repeat_byte(0x11),
            to: Address::repeat_byte(0x22),
            value: U256::zero(),
            data: Bytes::from(vec![1, 2, 3]),
            nonce: 9,
            gas_limit: Some(U256::from(120_000u64)),
            fees: FeeBid::new(U256::from(2u64), U256::from(5u64)).unwrap(),
        };

        let typed = draft.to_typed();
        assert_eq!(typed.nonce(), Some(&U256::from(9u64)));
        assert_eq!(typed.gas(), Some(&U256::from(120_000u64)));
        assert_eq!(typed.from(), Some(&Address::repeat_byte(0x11)));
        assert_eq!(typed.data(), Some(&Bytes::from(vec![1, 2, 3])));
        match typed {
            TypedTransaction::Eip1559(tx) => {
                assert_eq!(tx.max_fee_per_gas, Some(U256::from(5u64)));
                assert_eq!(tx.max_priority_fee_per_gas, Some(U256::from(2u64)));
            }
            other => panic!("expected EIP-1559 transaction, got {:?}", other),
        }
    }

    #[test]
    fn test_gas_limit_left_unset_before_estimation() {
        let draft = TxDraft {
            chain_id: 1,
            from: Address::zero(),
            to: Address::zero(),
            value: U256::zero(),
            data: Bytes::new(),
            nonce: 0,
            gas_limit: None,
            fees: FeeBid::new(U256::one(), U256::one()).unwrap(),
        };
        assert_eq!(draft.to_typed().gas(), None);
    }
}
