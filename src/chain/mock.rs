//! In-memory [`ChainClient`] for tests.

use alloy_primitives::{Address, B256, TxHash, U256};
use alloy_transport::TransportErrorKind;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chain::{ChainClient, ChainError, ObservedReceipt};
use crate::scheme::{
    CrossChainAuthorization, ExactAuthorization, Payer0Authorization, PermitAuthorization,
};
use crate::timestamp::UnixTimestamp;

fn upstream(message: &str) -> ChainError {
    ChainError::Transport(TransportErrorKind::custom_str(message))
}

/// A submitted call, as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    TransferWithAuthorization { asset: Address, from: Address, to: Address, value: U256 },
    PermitThenTransfer { asset: Address, owner: Address, pay_to: Address, value: U256 },
    CrossChainSend { asset: Address, from: Address, dst_eid: u32, amount: U256 },
    Payer0Send {
        asset: Address,
        from: Address,
        pay_to: Address,
        dst_eid: u32,
        amount: U256,
        min_amount: U256,
    },
}

pub struct MockChainClient {
    pub network: String,
    pub chain_id: u64,
    pub facilitator: Address,
    /// `None` makes `balance_of` fail.
    pub balance: Option<U256>,
    /// `None` makes `markup` fail.
    pub markup: Option<U256>,
    pub permit_nonce: U256,
    /// `None` makes `has_peer` fail.
    pub has_peer: Option<bool>,
    pub fail_submissions: bool,
    pub fail_receipts: bool,
    pub submissions: Mutex<Vec<Submission>>,
    pub receipts: Mutex<HashMap<TxHash, ObservedReceipt>>,
    pub block_timestamps: Mutex<HashMap<u64, UnixTimestamp>>,
    pub receipt_queries: AtomicU64,
    next_tx: AtomicU64,
}

impl MockChainClient {
    pub fn new(network: &str, chain_id: u64, facilitator: Address) -> Self {
        Self {
            network: network.to_string(),
            chain_id,
            facilitator,
            balance: Some(U256::MAX),
            markup: Some(U256::ZERO),
            permit_nonce: U256::ZERO,
            has_peer: Some(true),
            fail_submissions: false,
            fail_receipts: false,
            submissions: Mutex::new(Vec::new()),
            receipts: Mutex::new(HashMap::new()),
            block_timestamps: Mutex::new(HashMap::new()),
            receipt_queries: AtomicU64::new(0),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn mine(&self, tx: TxHash, block_number: u64, block_time: Option<UnixTimestamp>) {
        let receipt = ObservedReceipt {
            block_number: Some(block_number),
            body: serde_json::json!({
                "transactionHash": tx.to_string(),
                "blockNumber": format!("{block_number:#x}"),
                "status": "0x1",
            }),
        };
        self.receipts.lock().unwrap().insert(tx, receipt);
        if let Some(block_time) = block_time {
            self.block_timestamps
                .lock()
                .unwrap()
                .insert(block_number, block_time);
        }
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().unwrap().clone()
    }

    fn record(&self, submission: Submission) -> Result<TxHash, ChainError> {
        if self.fail_submissions {
            return Err(upstream("nonce too low"));
        }
        self.submissions.lock().unwrap().push(submission);
        let n = self.next_tx.fetch_add(1, Ordering::SeqCst);
        Ok(B256::left_padding_from(&n.to_be_bytes()))
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn network(&self) -> &str {
        &self.network
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn facilitator_address(&self) -> Address {
        self.facilitator
    }

    async fn balance_of(&self, _asset: Address, _owner: Address) -> Result<U256, ChainError> {
        self.balance.ok_or_else(|| upstream("balanceOf unavailable"))
    }

    async fn markup(
        &self,
        _asset: Address,
        _facilitator: Address,
        _dst_eid: Option<u32>,
    ) -> Result<U256, ChainError> {
        self.markup.ok_or_else(|| upstream("markups reverted"))
    }

    async fn permit_nonce(&self, _asset: Address, _owner: Address) -> Result<U256, ChainError> {
        Ok(self.permit_nonce)
    }

    async fn has_peer(&self, _asset: Address, _dst_eid: u32) -> Result<bool, ChainError> {
        self.has_peer.ok_or_else(|| upstream("peers reverted"))
    }

    async fn submit_transfer_with_authorization(
        &self,
        asset: Address,
        authorization: &ExactAuthorization,
    ) -> Result<TxHash, ChainError> {
        self.record(Submission::TransferWithAuthorization {
            asset,
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
        })
    }

    async fn submit_permit_then_transfer(
        &self,
        asset: Address,
        authorization: &PermitAuthorization,
        pay_to: Address,
    ) -> Result<TxHash, ChainError> {
        self.record(Submission::PermitThenTransfer {
            asset,
            owner: authorization.owner,
            pay_to,
            value: authorization.value,
        })
    }

    async fn submit_cross_chain_send(
        &self,
        asset: Address,
        authorization: &CrossChainAuthorization,
    ) -> Result<TxHash, ChainError> {
        self.record(Submission::CrossChainSend {
            asset,
            from: authorization.from,
            dst_eid: authorization.destination_chain,
            amount: authorization.amount,
        })
    }

    async fn submit_payer0_send(
        &self,
        asset: Address,
        authorization: &Payer0Authorization,
        pay_to: Address,
        min_amount: U256,
    ) -> Result<TxHash, ChainError> {
        self.record(Submission::Payer0Send {
            asset,
            from: authorization.transfer.from,
            pay_to,
            dst_eid: authorization.destination_chain,
            amount: authorization.transfer.value,
            min_amount,
        })
    }

    async fn transaction_receipt(
        &self,
        tx: TxHash,
    ) -> Result<Option<ObservedReceipt>, ChainError> {
        self.receipt_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_receipts {
            return Err(upstream("receipt lookup timed out"));
        }
        Ok(self.receipts.lock().unwrap().get(&tx).cloned())
    }

    async fn block_timestamp(
        &self,
        block_number: u64,
    ) -> Result<Option<UnixTimestamp>, ChainError> {
        Ok(self
            .block_timestamps
            .lock()
            .unwrap()
            .get(&block_number)
            .copied())
    }
}
