//! Chain collaborators of the facilitator.
//!
//! Everything the validator and the settlement tracker need from a blockchain goes through
//! [`ChainClient`], one instance per configured network. The production implementation is
//! [`eip155::Eip155ChainClient`]; tests swap in in-memory doubles.

pub mod eip155;
#[cfg(test)]
pub(crate) mod mock;

use alloy_primitives::{Address, TxHash, U256};
use alloy_transport::TransportError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use crate::config::{ChainsConfig, EvmPrivateKey};
use crate::scheme::{
    CrossChainAuthorization, ExactAuthorization, Payer0Authorization, PermitAuthorization,
};
use crate::timestamp::UnixTimestamp;

/// Failure talking to a chain. Reported as `upstream_error` on the wire.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Contract call {method} failed: {source}")]
    ContractCall {
        method: &'static str,
        #[source]
        source: alloy_contract::Error,
    },
    #[error("Malformed RPC response: {0}")]
    Response(String),
}

impl ChainError {
    pub fn contract_call(method: &'static str) -> impl FnOnce(alloy_contract::Error) -> Self {
        move |source| ChainError::ContractCall { method, source }
    }
}

/// A mined transaction receipt, as returned by `eth_getTransactionReceipt`.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedReceipt {
    pub block_number: Option<u64>,
    /// The receipt exactly as the node returned it.
    pub body: serde_json::Value,
}

/// Everything the facilitator asks of one chain.
///
/// Submissions return as soon as the node accepts the transaction; confirmation is followed
/// by the settlement tracker through [`ChainClient::transaction_receipt`].
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn network(&self) -> &str;

    fn chain_id(&self) -> u64;

    /// Address that pays gas, receives permits and owns markups.
    fn facilitator_address(&self) -> Address;

    async fn balance_of(&self, asset: Address, owner: Address) -> Result<U256, ChainError>;

    /// Markup charged by `facilitator` on `asset`, optionally per destination endpoint.
    async fn markup(
        &self,
        asset: Address,
        facilitator: Address,
        dst_eid: Option<u32>,
    ) -> Result<U256, ChainError>;

    /// Current EIP-2612 nonce of `owner` on `asset`.
    async fn permit_nonce(&self, asset: Address, owner: Address) -> Result<U256, ChainError>;

    /// Whether the OFT `asset` has a non-zero peer on endpoint `dst_eid`.
    async fn has_peer(&self, asset: Address, dst_eid: u32) -> Result<bool, ChainError>;

    async fn submit_transfer_with_authorization(
        &self,
        asset: Address,
        authorization: &ExactAuthorization,
    ) -> Result<TxHash, ChainError>;

    /// Sends `permit`, then `transferFrom(owner, pay_to, value)`. Returns the transfer's hash.
    async fn submit_permit_then_transfer(
        &self,
        asset: Address,
        authorization: &PermitAuthorization,
        pay_to: Address,
    ) -> Result<TxHash, ChainError>;

    async fn submit_cross_chain_send(
        &self,
        asset: Address,
        authorization: &CrossChainAuthorization,
    ) -> Result<TxHash, ChainError>;

    /// Bridges an ERC-3009 authorization to `pay_to` on the destination endpoint through
    /// `sendWithAuthorization`, accepting no less than `min_amount` on arrival.
    async fn submit_payer0_send(
        &self,
        asset: Address,
        authorization: &Payer0Authorization,
        pay_to: Address,
        min_amount: U256,
    ) -> Result<TxHash, ChainError>;

    /// `None` while the transaction is not mined.
    async fn transaction_receipt(
        &self,
        tx: TxHash,
    ) -> Result<Option<ObservedReceipt>, ChainError>;

    async fn block_timestamp(&self, block_number: u64)
    -> Result<Option<UnixTimestamp>, ChainError>;
}

/// Chain clients keyed by x402 network name.
#[derive(Default, Clone)]
pub struct ChainRegistry(HashMap<String, Arc<dyn ChainClient>>);

impl Debug for ChainRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let networks: Vec<&String> = self.0.keys().collect();
        f.debug_tuple("ChainRegistry").field(&networks).finish()
    }
}

impl ChainRegistry {
    pub async fn from_config(
        chains: &ChainsConfig,
        signer: &EvmPrivateKey,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let mut clients: HashMap<String, Arc<dyn ChainClient>> = HashMap::new();
        for chain in chains.iter() {
            let client = eip155::Eip155ChainClient::from_config(chain, signer).await?;
            clients.insert(chain.network.clone(), Arc::new(client));
        }
        Ok(Self(clients))
    }

    pub fn from_clients<I>(clients: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ChainClient>>,
    {
        let clients = clients
            .into_iter()
            .map(|client| (client.network().to_string(), client))
            .collect();
        Self(clients)
    }

    pub fn by_network(&self, network: &str) -> Option<Arc<dyn ChainClient>> {
        self.0.get(network).cloned()
    }
}
