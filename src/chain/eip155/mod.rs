//! [`ChainClient`] over an alloy provider.
//!
//! Each configured network gets one provider: HTTP transports behind a rate limiter and a
//! fallback layer, the usual gas/nonce/chain-id fillers, and a wallet holding the facilitator
//! key. Settlement transactions are signed by that single key.

pub mod pending_nonce_manager;

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, B256, Bytes, TxHash, U256};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{Identity, Provider, ProviderBuilder, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{BlockId, BlockNumberOrTag, TransactionRequest};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{SolCall, sol};
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::future::IntoFuture;
use std::num::NonZeroUsize;
use tower::ServiceBuilder;
use tracing::Instrument;
use tracing_core::Level;

use crate::chain::{ChainClient, ChainError, ObservedReceipt};
use crate::config::{ChainConfig, EvmPrivateKey};
use crate::scheme::{
    CrossChainAuthorization, ExactAuthorization, Payer0Authorization, PermitAuthorization,
};
use crate::timestamp::UnixTimestamp;
pub use pending_nonce_manager::*;

sol! {
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IAuthorizedToken {
        function balanceOf(address account) external view returns (uint256);
        function nonces(address owner) external view returns (uint256);
        function markups(address facilitator) external view returns (uint256);
        function markups(address facilitator, uint32 dstEid) external view returns (uint256);
        function transferWithAuthorization(address from, address to, uint256 value, uint256 validAfter, uint256 validBefore, bytes32 nonce, uint8 v, bytes32 r, bytes32 s) external;
        function permit(address owner, address spender, uint256 value, uint256 deadline, uint8 v, bytes32 r, bytes32 s) external;
        function transferFrom(address from, address to, uint256 value) external returns (bool);
    }
}

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    struct SendParam {
        uint32 dstEid;
        bytes32 to;
        uint256 amountLD;
        uint256 minAmountLD;
        bytes extraOptions;
        bytes composeMsg;
        bytes oftCmd;
    }

    #[allow(missing_docs)]
    #[derive(Debug)]
    struct MessagingFee {
        uint256 nativeFee;
        uint256 lzTokenFee;
    }

    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface ICrossChainOft {
        function quoteSend(SendParam calldata sendParam, bool payInLzToken) external view returns (MessagingFee memory fee);
        function sendWithCCAuthorization(SendParam calldata sendParam, MessagingFee calldata fee, address from, uint256 validAfter, uint256 validBefore, bytes32 nonce, bytes calldata signature, address refundAddress) external payable;
        function sendWithAuthorization(SendParam calldata sendParam, MessagingFee calldata fee, address from, uint256 validAfter, uint256 validBefore, bytes32 nonce, bytes calldata signature, address refundAddress) external payable;
        function peers(uint32 eid) external view returns (bytes32);
    }
}

/// LayerZero type-3 executor options with no entries.
pub const DEFAULT_EXTRA_OPTIONS: [u8; 2] = [0x00, 0x03];

/// `transferFrom` follows an unmined `permit`, so its gas can not be estimated.
pub const TRANSFER_FROM_GAS_LIMIT: u64 = 100_000;

pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// Fillers for gas, nonce and chain id, a wallet for signing, and the fallback RPC client.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// OFT send parameters for a cross-chain authorization.
pub fn send_param(authorization: &CrossChainAuthorization) -> SendParam {
    SendParam {
        dstEid: authorization.destination_chain,
        to: authorization.to.into_word(),
        amountLD: authorization.amount,
        minAmountLD: authorization.minimal_amount,
        extraOptions: Bytes::from_static(&DEFAULT_EXTRA_OPTIONS),
        composeMsg: Bytes::new(),
        oftCmd: Bytes::new(),
    }
}

/// OFT send parameters bridging a payer0 authorization to `pay_to`.
pub fn payer0_send_param(
    authorization: &Payer0Authorization,
    pay_to: Address,
    min_amount: U256,
) -> SendParam {
    SendParam {
        dstEid: authorization.destination_chain,
        to: pay_to.into_word(),
        amountLD: authorization.transfer.value,
        minAmountLD: min_amount,
        extraOptions: Bytes::from_static(&DEFAULT_EXTRA_OPTIONS),
        composeMsg: Bytes::new(),
        oftCmd: Bytes::new(),
    }
}

/// `r || s || v`, as taken by the OFT authorization entry points.
fn packed_signature(signature: &crate::signature::RawSignature) -> Bytes {
    let (v, r, s) = signature.to_vrs();
    let mut packed = Vec::with_capacity(65);
    packed.extend_from_slice(r.as_slice());
    packed.extend_from_slice(s.as_slice());
    packed.push(v);
    packed.into()
}

/// A transaction sent from the facilitator account.
pub struct MetaTransaction {
    pub to: Address,
    pub calldata: Bytes,
    /// Native value attached to the call.
    pub value: U256,
    /// Estimated against the pending block when absent.
    pub gas_limit: Option<u64>,
}

#[derive(Debug)]
pub struct Eip155ChainClient {
    network: String,
    chain_id: u64,
    eip1559: bool,
    inner: InnerProvider,
    facilitator: Address,
    nonce_manager: PendingNonceManager,
}

impl Eip155ChainClient {
    pub async fn from_config(
        config: &ChainConfig,
        signer: &EvmPrivateKey,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        // 1. Signer
        let signer =
            PrivateKeySigner::from_bytes(&signer.as_b256())?.with_chain_id(Some(config.chain_id));
        let facilitator = signer.address();
        let wallet = EthereumWallet::from(signer);

        // 2. Transports
        let transports = config
            .rpc()
            .iter()
            .filter_map(|provider_config| {
                let scheme = provider_config.http.scheme();
                let is_http = scheme == "http" || scheme == "https";
                if !is_http {
                    return None;
                }
                let rpc_url = provider_config.http.inner().clone();
                tracing::info!(network=%config.network, rpc_url=%rpc_url, rate_limit=?provider_config.rate_limit, "Using HTTP transport");
                let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
                let service = ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(rpc_url));
                Some(service)
            })
            .collect::<Vec<_>>();
        let transport_count = NonZeroUsize::new(transports.len())
            .ok_or_else(|| format!("No HTTP RPC endpoint for network {}", config.network))?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(transport_count))
            .service(transports);
        let client = RpcClient::new(fallback, false);

        // 3. Provider
        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(network=%config.network, chain_id=config.chain_id, facilitator=%facilitator, "Initialized EVM chain client");

        Ok(Self {
            network: config.network.clone(),
            chain_id: config.chain_id,
            eip1559: config.eip1559(),
            inner,
            facilitator,
            nonce_manager,
        })
    }

    /// Signs and broadcasts `tx`, returning its hash without waiting for it to be mined.
    ///
    /// Legacy networks get an explicit gas price. A failed broadcast resets the cached
    /// account nonce, since the node may or may not have seen the transaction.
    async fn send_transaction(&self, tx: MetaTransaction) -> Result<TxHash, ChainError> {
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(self.facilitator)
            .with_input(tx.calldata)
            .with_value(tx.value);

        if !self.eip1559 {
            let gas: u128 = self
                .inner
                .get_gas_price()
                .instrument(tracing::info_span!("get_gas_price"))
                .await?;
            txr.set_gas_price(gas);
        }

        let gas_limit = match tx.gas_limit {
            Some(gas_limit) => gas_limit,
            None => {
                self.inner
                    .estimate_gas(txr.clone())
                    .block(BlockId::pending())
                    .await?
            }
        };
        txr.set_gas_limit(gas_limit);

        match self.inner.send_transaction(txr).await {
            Ok(pending) => Ok(*pending.tx_hash()),
            Err(e) => {
                self.nonce_manager.reset_nonce(self.facilitator).await;
                Err(ChainError::Transport(e))
            }
        }
    }
}

#[async_trait]
impl ChainClient for Eip155ChainClient {
    fn network(&self) -> &str {
        &self.network
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn facilitator_address(&self) -> Address {
        self.facilitator
    }

    async fn balance_of(&self, asset: Address, owner: Address) -> Result<U256, ChainError> {
        let token = IAuthorizedToken::new(asset, &self.inner);
        token
            .balanceOf(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "fetch_token_balance",
                token_contract = %asset,
                owner = %owner,
                otel.kind = "client"
            ))
            .await
            .map_err(ChainError::contract_call("balanceOf"))
    }

    async fn markup(
        &self,
        asset: Address,
        facilitator: Address,
        dst_eid: Option<u32>,
    ) -> Result<U256, ChainError> {
        let token = IAuthorizedToken::new(asset, &self.inner);
        let span = tracing::info_span!(
            "fetch_markup",
            token_contract = %asset,
            facilitator = %facilitator,
            dst_eid = ?dst_eid,
            otel.kind = "client"
        );
        let markup = match dst_eid {
            None => token.markups_0(facilitator).call().into_future().instrument(span).await,
            Some(dst_eid) => {
                token
                    .markups_1(facilitator, dst_eid)
                    .call()
                    .into_future()
                    .instrument(span)
                    .await
            }
        };
        markup.map_err(ChainError::contract_call("markups"))
    }

    async fn permit_nonce(&self, asset: Address, owner: Address) -> Result<U256, ChainError> {
        let token = IAuthorizedToken::new(asset, &self.inner);
        token
            .nonces(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "fetch_permit_nonce",
                token_contract = %asset,
                owner = %owner,
                otel.kind = "client"
            ))
            .await
            .map_err(ChainError::contract_call("nonces"))
    }

    async fn has_peer(&self, asset: Address, dst_eid: u32) -> Result<bool, ChainError> {
        let oft = ICrossChainOft::new(asset, &self.inner);
        let peer = oft
            .peers(dst_eid)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "fetch_peer",
                token_contract = %asset,
                dst_eid,
                otel.kind = "client"
            ))
            .await
            .map_err(ChainError::contract_call("peers"))?;
        Ok(!peer.is_zero())
    }

    async fn submit_transfer_with_authorization(
        &self,
        asset: Address,
        authorization: &ExactAuthorization,
    ) -> Result<TxHash, ChainError> {
        let (v, r, s) = authorization.signature.to_vrs();
        let call = IAuthorizedToken::transferWithAuthorizationCall {
            from: authorization.from,
            to: authorization.to,
            value: authorization.value,
            validAfter: authorization.valid_after,
            validBefore: authorization.valid_before,
            nonce: authorization.nonce,
            v,
            r,
            s,
        };
        let tx_hash = self
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: call.abi_encode().into(),
                value: U256::ZERO,
                gas_limit: None,
            })
            .instrument(tracing::info_span!("call_transferWithAuthorization",
                from = %authorization.from,
                to = %authorization.to,
                value = %authorization.value,
                valid_after = %authorization.valid_after,
                valid_before = %authorization.valid_before,
                nonce = %authorization.nonce,
                token_contract = %asset,
                otel.kind = "client",
            ))
            .await?;
        tracing::event!(Level::INFO, status = "submitted", tx = %tx_hash, "transferWithAuthorization sent");
        Ok(tx_hash)
    }

    async fn submit_permit_then_transfer(
        &self,
        asset: Address,
        authorization: &PermitAuthorization,
        pay_to: Address,
    ) -> Result<TxHash, ChainError> {
        let (v, r, s) = authorization.signature.to_vrs();
        let permit = IAuthorizedToken::permitCall {
            owner: authorization.owner,
            spender: authorization.spender,
            value: authorization.value,
            deadline: authorization.deadline,
            v,
            r,
            s,
        };
        let permit_hash = self
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: permit.abi_encode().into(),
                value: U256::ZERO,
                gas_limit: None,
            })
            .instrument(tracing::info_span!("call_permit",
                owner = %authorization.owner,
                spender = %authorization.spender,
                value = %authorization.value,
                deadline = %authorization.deadline,
                token_contract = %asset,
                otel.kind = "client",
            ))
            .await?;
        tracing::event!(Level::INFO, status = "submitted", tx = %permit_hash, "permit sent");

        let transfer = IAuthorizedToken::transferFromCall {
            from: authorization.owner,
            to: pay_to,
            value: authorization.value,
        };
        let transfer_hash = self
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: transfer.abi_encode().into(),
                value: U256::ZERO,
                gas_limit: Some(TRANSFER_FROM_GAS_LIMIT),
            })
            .instrument(tracing::info_span!("call_transferFrom",
                from = %authorization.owner,
                to = %pay_to,
                value = %authorization.value,
                token_contract = %asset,
                otel.kind = "client",
            ))
            .await?;
        tracing::event!(Level::INFO, status = "submitted", tx = %transfer_hash, permit_tx = %permit_hash, "transferFrom sent");
        Ok(transfer_hash)
    }

    async fn submit_cross_chain_send(
        &self,
        asset: Address,
        authorization: &CrossChainAuthorization,
    ) -> Result<TxHash, ChainError> {
        let oft = ICrossChainOft::new(asset, &self.inner);
        let send_param = send_param(authorization);
        let fee = oft
            .quoteSend(send_param.clone(), false)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "quote_send",
                token_contract = %asset,
                dst_eid = send_param.dstEid,
                otel.kind = "client"
            ))
            .await
            .map_err(ChainError::contract_call("quoteSend"))?;

        let native_fee = fee.nativeFee;
        let call = ICrossChainOft::sendWithCCAuthorizationCall {
            sendParam: send_param,
            fee,
            from: authorization.from,
            validAfter: authorization.valid_after,
            validBefore: authorization.valid_before,
            nonce: authorization.nonce,
            signature: packed_signature(&authorization.signature),
            refundAddress: self.facilitator,
        };
        let tx_hash = self
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: call.abi_encode().into(),
                value: native_fee,
                gas_limit: None,
            })
            .instrument(tracing::info_span!("call_sendWithCCAuthorization",
                from = %authorization.from,
                to = %authorization.to,
                amount = %authorization.amount,
                minimal_amount = %authorization.minimal_amount,
                dst_eid = authorization.destination_chain,
                native_fee = %native_fee,
                token_contract = %asset,
                otel.kind = "client",
            ))
            .await?;
        tracing::event!(Level::INFO, status = "submitted", tx = %tx_hash, "sendWithCCAuthorization sent");
        Ok(tx_hash)
    }

    async fn submit_payer0_send(
        &self,
        asset: Address,
        authorization: &Payer0Authorization,
        pay_to: Address,
        min_amount: U256,
    ) -> Result<TxHash, ChainError> {
        let oft = ICrossChainOft::new(asset, &self.inner);
        let send_param = payer0_send_param(authorization, pay_to, min_amount);
        let fee = oft
            .quoteSend(send_param.clone(), false)
            .call()
            .into_future()
            .instrument(tracing::info_span!(
                "quote_send",
                token_contract = %asset,
                dst_eid = send_param.dstEid,
                otel.kind = "client"
            ))
            .await
            .map_err(ChainError::contract_call("quoteSend"))?;

        let transfer = &authorization.transfer;
        let native_fee = fee.nativeFee;
        let call = ICrossChainOft::sendWithAuthorizationCall {
            sendParam: send_param,
            fee,
            from: transfer.from,
            validAfter: transfer.valid_after,
            validBefore: transfer.valid_before,
            nonce: transfer.nonce,
            signature: packed_signature(&transfer.signature),
            refundAddress: self.facilitator,
        };
        let tx_hash = self
            .send_transaction(MetaTransaction {
                to: asset,
                calldata: call.abi_encode().into(),
                value: native_fee,
                gas_limit: None,
            })
            .instrument(tracing::info_span!("call_sendWithAuthorization",
                from = %transfer.from,
                to = %pay_to,
                amount = %transfer.value,
                min_amount = %min_amount,
                dst_eid = authorization.destination_chain,
                native_fee = %native_fee,
                token_contract = %asset,
                otel.kind = "client",
            ))
            .await?;
        tracing::event!(Level::INFO, status = "submitted", tx = %tx_hash, "sendWithAuthorization sent");
        Ok(tx_hash)
    }

    async fn transaction_receipt(
        &self,
        tx: TxHash,
    ) -> Result<Option<ObservedReceipt>, ChainError> {
        let receipt = self
            .inner
            .get_transaction_receipt(tx)
            .instrument(tracing::info_span!("get_transaction_receipt", tx = %tx, otel.kind = "client"))
            .await?;
        let Some(receipt) = receipt else {
            return Ok(None);
        };
        let body =
            serde_json::to_value(&receipt).map_err(|e| ChainError::Response(e.to_string()))?;
        Ok(Some(ObservedReceipt {
            block_number: receipt.block_number,
            body,
        }))
    }

    async fn block_timestamp(
        &self,
        block_number: u64,
    ) -> Result<Option<UnixTimestamp>, ChainError> {
        let block = self
            .inner
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .into_future()
            .instrument(tracing::info_span!("get_block_by_number", block_number, otel.kind = "client"))
            .await?;
        Ok(block.map(|block| UnixTimestamp::from_secs(block.header.timestamp)))
    }
}
