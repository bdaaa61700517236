//! Facilitator backed by local configuration and direct chain access.
//!
//! A request is resolved to its configured scheme and network, the payload is decoded for the
//! scheme kind, bound to the requirements, and its signature recovered. Verification then
//! checks the payer's balance on chain. That check is advisory: the token contract has the
//! final word when the transaction executes.
//!
//! Settlement repeats the off-chain checks, submits the kind-specific call, and hands the
//! transaction hash to the [`ReceiptStore`] so the settlement tracker can follow it. Bridged
//! sends are guarded by the facilitator markup on both paths; the destination peer of a payer0
//! send is only looked up while verifying.

use alloy_primitives::{Address, TxHash, U256};
use std::sync::Arc;
use tracing::{Instrument, instrument};
use tracing_core::Level;

use crate::chain::{ChainClient, ChainError, ChainRegistry};
use crate::digest::{FormatError, parse_address};
use crate::facilitator::Facilitator;
use crate::proto::{
    self, ErrorReason, PaymentEnvelope, PaymentVerificationError, SettleResponse, VerifyResponse,
};
use crate::scheme::{
    Authorization, BindContext, SchemeConfig, SchemeKind, SchemeRegistry, same_address,
};
use crate::timestamp::UnixTimestamp;
use crate::tracker::ReceiptStore;

/// Why a request could not be served. Carries the payer when it was known at failure time.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorLocalError {
    #[error("{source}")]
    Verification {
        payer: Option<String>,
        #[source]
        source: PaymentVerificationError,
    },
    #[error("Upstream failure: {source}")]
    Upstream {
        payer: Option<String>,
        #[source]
        source: ChainError,
    },
}

impl FacilitatorLocalError {
    fn verification(payer: Option<&Address>, source: impl Into<PaymentVerificationError>) -> Self {
        FacilitatorLocalError::Verification {
            payer: payer.map(Address::to_string),
            source: source.into(),
        }
    }

    fn upstream(payer: Option<&Address>, source: ChainError) -> Self {
        FacilitatorLocalError::Upstream {
            payer: payer.map(Address::to_string),
            source,
        }
    }

    pub fn reason(&self) -> ErrorReason {
        match self {
            FacilitatorLocalError::Verification { source, .. } => source.reason(),
            FacilitatorLocalError::Upstream { .. } => ErrorReason::UpstreamError,
        }
    }

    pub fn payer(&self) -> Option<String> {
        match self {
            FacilitatorLocalError::Verification { payer, .. } => payer.clone(),
            FacilitatorLocalError::Upstream { payer, .. } => payer.clone(),
        }
    }
}

/// A verified payment, ready to be submitted.
struct ValidPayment<'a> {
    authorization: Authorization,
    scheme: &'a SchemeConfig,
    chain: Arc<dyn ChainClient>,
    payer: Address,
}

#[derive(Debug, Clone)]
pub struct FacilitatorLocal {
    schemes: SchemeRegistry,
    chains: ChainRegistry,
    receipts: ReceiptStore,
}

impl FacilitatorLocal {
    pub fn new(schemes: SchemeRegistry, chains: ChainRegistry, receipts: ReceiptStore) -> Self {
        FacilitatorLocal {
            schemes,
            chains,
            receipts,
        }
    }

    pub fn receipts(&self) -> &ReceiptStore {
        &self.receipts
    }

    /// Resolves the configured scheme and chain named by both halves of the envelope.
    fn resolve(
        &self,
        envelope: &PaymentEnvelope,
    ) -> Result<(&SchemeConfig, Arc<dyn ChainClient>), PaymentVerificationError> {
        let payload = &envelope.payment_payload;
        let requirements = &envelope.payment_requirements;
        if payload.scheme != requirements.scheme {
            return Err(PaymentVerificationError::SchemeMismatch {
                payload: payload.scheme.clone(),
                requirements: requirements.scheme.clone(),
            });
        }
        if payload.network != requirements.network {
            return Err(PaymentVerificationError::NetworkMismatch {
                payload: payload.network.clone(),
                requirements: requirements.network.clone(),
            });
        }
        let unsupported = || PaymentVerificationError::UnsupportedNetworkOrScheme {
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
        };
        let scheme = self
            .schemes
            .get(&requirements.scheme, &requirements.network)
            .ok_or_else(unsupported)?;
        let chain = self
            .chains
            .by_network(&requirements.network)
            .ok_or_else(unsupported)?;
        if !same_address(&requirements.asset, &scheme.asset.to_string()) {
            return Err(PaymentVerificationError::AssetMismatch {
                payload: requirements.asset.clone(),
                expected: scheme.asset,
            });
        }
        Ok((scheme, chain))
    }

    /// Checks that need no chain state: resolution, payload shape, binding to the
    /// requirements, and the signer.
    #[instrument(skip_all, err, fields(
        scheme = %envelope.payment_requirements.scheme,
        network = %envelope.payment_requirements.network,
    ))]
    async fn assert_valid_payment<'a>(
        &'a self,
        envelope: &PaymentEnvelope,
    ) -> Result<ValidPayment<'a>, FacilitatorLocalError> {
        let (scheme, chain) = self
            .resolve(envelope)
            .map_err(|e| FacilitatorLocalError::verification(None, e))?;

        let authorization = Authorization::decode(scheme.kind, &envelope.payment_payload.payload)
            .map_err(|e| FacilitatorLocalError::verification(None, e))?;
        let claimed = authorization.payer();

        let ctx = BindContext {
            requirements: &envelope.payment_requirements,
            scheme,
            chain_id: chain.chain_id(),
            facilitator: chain.facilitator_address(),
            now: UnixTimestamp::now(),
        };
        let payer = authorization
            .bind(&ctx)
            .and_then(|domain| authorization.recover_payer(&domain))
            .map_err(|e| FacilitatorLocalError::verification(Some(&claimed), e))?;

        Ok(ValidPayment {
            authorization,
            scheme,
            chain,
            payer,
        })
    }

    /// Markup owed on a bridged payment. Cross-chain sends must leave at least
    /// `minimalAmount` after it; payer0 sends must leave something.
    async fn assert_markup(payment: &ValidPayment<'_>) -> Result<U256, FacilitatorLocalError> {
        let chain = payment.chain.as_ref();
        let asset = payment.scheme.asset;
        let payer = Some(&payment.payer);
        match &payment.authorization {
            Authorization::CrossChain(cross_chain) => {
                let markup = fetch_markup(chain, asset, Some(cross_chain.destination_chain)).await;
                cross_chain
                    .check_slippage(markup)
                    .map_err(|e| FacilitatorLocalError::verification(payer, e))?;
                Ok(markup)
            }
            Authorization::Payer0(payer0) => {
                let markup = fetch_markup(chain, asset, None).await;
                payer0
                    .min_amount(markup)
                    .map_err(|e| FacilitatorLocalError::verification(payer, e))?;
                Ok(markup)
            }
            Authorization::Exact(_) | Authorization::Permit(_) => Ok(U256::ZERO),
        }
    }

    /// A payer0 destination must have a registered OFT peer.
    async fn assert_peer(payment: &ValidPayment<'_>) -> Result<(), FacilitatorLocalError> {
        let Authorization::Payer0(payer0) = &payment.authorization else {
            return Ok(());
        };
        let dst_eid = payer0.destination_chain;
        let has_peer = payment
            .chain
            .has_peer(payment.scheme.asset, dst_eid)
            .await
            .map_err(|e| FacilitatorLocalError::upstream(Some(&payment.payer), e))?;
        if !has_peer {
            return Err(FacilitatorLocalError::verification(
                Some(&payment.payer),
                PaymentVerificationError::NoPeer { dst_eid },
            ));
        }
        Ok(())
    }

    async fn submit(
        &self,
        envelope: &PaymentEnvelope,
        payment: &ValidPayment<'_>,
        markup: U256,
    ) -> Result<TxHash, FacilitatorLocalError> {
        let asset = payment.scheme.asset;
        let payer = Some(&payment.payer);
        let chain = payment.chain.as_ref();
        let submitted = match &payment.authorization {
            Authorization::Exact(exact) => {
                chain.submit_transfer_with_authorization(asset, exact).await
            }
            Authorization::Permit(permit) => {
                let pay_to = parse_address("payTo", &envelope.payment_requirements.pay_to)
                    .map_err(|e| FacilitatorLocalError::verification(payer, e))?;
                chain.submit_permit_then_transfer(asset, permit, pay_to).await
            }
            Authorization::CrossChain(cross_chain) => {
                chain.submit_cross_chain_send(asset, cross_chain).await
            }
            Authorization::Payer0(payer0) => {
                let pay_to = parse_address("payTo", &envelope.payment_requirements.pay_to)
                    .map_err(|e| FacilitatorLocalError::verification(payer, e))?;
                let min_amount = payer0
                    .min_amount(markup)
                    .map_err(|e| FacilitatorLocalError::verification(payer, e))?;
                chain.submit_payer0_send(asset, payer0, pay_to, min_amount).await
            }
        };
        submitted.map_err(|e| FacilitatorLocalError::upstream(payer, e))
    }
}

/// Balance lookups that fail are upstream errors; a short balance rejects the payment.
async fn assert_enough_balance(
    chain: &dyn ChainClient,
    asset: Address,
    payer: Address,
    required: U256,
) -> Result<(), FacilitatorLocalError> {
    let balance = chain
        .balance_of(asset, payer)
        .await
        .map_err(|e| FacilitatorLocalError::upstream(Some(&payer), e))?;
    if balance < required {
        return Err(FacilitatorLocalError::verification(
            Some(&payer),
            PaymentVerificationError::InsufficientBalance { balance, required },
        ));
    }
    Ok(())
}

/// Markup the facilitator charges on `asset`. A failed lookup counts as no markup.
async fn fetch_markup(chain: &dyn ChainClient, asset: Address, dst_eid: Option<u32>) -> U256 {
    match chain
        .markup(asset, chain.facilitator_address(), dst_eid)
        .await
    {
        Ok(markup) => markup,
        Err(error) => {
            tracing::warn!(asset = %asset, dst_eid = ?dst_eid, error = %error, "Markup lookup failed, assuming zero");
            U256::ZERO
        }
    }
}

impl Facilitator for FacilitatorLocal {
    type Error = FacilitatorLocalError;

    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn verify(&self, request: &proto::VerifyRequest) -> Result<VerifyResponse, Self::Error> {
        let payment = self.assert_valid_payment(request).await?;
        assert_enough_balance(
            payment.chain.as_ref(),
            payment.scheme.asset,
            payment.payer,
            payment.authorization.amount(),
        )
        .await?;
        Self::assert_markup(&payment).await?;
        Self::assert_peer(&payment).await?;
        Ok(VerifyResponse::valid(payment.payer.to_string()))
    }

    /// Settlement skips the balance pre-check; the token contract rejects an underfunded
    /// transfer on its own.
    #[instrument(skip_all, err, fields(network = %request.payment_payload.network))]
    async fn settle(&self, request: &proto::SettleRequest) -> Result<SettleResponse, Self::Error> {
        let payment = self.assert_valid_payment(request).await?;
        let markup = Self::assert_markup(&payment).await?;
        let network = &request.payment_requirements.network;
        let tx_hash = self
            .submit(request, &payment, markup)
            .instrument(tracing::info_span!("submit_settlement", kind = %payment.scheme.kind, payer = %payment.payer))
            .await?;
        self.receipts.submit(tx_hash, network);
        tracing::event!(Level::INFO,
            status = "ok",
            tx = %tx_hash,
            kind = %payment.scheme.kind,
            "Settlement submitted"
        );
        Ok(SettleResponse::Success {
            payer: payment.payer.to_string(),
            transaction: tx_hash.to_string(),
            network: network.clone(),
        })
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, Self::Error> {
        let kinds = self
            .schemes
            .supported()
            .into_iter()
            .filter(|kind| self.chains.by_network(&kind.network).is_some())
            .collect();
        Ok(proto::SupportedResponse { kinds })
    }

    fn receipt(&self, tx: TxHash, network: &str) -> proto::ReceiptResponse {
        self.receipts
            .response(tx, network, std::time::SystemTime::now())
    }

    #[instrument(skip_all, err, fields(network = %query.network, asset = %query.asset))]
    async fn permit_nonce(
        &self,
        query: &proto::PermitNonceQuery,
    ) -> Result<proto::PermitNonceResponse, Self::Error> {
        let chain = self.chains.by_network(&query.network).ok_or_else(|| {
            FacilitatorLocalError::verification(
                None,
                PaymentVerificationError::UnsupportedNetworkOrScheme {
                    scheme: SchemeKind::Permit.to_string(),
                    network: query.network.clone(),
                },
            )
        })?;
        let parse = |field: &'static str, value: &str| -> Result<Address, FacilitatorLocalError> {
            parse_address(field, value)
                .map_err(|e: FormatError| FacilitatorLocalError::verification(None, e))
        };
        let asset = parse("asset", &query.asset)?;
        let owner = parse("owner", &query.owner)?;
        let nonce = chain
            .permit_nonce(asset, owner)
            .await
            .map_err(|e| FacilitatorLocalError::upstream(Some(&owner), e))?;
        Ok(proto::PermitNonceResponse {
            network: query.network.clone(),
            asset: query.asset.clone(),
            owner: query.owner.clone(),
            nonce,
        })
    }

    /// Unlike verification, a failed lookup here is reported rather than read as zero.
    #[instrument(skip_all, err, fields(network = %query.network, scheme = %query.scheme))]
    async fn markup(
        &self,
        query: &proto::MarkupQuery,
    ) -> Result<proto::MarkupResponse, Self::Error> {
        let unsupported = || {
            FacilitatorLocalError::verification(
                None,
                PaymentVerificationError::UnsupportedNetworkOrScheme {
                    scheme: query.scheme.clone(),
                    network: query.network.clone(),
                },
            )
        };
        let scheme = self
            .schemes
            .get(&query.scheme, &query.network)
            .ok_or_else(unsupported)?;
        let chain = self.chains.by_network(&query.network).ok_or_else(unsupported)?;
        let markup = chain
            .markup(scheme.asset, chain.facilitator_address(), query.dst_eid)
            .await
            .map_err(|e| FacilitatorLocalError::upstream(None, e))?;
        Ok(proto::MarkupResponse {
            network: query.network.clone(),
            scheme: query.scheme.clone(),
            markup,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::mock::{MockChainClient, Submission};
    use crate::client::{PayerClient, envelope};
    use crate::scheme::tests::{FACILITATOR, PAY_TO, USDC, requirements, scheme};
    use alloy_signer_local::PrivateKeySigner;
    use serde_json::json;

    pub const NETWORK: &str = "base-sepolia";

    pub fn schemes() -> SchemeRegistry {
        SchemeRegistry::build(&[
            scheme(SchemeKind::Exact, "exact", json!({"name": "USDC", "version": "2"})),
            scheme(SchemeKind::Permit, "permit_USDC", json!({"name": "USDC", "version": "2"})),
            scheme(
                SchemeKind::CrossChain,
                "PZ_toArbitrum",
                json!({"name": "EURSM", "version": "1", "dstEid": "40231"}),
            ),
            scheme(
                SchemeKind::Payer0,
                "payer0_toArbitrum",
                json!({"name": "EURS", "version": "1", "dstEid": "40231"}),
            ),
        ])
    }

    pub fn facilitator(mock: MockChainClient) -> (FacilitatorLocal, Arc<MockChainClient>) {
        let mock = Arc::new(mock);
        let chains = ChainRegistry::from_clients([mock.clone() as Arc<dyn ChainClient>]);
        let facilitator = FacilitatorLocal::new(schemes(), chains, ReceiptStore::new());
        (facilitator, mock)
    }

    pub fn mock() -> MockChainClient {
        MockChainClient::new(NETWORK, 84532, FACILITATOR)
    }

    pub async fn exact_envelope(payer: &PayerClient<PrivateKeySigner>, amount: &str) -> PaymentEnvelope {
        let requirements = requirements("exact", amount, json!({"name": "USDC", "version": "2"}));
        let payload = payer.sign_exact(&requirements, 84532).await.unwrap();
        envelope(requirements, &payload).unwrap()
    }

    async fn cross_chain_envelope(payer: &PayerClient<PrivateKeySigner>, minimal: u64) -> PaymentEnvelope {
        let extra = json!({"name": "EURSM", "version": "1", "dstEid": "40231"});
        let requirements = requirements("PZ_toArbitrum", "1000", extra);
        let payload = payer
            .sign_cross_chain(&requirements, 84532, U256::from(minimal))
            .await
            .unwrap();
        envelope(requirements, &payload).unwrap()
    }

    async fn payer0_envelope(payer: &PayerClient<PrivateKeySigner>) -> PaymentEnvelope {
        let extra = json!({"name": "EURS", "version": "1", "dstEid": "40231"});
        let requirements = requirements("payer0_toArbitrum", "1000", extra);
        let payload = payer.sign_payer0(&requirements, 84532).await.unwrap();
        envelope(requirements, &payload).unwrap()
    }

    async fn permit_envelope(payer: &PayerClient<PrivateKeySigner>) -> PaymentEnvelope {
        let extra = json!({"name": "USDC", "version": "2", "facilitator": FACILITATOR.to_string()});
        let requirements = requirements("permit_USDC", "2200", extra);
        let payload = payer
            .sign_permit(&requirements, 84532, FACILITATOR, U256::from(4u64))
            .await
            .unwrap();
        envelope(requirements, &payload).unwrap()
    }

    fn reason(result: Result<impl std::fmt::Debug, FacilitatorLocalError>) -> ErrorReason {
        result.unwrap_err().reason()
    }

    #[tokio::test]
    async fn verifies_an_exact_payment() {
        let (facilitator, _) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        let response = facilitator.verify(&envelope).await.unwrap();
        assert_eq!(response, VerifyResponse::valid(payer.address().to_string()));
    }

    #[tokio::test]
    async fn amount_must_match_exactly() {
        let (facilitator, _) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let mut envelope = exact_envelope(&payer, "999").await;
        envelope.payment_requirements.max_amount_required = "1000".into();
        let error = facilitator.verify(&envelope).await.unwrap_err();
        assert_eq!(error.reason(), ErrorReason::AmountMismatch);
        assert_eq!(error.payer(), Some(payer.address().to_string()));
    }

    #[tokio::test]
    async fn unknown_scheme_or_network_is_unsupported() {
        let (facilitator, _) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let mut envelope = exact_envelope(&payer, "1000").await;
        envelope.payment_payload.scheme = "upto".into();
        envelope.payment_requirements.scheme = "upto".into();
        assert_eq!(
            reason(facilitator.verify(&envelope).await),
            ErrorReason::UnsupportedNetworkOrScheme
        );

        let mut envelope = exact_envelope(&payer, "1000").await;
        envelope.payment_payload.network = "base".into();
        assert_eq!(reason(facilitator.verify(&envelope).await), ErrorReason::NetworkMismatch);
    }

    #[tokio::test]
    async fn requirements_asset_must_be_configured_asset() {
        let (facilitator, _) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let mut envelope = exact_envelope(&payer, "1000").await;
        envelope.payment_requirements.asset = "0x0190C8a558ad75d7929bE7d06b07D4cdCdAC18c4".into();
        assert_eq!(reason(facilitator.verify(&envelope).await), ErrorReason::AssetMismatch);

        let mut envelope = exact_envelope(&payer, "1000").await;
        envelope.payment_requirements.asset = USDC.to_string().to_lowercase();
        assert!(facilitator.verify(&envelope).await.is_ok());
    }

    #[tokio::test]
    async fn insufficient_balance_is_rejected() {
        let mut mock = mock();
        mock.balance = Some(U256::from(999u64));
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        assert_eq!(reason(facilitator.verify(&envelope).await), ErrorReason::InsufficientBalance);
    }

    #[tokio::test]
    async fn balance_lookup_failure_is_upstream() {
        let mut mock = mock();
        mock.balance = None;
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        let error = facilitator.verify(&envelope).await.unwrap_err();
        assert_eq!(error.reason(), ErrorReason::UpstreamError);
        assert!(matches!(error, FacilitatorLocalError::Upstream { .. }));
    }

    #[tokio::test]
    async fn cross_chain_slippage_against_markup() {
        let mut mock = mock();
        mock.markup = Some(U256::from(50u64));
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());

        let strict = cross_chain_envelope(&payer, 960).await;
        assert_eq!(
            reason(facilitator.verify(&strict).await),
            ErrorReason::SlippageNotGuaranteed
        );
        let loose = cross_chain_envelope(&payer, 900).await;
        assert!(facilitator.verify(&loose).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn markup_failure_counts_as_zero() {
        let mut mock = mock();
        mock.markup = None;
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = cross_chain_envelope(&payer, 1000).await;
        assert!(facilitator.verify(&envelope).await.unwrap().is_valid());
    }

    #[tokio::test]
    async fn settle_submits_and_tracks() {
        let (facilitator, mock) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        let response = facilitator.settle(&envelope).await.unwrap();
        let SettleResponse::Success { transaction, network, payer: settled_by } = response else {
            panic!("settlement failed");
        };
        assert_eq!(network, NETWORK);
        assert_eq!(settled_by, payer.address().to_string());
        assert_eq!(
            mock.submissions(),
            vec![Submission::TransferWithAuthorization {
                asset: USDC,
                from: payer.address(),
                to: PAY_TO.parse().unwrap(),
                value: U256::from(1000u64),
            }]
        );
        let tx: TxHash = transaction.parse().unwrap();
        assert!(facilitator.receipts().get(tx, NETWORK).is_some());
        assert!(matches!(
            facilitator.receipt(tx, NETWORK),
            proto::ReceiptResponse::Pending { .. }
        ));
    }

    #[tokio::test]
    async fn settle_permit_pulls_funds_to_pay_to() {
        let (facilitator, mock) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = permit_envelope(&payer).await;
        assert!(matches!(
            facilitator.settle(&envelope).await.unwrap(),
            SettleResponse::Success { .. }
        ));
        assert_eq!(
            mock.submissions(),
            vec![Submission::PermitThenTransfer {
                asset: USDC,
                owner: payer.address(),
                pay_to: PAY_TO.parse().unwrap(),
                value: U256::from(2200u64),
            }]
        );
    }

    #[tokio::test]
    async fn settle_cross_chain_sends_to_destination() {
        let (facilitator, mock) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = cross_chain_envelope(&payer, 900).await;
        facilitator.settle(&envelope).await.unwrap();
        assert_eq!(
            mock.submissions(),
            vec![Submission::CrossChainSend {
                asset: USDC,
                from: payer.address(),
                dst_eid: 40231,
                amount: U256::from(1000u64),
            }]
        );
    }

    #[tokio::test]
    async fn verifies_a_payer0_payment_with_a_peer() {
        let (facilitator, _) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = payer0_envelope(&payer).await;
        let response = facilitator.verify(&envelope).await.unwrap();
        assert_eq!(response, VerifyResponse::valid(payer.address().to_string()));
    }

    #[tokio::test]
    async fn payer0_without_peer_is_rejected() {
        let mut mock = mock();
        mock.has_peer = Some(false);
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = payer0_envelope(&payer).await;
        assert_eq!(
            reason(facilitator.verify(&envelope).await),
            ErrorReason::NoPeerAtDestination
        );
    }

    #[tokio::test]
    async fn payer0_peer_lookup_failure_is_upstream() {
        let mut mock = mock();
        mock.has_peer = None;
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = payer0_envelope(&payer).await;
        assert_eq!(reason(facilitator.verify(&envelope).await), ErrorReason::UpstreamError);
    }

    #[tokio::test]
    async fn payer0_markup_above_amount_is_rejected() {
        let mut mock = mock();
        mock.markup = Some(U256::from(1001u64));
        let (facilitator, mock) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = payer0_envelope(&payer).await;
        assert_eq!(
            reason(facilitator.verify(&envelope).await),
            ErrorReason::SlippageNotGuaranteed
        );
        assert_eq!(
            reason(facilitator.settle(&envelope).await),
            ErrorReason::SlippageNotGuaranteed
        );
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn settle_payer0_bridges_to_pay_to_net_of_markup() {
        let mut mock = mock();
        mock.markup = Some(U256::from(42u64));
        mock.has_peer = None;
        let (facilitator, mock) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = payer0_envelope(&payer).await;
        facilitator.settle(&envelope).await.unwrap();
        assert_eq!(
            mock.submissions(),
            vec![Submission::Payer0Send {
                asset: USDC,
                from: payer.address(),
                pay_to: PAY_TO.parse().unwrap(),
                dst_eid: 40231,
                amount: U256::from(1000u64),
                min_amount: U256::from(958u64),
            }]
        );
        assert_eq!(facilitator.receipts().len(), 1);
    }

    #[tokio::test]
    async fn settle_does_not_need_the_balance() {
        let mut mock = mock();
        mock.balance = None;
        let (facilitator, mock) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        assert_eq!(reason(facilitator.verify(&envelope).await), ErrorReason::UpstreamError);
        assert!(matches!(
            facilitator.settle(&envelope).await.unwrap(),
            SettleResponse::Success { .. }
        ));
        assert_eq!(mock.submissions().len(), 1);
    }

    #[tokio::test]
    async fn settle_still_guards_cross_chain_slippage() {
        let mut mock = mock();
        mock.markup = Some(U256::from(50u64));
        let (facilitator, mock) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = cross_chain_envelope(&payer, 960).await;
        assert_eq!(
            reason(facilitator.settle(&envelope).await),
            ErrorReason::SlippageNotGuaranteed
        );
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn failed_submission_is_upstream_and_untracked() {
        let mut mock = mock();
        mock.fail_submissions = true;
        let (facilitator, _) = facilitator(mock);
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        let error = facilitator.settle(&envelope).await.unwrap_err();
        assert_eq!(error.reason(), ErrorReason::UpstreamError);
        assert_eq!(error.payer(), Some(payer.address().to_string()));
        assert!(facilitator.receipts().is_empty());
    }

    #[tokio::test]
    async fn verify_never_registers_a_receipt() {
        let (facilitator, mock) = facilitator(mock());
        let payer = PayerClient::new(PrivateKeySigner::random());
        let envelope = exact_envelope(&payer, "1000").await;
        facilitator.verify(&envelope).await.unwrap();
        assert!(facilitator.receipts().is_empty());
        assert!(mock.submissions().is_empty());
    }

    #[tokio::test]
    async fn supported_lists_configured_schemes_with_a_chain() {
        let (facilitator, _) = facilitator(mock());
        let supported = facilitator.supported().await.unwrap();
        let names: Vec<&str> = supported.kinds.iter().map(|k| k.scheme.as_str()).collect();
        assert_eq!(
            names,
            vec!["PZ_toArbitrum", "exact", "payer0_toArbitrum", "permit_USDC"]
        );
    }

    #[tokio::test]
    async fn markup_query() {
        let mut mock = mock();
        mock.markup = Some(U256::from(50u64));
        let (facilitator, _) = facilitator(mock);
        let query = proto::MarkupQuery {
            network: NETWORK.into(),
            scheme: "PZ_toArbitrum".into(),
            dst_eid: Some(40231),
        };
        assert_eq!(facilitator.markup(&query).await.unwrap().markup, U256::from(50u64));

        let unknown = proto::MarkupQuery {
            network: NETWORK.into(),
            scheme: "PZ_toMars".into(),
            dst_eid: None,
        };
        assert_eq!(
            reason(facilitator.markup(&unknown).await),
            ErrorReason::UnsupportedNetworkOrScheme
        );
    }

    #[tokio::test]
    async fn permit_nonce_query() {
        let mut mock = mock();
        mock.permit_nonce = U256::from(12u64);
        let (facilitator, _) = facilitator(mock);
        let query = proto::PermitNonceQuery {
            network: NETWORK.into(),
            asset: USDC.to_string(),
            owner: PAY_TO.into(),
        };
        let response = facilitator.permit_nonce(&query).await.unwrap();
        assert_eq!(response.nonce, U256::from(12u64));
        assert_eq!(response.owner, PAY_TO);

        let malformed = proto::PermitNonceQuery {
            owner: "0x12".into(),
            ..query
        };
        assert_eq!(
            reason(facilitator.permit_nonce(&malformed).await),
            ErrorReason::InvalidFormat
        );
    }
}
