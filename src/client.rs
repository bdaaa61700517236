//! Payer-side signing.
//!
//! Builds the `payload` of a payment envelope for each scheme kind from the resource server's
//! [`PaymentRequirements`]. Integrators use it to pay; tests use it to produce realistic
//! envelopes.
//!
//! ```ignore
//! use alloy_signer_local::PrivateKeySigner;
//! use sx402::client::PayerClient;
//!
//! let client = PayerClient::new(PrivateKeySigner::random());
//! let payload = client.sign_exact(&requirements, 84532).await?;
//! let envelope = sx402::client::envelope(requirements, &payload)?;
//! ```

use alloy_primitives::{Address, B256, FixedBytes, Signature, U256};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use rand::{Rng, rng};
use serde::Serialize;
use serde_json::value::RawValue;
use std::sync::Arc;

use crate::digest::{
    CrossChainTransferWithAuthorization, Domain, FormatError, Message, Permit,
    TransferWithAuthorization, parse_address, parse_uint,
};
use crate::proto::{PaymentEnvelope, PaymentPayload, PaymentRequirements, X402Version1};
use crate::scheme::cross_chain::{CrossChainPayload, CrossChainPayloadAuthorization};
use crate::scheme::exact::{ExactPayload, ExactPayloadAuthorization};
use crate::scheme::payer0::Payer0Payload;
use crate::scheme::permit::{PermitPayload, PermitPayloadMessage};
use crate::scheme::{DomainWire, WireUint};
use crate::timestamp::UnixTimestamp;

/// How far back `validAfter` is set, to tolerate clock skew between payer and facilitator.
const VALID_AFTER_SKEW_SECS: u64 = 10 * 60;

#[derive(Debug, thiserror::Error)]
pub enum PayerError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Requirements miss extra.{0}")]
    MissingExtra(&'static str),
    #[error("Signing failed: {0}")]
    Signing(#[from] alloy_signer::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A fresh random 32-byte authorization nonce.
pub fn random_nonce() -> B256 {
    let nonce: [u8; 32] = rng().random();
    FixedBytes(nonce)
}

/// Signs payment authorizations for one payer account.
#[derive(Debug, Clone)]
pub struct PayerClient<S> {
    signer: S,
}

impl<S> PayerClient<S>
where
    S: SignerLike + Sync,
{
    pub fn new(signer: S) -> Self {
        Self { signer }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    async fn sign(&self, message: Message, domain: &Domain) -> Result<String, PayerError> {
        let digest = message.signing_digest(domain);
        let signature = self.signer.sign_hash(&digest).await?;
        Ok(format!("0x{}", hex::encode(signature.as_bytes())))
    }

    /// ERC-3009 authorization of exactly `maxAmountRequired` to `payTo`, valid from ten
    /// minutes ago until `maxTimeoutSeconds` from now.
    pub async fn sign_exact(
        &self,
        requirements: &PaymentRequirements,
        chain_id: u64,
    ) -> Result<ExactPayload, PayerError> {
        let domain = requirements_domain(requirements, chain_id)?;
        let (valid_after, valid_before) = validity_window(requirements);
        let message = TransferWithAuthorization {
            from: self.address(),
            to: parse_address("payTo", &requirements.pay_to)?,
            value: parse_uint("maxAmountRequired", &requirements.max_amount_required)?,
            validAfter: valid_after,
            validBefore: valid_before,
            nonce: random_nonce(),
        };
        let authorization = ExactPayloadAuthorization {
            from: message.from.to_string(),
            to: message.to.to_string(),
            value: message.value.into(),
            valid_after: message.validAfter.into(),
            valid_before: message.validBefore.into(),
            nonce: format!("0x{}", hex::encode(message.nonce)),
        };
        let signature = self.sign(Message::Transfer(message), &domain).await?;
        Ok(ExactPayload {
            signature,
            authorization,
        })
    }

    /// EIP-2612 permit granting `maxAmountRequired` to `spender`. `nonce` is the owner's
    /// current permit nonce, as served by `GET /permitnonce`.
    pub async fn sign_permit(
        &self,
        requirements: &PaymentRequirements,
        chain_id: u64,
        spender: Address,
        nonce: U256,
    ) -> Result<PermitPayload, PayerError> {
        let domain = requirements_domain(requirements, chain_id)?;
        let (_, deadline) = validity_window(requirements);
        let message = Permit {
            owner: self.address(),
            spender,
            value: parse_uint("maxAmountRequired", &requirements.max_amount_required)?,
            nonce,
            deadline,
        };
        let wire_message = PermitPayloadMessage {
            owner: message.owner.to_string(),
            spender: message.spender.to_string(),
            value: message.value.into(),
            deadline: message.deadline.into(),
        };
        let wire_nonce = message.nonce.into();
        let signature = self.sign(Message::Permit(message), &domain).await?;
        Ok(PermitPayload {
            domain: DomainWire::from(&domain),
            message: wire_message,
            nonce: wire_nonce,
            signature,
        })
    }

    /// The `exact` authorization of [`Self::sign_exact`], to be bridged to the endpoint
    /// named by `extra.dstEid`.
    pub async fn sign_payer0(
        &self,
        requirements: &PaymentRequirements,
        chain_id: u64,
    ) -> Result<Payer0Payload, PayerError> {
        let dst_eid = requirements_dst_eid(requirements)?;
        let exact = self.sign_exact(requirements, chain_id).await?;
        Ok(Payer0Payload {
            signature: exact.signature,
            authorization: exact.authorization,
            dest_eid: WireUint::Number(u64::from(dst_eid)),
        })
    }

    /// Cross-chain send of `maxAmountRequired` to `payTo` on the endpoint named by
    /// `extra.dstEid`, accepting no less than `minimal_amount` on arrival.
    pub async fn sign_cross_chain(
        &self,
        requirements: &PaymentRequirements,
        chain_id: u64,
        minimal_amount: U256,
    ) -> Result<CrossChainPayload, PayerError> {
        let domain = requirements_domain(requirements, chain_id)?;
        let dst_eid = requirements_dst_eid(requirements)?;
        let (valid_after, valid_before) = validity_window(requirements);
        let message = CrossChainTransferWithAuthorization {
            from: self.address(),
            to: parse_address("payTo", &requirements.pay_to)?,
            amount: parse_uint("maxAmountRequired", &requirements.max_amount_required)?,
            minimalAmount: minimal_amount,
            destinationChain: U256::from(dst_eid),
            validAfter: valid_after,
            validBefore: valid_before,
            nonce: random_nonce(),
        };
        let authorization = CrossChainPayloadAuthorization {
            from: message.from.to_string(),
            to: message.to.to_string(),
            amount: message.amount.into(),
            minimal_amount: message.minimalAmount.into(),
            destination_chain: WireUint::Number(u64::from(dst_eid)),
            valid_after: message.validAfter.into(),
            valid_before: message.validBefore.into(),
            nonce: format!("0x{}", hex::encode(message.nonce)),
        };
        let signature = self.sign(Message::CrossChain(message), &domain).await?;
        Ok(CrossChainPayload {
            domain: DomainWire::from(&domain),
            authorization,
            signature,
        })
    }
}

/// Wraps a signed payload into the envelope sent to `/verify` and `/settle`.
pub fn envelope<T: Serialize>(
    requirements: PaymentRequirements,
    payload: &T,
) -> Result<PaymentEnvelope, PayerError> {
    let payload = RawValue::from_string(serde_json::to_string(payload)?)?;
    Ok(PaymentEnvelope {
        x402_version: X402Version1,
        payment_payload: PaymentPayload {
            x402_version: X402Version1,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload,
        },
        payment_requirements: requirements,
    })
}

fn requirements_domain(
    requirements: &PaymentRequirements,
    chain_id: u64,
) -> Result<Domain, PayerError> {
    let name = requirements
        .extra_str("name")
        .ok_or(PayerError::MissingExtra("name"))?;
    let version = requirements
        .extra_str("version")
        .ok_or(PayerError::MissingExtra("version"))?;
    let asset = parse_address("asset", &requirements.asset)?;
    Ok(Domain::new(name, version, chain_id, asset))
}

fn requirements_dst_eid(requirements: &PaymentRequirements) -> Result<u32, PayerError> {
    let value = requirements
        .extra
        .as_ref()
        .and_then(|extra| extra.get("dstEid"))
        .ok_or(PayerError::MissingExtra("dstEid"))?;
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        PayerError::Format(FormatError::Overflow {
            field: "extra.dstEid",
            value: value.to_string(),
        })
    })
}

fn validity_window(requirements: &PaymentRequirements) -> (U256, U256) {
    let now = UnixTimestamp::now();
    let valid_after = now.as_secs().saturating_sub(VALID_AFTER_SKEW_SECS);
    let valid_before = now + requirements.max_timeout_seconds;
    (U256::from(valid_after), U256::from(valid_before.as_secs()))
}

/// Signing abstraction so both owned and `Arc`-shared signers can pay.
#[async_trait]
pub trait SignerLike {
    fn address(&self) -> Address;

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error>;
}

#[async_trait]
impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        PrivateKeySigner::address(self)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

#[async_trait]
impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &B256) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::tests::{FACILITATOR, USDC, requirements};
    use crate::scheme::{Authorization, SchemeKind};
    use serde_json::json;

    #[test]
    fn nonces_are_random() {
        assert_ne!(random_nonce(), random_nonce());
    }

    #[tokio::test]
    async fn exact_payload_recovers_to_payer() {
        let client = PayerClient::new(PrivateKeySigner::random());
        let requirements = requirements("exact", "1000", json!({"name": "USDC", "version": "2"}));
        let payload = client.sign_exact(&requirements, 84532).await.unwrap();
        let envelope = envelope(requirements, &payload).unwrap();

        let authorization =
            Authorization::decode(SchemeKind::Exact, &envelope.payment_payload.payload).unwrap();
        let domain = Domain::new("USDC", "2", 84532, USDC);
        assert_eq!(authorization.recover_payer(&domain).unwrap(), client.address());
        assert_eq!(authorization.amount(), U256::from(1000u64));
        assert_eq!(envelope.payment_payload.scheme, "exact");
        assert_eq!(envelope.payment_payload.network, "base-sepolia");
    }

    #[tokio::test]
    async fn permit_payload_carries_its_domain() {
        let client = PayerClient::new(Arc::new(PrivateKeySigner::random()));
        let requirements = requirements("permit_USDC", "2200", json!({"name": "USDC", "version": "2"}));
        let payload = client
            .sign_permit(&requirements, 84532, FACILITATOR, U256::from(3u64))
            .await
            .unwrap();
        let domain = payload.domain.parse().unwrap();
        assert_eq!(domain, Domain::new("USDC", "2", 84532, USDC));

        let raw = RawValue::from_string(serde_json::to_string(&payload).unwrap()).unwrap();
        let authorization = Authorization::decode(SchemeKind::Permit, &raw).unwrap();
        assert_eq!(authorization.recover_payer(&domain).unwrap(), client.address());
    }

    #[tokio::test]
    async fn cross_chain_needs_a_destination() {
        let client = PayerClient::new(PrivateKeySigner::random());
        let without = requirements("PZ_toArbitrum", "1000", json!({"name": "EURSM", "version": "1"}));
        assert!(matches!(
            client.sign_cross_chain(&without, 84532, U256::from(900u64)).await,
            Err(PayerError::MissingExtra("dstEid"))
        ));

        let with = requirements(
            "PZ_toArbitrum",
            "1000",
            json!({"name": "EURSM", "version": "1", "dstEid": 40231}),
        );
        let payload = client
            .sign_cross_chain(&with, 84532, U256::from(900u64))
            .await
            .unwrap();
        let raw = RawValue::from_string(serde_json::to_string(&payload).unwrap()).unwrap();
        let authorization = Authorization::decode(SchemeKind::CrossChain, &raw).unwrap();
        let domain = Domain::new("EURSM", "1", 84532, USDC);
        assert_eq!(authorization.recover_payer(&domain).unwrap(), client.address());
        match authorization {
            Authorization::CrossChain(a) => {
                assert_eq!(a.destination_chain, 40231);
                assert_eq!(a.minimal_amount, U256::from(900u64));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn payer0_payload_is_an_exact_authorization_with_a_destination() {
        let client = PayerClient::new(PrivateKeySigner::random());
        let with = requirements(
            "payer0_toArbitrum",
            "1000",
            json!({"name": "EURS", "version": "1", "dstEid": "40231"}),
        );
        let payload = client.sign_payer0(&with, 84532).await.unwrap();
        let raw = RawValue::from_string(serde_json::to_string(&payload).unwrap()).unwrap();
        let authorization = Authorization::decode(SchemeKind::Payer0, &raw).unwrap();
        let domain = Domain::new("EURS", "1", 84532, USDC);
        assert_eq!(authorization.recover_payer(&domain).unwrap(), client.address());
        match authorization {
            Authorization::Payer0(a) => assert_eq!(a.destination_chain, 40231),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_domain_name_is_reported() {
        let requirements = requirements("exact", "1000", json!({"version": "2"}));
        assert!(matches!(
            requirements_domain(&requirements, 84532),
            Err(PayerError::MissingExtra("name"))
        ));
    }
}
