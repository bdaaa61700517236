//! `exact` kind: an ERC-3009 `transferWithAuthorization` signed by the payer.
//!
//! The signing domain is not part of the payload. It is rebuilt from the requirements'
//! `extra.name`/`extra.version` (falling back to the configured scheme), the network's
//! chain id, and the configured asset.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::digest::{Domain, TransferWithAuthorization, parse_address, parse_nonce};
use crate::proto::PaymentVerificationError;
use crate::scheme::{
    BindContext, WireUint, check_amount, check_recipient, check_time_window, parse_payload,
    parse_signature,
};
use crate::signature::RawSignature;

/// Wire shape of an `exact` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExactPayload {
    pub signature: String,
    pub authorization: ExactPayloadAuthorization,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPayloadAuthorization {
    pub from: String,
    pub to: String,
    pub value: WireUint,
    pub valid_after: WireUint,
    pub valid_before: WireUint,
    pub nonce: String,
}

/// A decoded ERC-3009 authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactAuthorization {
    pub from: Address,
    pub claimed_from: String,
    pub to: Address,
    pub claimed_to: String,
    pub value: U256,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: B256,
    pub signature: RawSignature,
}

impl ExactAuthorization {
    pub fn decode(payload: &RawValue) -> Result<Self, PaymentVerificationError> {
        let wire: ExactPayload = parse_payload(payload)?;
        let auth = &wire.authorization;
        Ok(Self {
            from: parse_address("authorization.from", &auth.from)?,
            claimed_from: auth.from.clone(),
            to: parse_address("authorization.to", &auth.to)?,
            claimed_to: auth.to.clone(),
            value: auth.value.parse("authorization.value")?,
            valid_after: auth.valid_after.parse("authorization.validAfter")?,
            valid_before: auth.valid_before.parse("authorization.validBefore")?,
            nonce: parse_nonce("authorization.nonce", &auth.nonce)?,
            signature: parse_signature(&wire.signature)?,
        })
    }

    pub fn bind(&self, ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
        check_amount(self.value, ctx.requirements)?;
        check_recipient(&self.claimed_to, ctx.requirements)?;
        check_time_window(self.valid_after, self.valid_before, ctx.now)?;
        requirements_domain(ctx)
    }

    pub fn message(&self) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from: self.from,
            to: self.to,
            value: self.value,
            validAfter: self.valid_after,
            validBefore: self.valid_before,
            nonce: self.nonce,
        }
    }
}

/// Token domain for kinds whose payload does not carry one.
fn requirements_domain(ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
    let lookup = |key: &str| {
        ctx.requirements
            .extra_str(key)
            .or_else(|| ctx.scheme.extra_str(key))
            .map(str::to_string)
            .ok_or_else(|| PaymentVerificationError::Decode(format!("missing extra.{key}")))
    };
    Ok(Domain::new(
        lookup("name")?,
        lookup("version")?,
        ctx.chain_id,
        ctx.scheme.asset,
    ))
}
