//! `cross_chain` kind: the payer authorizes an OFT token to send `amount` to `to` on the
//! destination endpoint, accepting that at least `minimalAmount` arrives after the
//! facilitator's markup.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::digest::{
    CrossChainTransferWithAuthorization, Domain, FormatError, parse_address, parse_nonce,
};
use crate::proto::PaymentVerificationError;
use crate::scheme::{
    BindContext, DomainWire, WireUint, check_amount, check_destination, check_payload_domain,
    check_recipient, check_time_window, parse_payload, parse_signature,
};
use crate::signature::RawSignature;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossChainPayload {
    pub domain: DomainWire,
    pub authorization: CrossChainPayloadAuthorization,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainPayloadAuthorization {
    pub from: String,
    pub to: String,
    pub amount: WireUint,
    pub minimal_amount: WireUint,
    pub destination_chain: WireUint,
    pub valid_after: WireUint,
    pub valid_before: WireUint,
    pub nonce: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrossChainAuthorization {
    pub domain: Domain,
    pub from: Address,
    pub claimed_from: String,
    pub to: Address,
    pub claimed_to: String,
    pub amount: U256,
    pub minimal_amount: U256,
    /// LayerZero endpoint id of the destination chain.
    pub destination_chain: u32,
    pub valid_after: U256,
    pub valid_before: U256,
    pub nonce: B256,
    pub signature: RawSignature,
}

impl CrossChainAuthorization {
    pub fn decode(payload: &RawValue) -> Result<Self, PaymentVerificationError> {
        let wire: CrossChainPayload = parse_payload(payload)?;
        let auth = &wire.authorization;
        let destination_chain = auth
            .destination_chain
            .parse("authorization.destinationChain")?;
        let destination_chain =
            u32::try_from(destination_chain).map_err(|_| FormatError::Overflow {
                field: "authorization.destinationChain",
                value: destination_chain.to_string(),
            })?;
        Ok(Self {
            domain: wire.domain.parse()?,
            from: parse_address("authorization.from", &auth.from)?,
            claimed_from: auth.from.clone(),
            to: parse_address("authorization.to", &auth.to)?,
            claimed_to: auth.to.clone(),
            amount: auth.amount.parse("authorization.amount")?,
            minimal_amount: auth.minimal_amount.parse("authorization.minimalAmount")?,
            destination_chain,
            valid_after: auth.valid_after.parse("authorization.validAfter")?,
            valid_before: auth.valid_before.parse("authorization.validBefore")?,
            nonce: parse_nonce("authorization.nonce", &auth.nonce)?,
            signature: parse_signature(&wire.signature)?,
        })
    }

    pub fn bind(&self, ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
        check_payload_domain(&self.domain, ctx)?;
        check_destination(self.destination_chain, ctx)?;
        check_amount(self.amount, ctx.requirements)?;
        check_recipient(&self.claimed_to, ctx.requirements)?;
        check_time_window(self.valid_after, self.valid_before, ctx.now)?;
        Ok(self.domain.clone())
    }

    /// `amount - markup >= minimalAmount`. A markup above the amount never satisfies it.
    pub fn check_slippage(&self, markup: U256) -> Result<(), PaymentVerificationError> {
        let covered = self
            .amount
            .checked_sub(markup)
            .is_some_and(|net| net >= self.minimal_amount);
        if covered {
            Ok(())
        } else {
            Err(PaymentVerificationError::SlippageNotGuaranteed {
                amount: self.amount,
                markup,
                minimal: self.minimal_amount,
            })
        }
    }

    pub fn message(&self) -> CrossChainTransferWithAuthorization {
        CrossChainTransferWithAuthorization {
            from: self.from,
            to: self.to,
            amount: self.amount,
            minimalAmount: self.minimal_amount,
            destinationChain: U256::from(self.destination_chain),
            validAfter: self.valid_after,
            validBefore: self.valid_before,
            nonce: self.nonce,
        }
    }
}
