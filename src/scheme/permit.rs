//! `permit` kind: an EIP-2612 permit naming the facilitator as spender.
//!
//! Settlement is two transactions: `permit` grants the allowance, then the facilitator pulls
//! the funds with `transferFrom(owner, payTo, value)`. The payload carries its own signing
//! domain and the owner's sequential permit nonce (see `GET /permitnonce`).

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::digest::{Domain, Permit, parse_address};
use crate::proto::PaymentVerificationError;
use crate::scheme::{
    BindContext, DomainWire, WireUint, check_amount, check_payload_domain, parse_payload,
    parse_signature, same_address,
};
use crate::signature::RawSignature;

/// Wire shape of a `permit` payload. Numbers may be JSON numbers or decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitPayload {
    pub domain: DomainWire,
    pub message: PermitPayloadMessage,
    pub nonce: WireUint,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermitPayloadMessage {
    pub owner: String,
    pub spender: String,
    pub value: WireUint,
    pub deadline: WireUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitAuthorization {
    pub domain: Domain,
    pub owner: Address,
    pub claimed_owner: String,
    pub spender: Address,
    pub value: U256,
    pub nonce: U256,
    pub deadline: U256,
    pub signature: RawSignature,
}

impl PermitAuthorization {
    pub fn decode(payload: &RawValue) -> Result<Self, PaymentVerificationError> {
        let wire: PermitPayload = parse_payload(payload)?;
        let message = &wire.message;
        Ok(Self {
            domain: wire.domain.parse()?,
            owner: parse_address("message.owner", &message.owner)?,
            claimed_owner: message.owner.clone(),
            spender: parse_address("message.spender", &message.spender)?,
            value: message.value.parse("message.value")?,
            nonce: wire.nonce.parse("nonce")?,
            deadline: message.deadline.parse("message.deadline")?,
            signature: parse_signature(&wire.signature)?,
        })
    }

    /// The requirements must name this facilitator in `extra.facilitator`, and the permit must
    /// grant the allowance to it.
    pub fn bind(&self, ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
        let facilitator = ctx.facilitator.to_string();
        match ctx.requirements.extra_str("facilitator") {
            Some(named) if same_address(named, &facilitator) => {}
            Some(named) => {
                return Err(PaymentVerificationError::FacilitatorMismatch(named.to_string()));
            }
            None => {
                return Err(PaymentVerificationError::FacilitatorMismatch(
                    "<missing extra.facilitator>".to_string(),
                ));
            }
        }
        if self.spender != ctx.facilitator {
            return Err(PaymentVerificationError::FacilitatorMismatch(
                self.spender.to_string(),
            ));
        }
        check_amount(self.value, ctx.requirements)?;
        check_payload_domain(&self.domain, ctx)?;
        if U256::from(ctx.now.as_secs()) > self.deadline {
            return Err(PaymentVerificationError::ExpiredAuthorization {
                deadline: self.deadline,
                now: ctx.now.as_secs(),
            });
        }
        Ok(self.domain.clone())
    }

    pub fn message(&self) -> Permit {
        Permit {
            owner: self.owner,
            spender: self.spender,
            value: self.value,
            nonce: self.nonce,
            deadline: self.deadline,
        }
    }
}
