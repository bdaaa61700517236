//! `payer0` kind: an ERC-3009 `transferWithAuthorization` that the OFT token bridges to
//! `payTo` on the destination endpoint through `sendWithAuthorization`.
//!
//! The payer signs a plain `exact` authorization; the payload adds `destEid`. The facilitator
//! markup is taken out of the bridged amount, so the payer pays exactly `maxAmountRequired`
//! and the recipient receives at least `amount - markup`.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::digest::{Domain, FormatError, TransferWithAuthorization};
use crate::proto::PaymentVerificationError;
use crate::scheme::exact::{ExactAuthorization, ExactPayloadAuthorization};
use crate::scheme::{BindContext, WireUint, check_destination, parse_payload};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payer0Payload {
    pub signature: String,
    pub authorization: ExactPayloadAuthorization,
    pub dest_eid: WireUint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payer0Authorization {
    pub transfer: ExactAuthorization,
    /// LayerZero endpoint id the funds are bridged to.
    pub destination_chain: u32,
}

impl Payer0Authorization {
    pub fn decode(payload: &RawValue) -> Result<Self, PaymentVerificationError> {
        let wire: Payer0Payload = parse_payload(payload)?;
        let destination_chain = wire.dest_eid.parse("destEid")?;
        let destination_chain =
            u32::try_from(destination_chain).map_err(|_| FormatError::Overflow {
                field: "destEid",
                value: destination_chain.to_string(),
            })?;
        if destination_chain == 0 {
            return Err(PaymentVerificationError::Decode(
                "missing destination endpoint".into(),
            ));
        }
        Ok(Self {
            transfer: ExactAuthorization::decode(payload)?,
            destination_chain,
        })
    }

    pub fn bind(&self, ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
        check_destination(self.destination_chain, ctx)?;
        self.transfer.bind(ctx)
    }

    /// The markup must not exceed the amount; the remainder is the minimum bridged amount.
    pub fn min_amount(&self, markup: U256) -> Result<U256, PaymentVerificationError> {
        self.transfer.value.checked_sub(markup).ok_or(
            PaymentVerificationError::SlippageNotGuaranteed {
                amount: self.transfer.value,
                markup,
                minimal: U256::ZERO,
            },
        )
    }

    pub fn message(&self) -> TransferWithAuthorization {
        self.transfer.message()
    }
}
