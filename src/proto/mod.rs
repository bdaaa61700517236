//! Wire types of the facilitator HTTP interface.
//!
//! Field names follow the x402 v1 JSON format used by the TypeScript and Go SDKs: camelCase
//! envelopes, `isValid`/`invalidReason` for verification and `success`/`errorReason` for
//! settlement. The scheme-specific `payload` of an envelope stays raw JSON until the
//! validator decodes it for the configured scheme kind.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_with::{DisplayFromStr, serde_as};
use std::fmt;
use std::fmt::Display;

use crate::digest::FormatError;
use crate::signature::SignatureError;

/// Version 1 of the x402 protocol, the only version this facilitator speaks.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version1;

impl X402Version1 {
    pub const VALUE: u8 = 1;
}

impl Serialize for X402Version1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version1)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Body of `POST /verify` and `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEnvelope {
    pub x402_version: X402Version1,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

pub type VerifyRequest = PaymentEnvelope;
pub type SettleRequest = PaymentEnvelope;

/// What the payer signed, as presented by the resource server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version1,
    pub scheme: String,
    pub network: String,
    /// Scheme-specific authorization, kept verbatim.
    pub payload: Box<RawValue>,
}

/// What the resource server asks for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Decimal string in the asset's smallest unit.
    pub max_amount_required: String,
    pub resource: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl PaymentRequirements {
    /// A string entry of `extra`, if present.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// Machine-readable reason codes used in `invalidReason` and `errorReason`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The scheme payload is not valid JSON of the expected shape.
    InvalidPayload,
    /// A field has the right shape but an unparseable value.
    InvalidFormat,
    InvalidSignature,
    /// The recovered signer is not the claimed payer.
    SignerMismatch,
    SchemeMismatch,
    NetworkMismatch,
    UnsupportedNetworkOrScheme,
    AssetMismatch,
    AmountMismatch,
    RecipientMismatch,
    NotYetValid,
    ExpiredAuthorization,
    FacilitatorMismatch,
    InsufficientBalance,
    SlippageNotGuaranteed,
    /// The OFT has no peer on the destination endpoint.
    NoPeerAtDestination,
    /// A chain RPC failed while checking or submitting.
    UpstreamError,
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_value(self).map_err(|_| fmt::Error)?;
        f.write_str(json.as_str().unwrap_or_default())
    }
}

/// Reasons a payment authorization is rejected before anything is sent to a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PaymentVerificationError {
    /// The scheme payload is not JSON of the expected shape.
    #[error("Malformed payload: {0}")]
    Decode(String),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Recovered signer {recovered} does not match payer {claimed}")]
    SignerMismatch { recovered: Address, claimed: String },
    #[error("Payload scheme {payload} differs from required scheme {requirements}")]
    SchemeMismatch {
        payload: String,
        requirements: String,
    },
    #[error("Payload network {payload} differs from required network {requirements}")]
    NetworkMismatch {
        payload: String,
        requirements: String,
    },
    #[error("Scheme {scheme} is not supported on network {network}")]
    UnsupportedNetworkOrScheme { scheme: String, network: String },
    #[error("Asset {payload} differs from configured asset {expected}")]
    AssetMismatch { payload: String, expected: Address },
    #[error("Authorized amount {authorized} differs from required amount {required}")]
    AmountMismatch { authorized: U256, required: U256 },
    #[error("Recipient {payload} differs from payTo {requirements}")]
    RecipientMismatch {
        payload: String,
        requirements: String,
    },
    #[error("Authorization is not valid before {valid_after}, now is {now}")]
    NotYetValid { valid_after: U256, now: u64 },
    #[error("Authorization expired at {deadline}, now is {now}")]
    ExpiredAuthorization { deadline: U256, now: u64 },
    #[error("Authorization is bound to facilitator {0}")]
    FacilitatorMismatch(String),
    #[error("Onchain balance {balance} is not enough to cover {required}")]
    InsufficientBalance { balance: U256, required: U256 },
    #[error("Amount {amount} minus markup {markup} is below the minimal amount {minimal}")]
    SlippageNotGuaranteed {
        amount: U256,
        markup: U256,
        minimal: U256,
    },
    #[error("No peer registered for destination endpoint {dst_eid}")]
    NoPeer { dst_eid: u32 },
}

impl PaymentVerificationError {
    pub fn reason(&self) -> ErrorReason {
        match self {
            PaymentVerificationError::Decode(_) => ErrorReason::InvalidPayload,
            PaymentVerificationError::Format(_) => ErrorReason::InvalidFormat,
            PaymentVerificationError::InvalidSignature(_) => ErrorReason::InvalidSignature,
            PaymentVerificationError::SignerMismatch { .. } => ErrorReason::SignerMismatch,
            PaymentVerificationError::SchemeMismatch { .. } => ErrorReason::SchemeMismatch,
            PaymentVerificationError::NetworkMismatch { .. } => ErrorReason::NetworkMismatch,
            PaymentVerificationError::UnsupportedNetworkOrScheme { .. } => {
                ErrorReason::UnsupportedNetworkOrScheme
            }
            PaymentVerificationError::AssetMismatch { .. } => ErrorReason::AssetMismatch,
            PaymentVerificationError::AmountMismatch { .. } => ErrorReason::AmountMismatch,
            PaymentVerificationError::RecipientMismatch { .. } => ErrorReason::RecipientMismatch,
            PaymentVerificationError::NotYetValid { .. } => ErrorReason::NotYetValid,
            PaymentVerificationError::ExpiredAuthorization { .. } => {
                ErrorReason::ExpiredAuthorization
            }
            PaymentVerificationError::FacilitatorMismatch(_) => ErrorReason::FacilitatorMismatch,
            PaymentVerificationError::InsufficientBalance { .. } => ErrorReason::InsufficientBalance,
            PaymentVerificationError::SlippageNotGuaranteed { .. } => {
                ErrorReason::SlippageNotGuaranteed
            }
            PaymentVerificationError::NoPeer { .. } => ErrorReason::NoPeerAtDestination,
        }
    }
}

impl From<SignatureError> for PaymentVerificationError {
    fn from(value: SignatureError) -> Self {
        match value {
            SignatureError::InvalidSignature(message) => Self::InvalidSignature(message),
            SignatureError::IdentityMismatch { recovered, claimed } => {
                Self::SignerMismatch { recovered, claimed }
            }
        }
    }
}

impl From<serde_json::Error> for PaymentVerificationError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

/// Result of `POST /verify`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResponse {
    Valid {
        payer: String,
    },
    Invalid {
        reason: ErrorReason,
        payer: Option<String>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: String) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(payer: Option<String>, reason: ErrorReason) -> Self {
        VerifyResponse::Invalid { reason, payer }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResponse::Valid { .. })
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<ErrorReason>,
}

impl Serialize for VerifyResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                payer: Some(payer.clone()),
                invalid_reason: None,
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                payer: payer.clone(),
                invalid_reason: Some(*reason),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            Ok(VerifyResponse::Valid { payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(VerifyResponse::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Result of `POST /settle`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResponse {
    Success {
        payer: String,
        transaction: String,
        network: String,
    },
    Error {
        reason: ErrorReason,
        payer: Option<String>,
        network: String,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<ErrorReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<String>,
    network: String,
}

impl Serialize for SettleResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let wire = match self {
            SettleResponse::Success {
                payer,
                transaction,
                network,
            } => SettleResponseWire {
                success: true,
                error_reason: None,
                payer: Some(payer.clone()),
                transaction: Some(transaction.clone()),
                network: network.clone(),
            },
            SettleResponse::Error {
                reason,
                payer,
                network,
            } => SettleResponseWire {
                success: false,
                error_reason: Some(*reason),
                payer: payer.clone(),
                transaction: None,
                network: network.clone(),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            let transaction = wire
                .transaction
                .ok_or_else(|| serde::de::Error::missing_field("transaction"))?;
            Ok(SettleResponse::Success {
                payer,
                transaction,
                network: wire.network,
            })
        } else {
            let reason = wire
                .error_reason
                .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
            Ok(SettleResponse::Error {
                reason,
                payer: wire.payer,
                network: wire.network,
            })
        }
    }
}

/// Result of `GET /receipt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReceiptResponse {
    NotFound,
    /// Submitted, not yet mined. `await_time` is seconds since submission.
    Pending { await_time: f64 },
    /// Mined. `settle_time` reads like `"12 sec"`.
    Found {
        settle_time: String,
        receipt: serde_json::Value,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptQuery {
    pub network: Option<String>,
    pub tx: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermitNonceQuery {
    pub network: String,
    pub asset: String,
    pub owner: String,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitNonceResponse {
    pub network: String,
    pub asset: String,
    pub owner: String,
    #[serde_as(as = "DisplayFromStr")]
    pub nonce: U256,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkupQuery {
    pub network: String,
    pub scheme: String,
    #[serde(default)]
    pub dst_eid: Option<u32>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkupResponse {
    pub network: String,
    pub scheme: String,
    #[serde_as(as = "DisplayFromStr")]
    pub markup: U256,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: u8,
    pub scheme: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SupportedResponse {
    pub kinds: Vec<SupportedPaymentKind>,
}

/// Body of 4xx/5xx responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ENVELOPE: &str = r#"{
        "x402Version": 1,
        "paymentPayload": {
            "x402Version": 1,
            "scheme": "exact",
            "network": "base-sepolia",
            "payload": {"signature":"0xabc","authorization":{"from":"0x01","value":"1000"}}
        },
        "paymentRequirements": {
            "scheme": "exact",
            "network": "base-sepolia",
            "maxAmountRequired": "1000",
            "resource": "https://example.com/weather",
            "description": "Weather report",
            "mimeType": "application/json",
            "payTo": "0x2222222222222222222222222222222222222222",
            "maxTimeoutSeconds": 60,
            "asset": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "extra": {"name": "USDC", "version": "2"}
        }
    }"#;

    #[test]
    fn envelope_keeps_payload_verbatim() {
        let envelope: PaymentEnvelope = serde_json::from_str(ENVELOPE).unwrap();
        assert_eq!(
            envelope.payment_payload.payload.get(),
            r#"{"signature":"0xabc","authorization":{"from":"0x01","value":"1000"}}"#
        );
        assert_eq!(envelope.payment_requirements.extra_str("name"), Some("USDC"));
        assert_eq!(envelope.payment_requirements.extra_str("facilitator"), None);

        let reencoded = serde_json::to_value(&envelope).unwrap();
        assert_eq!(reencoded["paymentRequirements"]["maxAmountRequired"], "1000");
        assert!(reencoded["paymentRequirements"].get("outputSchema").is_none());
    }

    #[test]
    fn envelope_rejects_other_versions() {
        let v2 = ENVELOPE.replacen("\"x402Version\": 1", "\"x402Version\": 2", 1);
        assert!(serde_json::from_str::<PaymentEnvelope>(&v2).is_err());
    }

    #[test]
    fn verify_response_wire_shape() {
        let valid = serde_json::to_value(VerifyResponse::valid("0xabc".into())).unwrap();
        assert_eq!(valid, json!({"isValid": true, "payer": "0xabc"}));

        let invalid = VerifyResponse::invalid(Some("0xabc".into()), ErrorReason::AmountMismatch);
        let value = serde_json::to_value(&invalid).unwrap();
        assert_eq!(
            value,
            json!({"isValid": false, "payer": "0xabc", "invalidReason": "amount_mismatch"})
        );
        let parsed: VerifyResponse = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, invalid);
    }

    #[test]
    fn settle_response_wire_shape() {
        let success = SettleResponse::Success {
            payer: "0xabc".into(),
            transaction: "0xdef".into(),
            network: "base-sepolia".into(),
        };
        assert_eq!(
            serde_json::to_value(&success).unwrap(),
            json!({"success": true, "payer": "0xabc", "transaction": "0xdef", "network": "base-sepolia"})
        );
        let error = SettleResponse::Error {
            reason: ErrorReason::UpstreamError,
            payer: None,
            network: "base-sepolia".into(),
        };
        assert_eq!(
            serde_json::to_value(&error).unwrap(),
            json!({"success": false, "errorReason": "upstream_error", "network": "base-sepolia"})
        );
    }

    #[test]
    fn receipt_response_statuses() {
        assert_eq!(
            serde_json::to_value(ReceiptResponse::NotFound).unwrap(),
            json!({"status": "not_found"})
        );
        assert_eq!(
            serde_json::to_value(ReceiptResponse::Pending { await_time: 2.5 }).unwrap(),
            json!({"status": "pending", "await_time": 2.5})
        );
        let found = ReceiptResponse::Found {
            settle_time: "12 sec".into(),
            receipt: json!({"status": "0x1"}),
        };
        assert_eq!(
            serde_json::to_value(found).unwrap(),
            json!({"status": "found", "settle_time": "12 sec", "receipt": {"status": "0x1"}})
        );
    }

    #[test]
    fn numbers_are_decimal_strings() {
        let response = MarkupResponse {
            network: "arbitrum-sepolia".into(),
            scheme: "PZ_toBase".into(),
            markup: U256::from(60u64),
        };
        assert_eq!(serde_json::to_value(&response).unwrap()["markup"], "60");
        let nonce = PermitNonceResponse {
            network: "base-sepolia".into(),
            asset: "0x01".into(),
            owner: "0x02".into(),
            nonce: U256::from(12u64),
        };
        assert_eq!(serde_json::to_value(&nonce).unwrap()["nonce"], "12");
    }

    #[test]
    fn verification_errors_map_to_reasons() {
        let identity = SignatureError::IdentityMismatch {
            recovered: Address::ZERO,
            claimed: "0x01".into(),
        };
        assert_eq!(
            PaymentVerificationError::from(identity).reason(),
            ErrorReason::SignerMismatch
        );
        let decode = serde_json::from_str::<u8>("{").unwrap_err();
        assert_eq!(
            PaymentVerificationError::from(decode).reason(),
            ErrorReason::InvalidPayload
        );
        let balance = PaymentVerificationError::InsufficientBalance {
            balance: U256::from(5u64),
            required: U256::from(10u64),
        };
        assert_eq!(balance.reason(), ErrorReason::InsufficientBalance);
    }

    #[test]
    fn error_reason_display_is_snake_case() {
        assert_eq!(ErrorReason::SlippageNotGuaranteed.to_string(), "slippage_not_guaranteed");
        assert_eq!(ErrorReason::UnsupportedNetworkOrScheme.to_string(), "unsupported_network_or_scheme");
        assert_eq!(ErrorReason::InsufficientBalance.to_string(), "insufficient_balance");
    }
}
