//! Payment schemes: which authorization family a (scheme name, network) pair expects, and how
//! its payload is decoded and bound to the payment requirements.
//!
//! A scheme name is free-form (`"exact"`, `"permit_USDC"`, `"PZ_toBase"`); its [`SchemeKind`]
//! selects the decoder:
//!
//! - [`SchemeKind::Exact`]: ERC-3009 `transferWithAuthorization`, see [`exact`];
//! - [`SchemeKind::Permit`]: EIP-2612 permit followed by `transferFrom`, see [`permit`];
//! - [`SchemeKind::CrossChain`]: OFT send authorized by the payer, see [`cross_chain`];
//! - [`SchemeKind::Payer0`]: ERC-3009 authorization bridged by the OFT, see [`payer0`].

pub mod cross_chain;
pub mod exact;
pub mod payer0;
pub mod permit;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;
use std::fmt::{Debug, Display, Formatter};

use crate::digest::{Domain, FormatError, Message, parse_address, parse_uint};
use crate::proto::{PaymentRequirements, PaymentVerificationError, SupportedPaymentKind, X402Version1};
use crate::signature::{RawSignature, strip_hex_prefix, verify_identity};
use crate::timestamp::UnixTimestamp;

pub use cross_chain::CrossChainAuthorization;
pub use exact::ExactAuthorization;
pub use payer0::Payer0Authorization;
pub use permit::PermitAuthorization;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    Exact,
    Permit,
    CrossChain,
    Payer0,
}

impl Display for SchemeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemeKind::Exact => write!(f, "exact"),
            SchemeKind::Permit => write!(f, "permit"),
            SchemeKind::CrossChain => write!(f, "cross_chain"),
            SchemeKind::Payer0 => write!(f, "payer0"),
        }
    }
}

/// A configured scheme on one network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeConfig {
    pub name: String,
    pub network: String,
    pub kind: SchemeKind,
    /// Token contract; also the EIP-712 verifying contract.
    pub asset: Address,
    /// Advertised in `/supported`. `name`/`version` give the signing domain, `dstEid` the
    /// destination endpoint of a cross-chain scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl SchemeConfig {
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }

    /// `extra.dstEid`, given either as a number or a decimal string.
    pub fn dst_eid(&self) -> Option<u32> {
        let value = self.extra.as_ref()?.get("dstEid")?;
        match value {
            serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SchemeKey {
    pub name: String,
    pub network: String,
}

impl SchemeKey {
    pub fn new<N: Into<String>, M: Into<String>>(name: N, network: M) -> Self {
        Self {
            name: name.into(),
            network: network.into(),
        }
    }
}

impl Display for SchemeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.network, self.name)
    }
}

/// Configured schemes, looked up by (scheme name, network).
#[derive(Default, Clone)]
pub struct SchemeRegistry(HashMap<SchemeKey, SchemeConfig>);

impl Debug for SchemeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.0.keys().map(|k| k.to_string()).collect();
        f.debug_tuple("SchemeRegistry").field(&keys).finish()
    }
}

impl SchemeRegistry {
    pub fn build(config: &[SchemeConfig]) -> Self {
        let mut schemes = HashMap::with_capacity(config.len());
        for scheme in config {
            let key = SchemeKey::new(&scheme.name, &scheme.network);
            if schemes.contains_key(&key) {
                tracing::warn!("Duplicate scheme {}, keeping the last one", key);
            }
            tracing::info!(kind = %scheme.kind, asset = %scheme.asset, "Registered scheme {}", key);
            schemes.insert(key, scheme.clone());
        }
        Self(schemes)
    }

    pub fn get(&self, name: &str, network: &str) -> Option<&SchemeConfig> {
        self.0.get(&SchemeKey::new(name, network))
    }

    pub fn values(&self) -> impl Iterator<Item = &SchemeConfig> {
        self.0.values()
    }

    /// Payment kinds for `/supported`, ordered by network then scheme name.
    pub fn supported(&self) -> Vec<SupportedPaymentKind> {
        let mut kinds: Vec<SupportedPaymentKind> = self
            .values()
            .map(|scheme| SupportedPaymentKind {
                x402_version: X402Version1::VALUE,
                scheme: scheme.name.clone(),
                network: scheme.network.clone(),
                extra: scheme.extra.clone(),
            })
            .collect();
        kinds.sort_by(|a, b| (&a.network, &a.scheme).cmp(&(&b.network, &b.scheme)));
        kinds
    }
}

/// What a scheme-specific bind needs to know besides the authorization itself.
#[derive(Debug, Clone, Copy)]
pub struct BindContext<'a> {
    pub requirements: &'a PaymentRequirements,
    pub scheme: &'a SchemeConfig,
    pub chain_id: u64,
    pub facilitator: Address,
    pub now: UnixTimestamp,
}

/// A decoded authorization of any supported kind.
#[derive(Debug)]
pub enum Authorization {
    Exact(ExactAuthorization),
    Permit(PermitAuthorization),
    CrossChain(CrossChainAuthorization),
    Payer0(Payer0Authorization),
}

impl Authorization {
    pub fn decode(kind: SchemeKind, payload: &RawValue) -> Result<Self, PaymentVerificationError> {
        let authorization = match kind {
            SchemeKind::Exact => Authorization::Exact(ExactAuthorization::decode(payload)?),
            SchemeKind::Permit => Authorization::Permit(PermitAuthorization::decode(payload)?),
            SchemeKind::CrossChain => {
                Authorization::CrossChain(CrossChainAuthorization::decode(payload)?)
            }
            SchemeKind::Payer0 => Authorization::Payer0(Payer0Authorization::decode(payload)?),
        };
        Ok(authorization)
    }

    pub fn payer(&self) -> Address {
        match self {
            Authorization::Exact(a) => a.from,
            Authorization::Permit(a) => a.owner,
            Authorization::CrossChain(a) => a.from,
            Authorization::Payer0(a) => a.transfer.from,
        }
    }

    /// Payer address as written in the payload.
    pub fn claimed_payer(&self) -> &str {
        match self {
            Authorization::Exact(a) => &a.claimed_from,
            Authorization::Permit(a) => &a.claimed_owner,
            Authorization::CrossChain(a) => &a.claimed_from,
            Authorization::Payer0(a) => &a.transfer.claimed_from,
        }
    }

    /// Amount leaving the payer's account.
    pub fn amount(&self) -> U256 {
        match self {
            Authorization::Exact(a) => a.value,
            Authorization::Permit(a) => a.value,
            Authorization::CrossChain(a) => a.amount,
            Authorization::Payer0(a) => a.transfer.value,
        }
    }

    pub fn signature(&self) -> &RawSignature {
        match self {
            Authorization::Exact(a) => &a.signature,
            Authorization::Permit(a) => &a.signature,
            Authorization::CrossChain(a) => &a.signature,
            Authorization::Payer0(a) => &a.transfer.signature,
        }
    }

    pub fn message(&self) -> Message {
        match self {
            Authorization::Exact(a) => Message::Transfer(a.message()),
            Authorization::Permit(a) => Message::Permit(a.message()),
            Authorization::CrossChain(a) => Message::CrossChain(a.message()),
            Authorization::Payer0(a) => Message::Transfer(a.message()),
        }
    }

    /// Checks the authorization against the requirements and returns its signing domain.
    pub fn bind(&self, ctx: &BindContext<'_>) -> Result<Domain, PaymentVerificationError> {
        match self {
            Authorization::Exact(a) => a.bind(ctx),
            Authorization::Permit(a) => a.bind(ctx),
            Authorization::CrossChain(a) => a.bind(ctx),
            Authorization::Payer0(a) => a.bind(ctx),
        }
    }

    /// Recovers the signer of the authorization under `domain` and checks it is the payer.
    pub fn recover_payer(&self, domain: &Domain) -> Result<Address, PaymentVerificationError> {
        let digest = self.message().signing_digest(domain);
        let recovered = self.signature().recover(&digest)?;
        verify_identity(recovered, self.claimed_payer())?;
        Ok(recovered)
    }
}

/// An unsigned integer given either as a JSON number or as a decimal string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireUint {
    Number(u64),
    String(String),
}

impl WireUint {
    pub fn parse(&self, field: &'static str) -> Result<U256, FormatError> {
        match self {
            WireUint::Number(n) => Ok(U256::from(*n)),
            WireUint::String(s) => parse_uint(field, s),
        }
    }
}

impl From<U256> for WireUint {
    fn from(value: U256) -> Self {
        WireUint::String(value.to_string())
    }
}

/// EIP-712 domain as carried inside permit and cross-chain payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainWire {
    pub name: String,
    pub version: String,
    pub chain_id: WireUint,
    pub verifying_contract: String,
}

impl DomainWire {
    pub fn parse(&self) -> Result<Domain, FormatError> {
        let chain_id = self.chain_id.parse("domain.chainId")?;
        let chain_id = u64::try_from(chain_id).map_err(|_| FormatError::Overflow {
            field: "domain.chainId",
            value: chain_id.to_string(),
        })?;
        let verifying_contract =
            parse_address("domain.verifyingContract", &self.verifying_contract)?;
        Ok(Domain::new(
            self.name.clone(),
            self.version.clone(),
            chain_id,
            verifying_contract,
        ))
    }
}

impl From<&Domain> for DomainWire {
    fn from(domain: &Domain) -> Self {
        Self {
            name: domain.name.clone(),
            version: domain.version.clone(),
            chain_id: WireUint::Number(domain.chain_id),
            verifying_contract: domain.verifying_contract.to_string(),
        }
    }
}

/// Case-insensitive comparison of two hex addresses; the `0x` prefix is optional.
pub fn same_address(a: &str, b: &str) -> bool {
    strip_hex_prefix(a).eq_ignore_ascii_case(strip_hex_prefix(b))
}

/// The authorized amount must equal `maxAmountRequired` exactly.
fn check_amount(
    authorized: U256,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    let required = parse_uint("maxAmountRequired", &requirements.max_amount_required)?;
    if authorized != required {
        return Err(PaymentVerificationError::AmountMismatch {
            authorized,
            required,
        });
    }
    Ok(())
}

fn check_recipient(
    claimed_to: &str,
    requirements: &PaymentRequirements,
) -> Result<(), PaymentVerificationError> {
    if !same_address(claimed_to, &requirements.pay_to) {
        return Err(PaymentVerificationError::RecipientMismatch {
            payload: claimed_to.to_string(),
            requirements: requirements.pay_to.clone(),
        });
    }
    Ok(())
}

/// `now < validAfter` is too early, `now > validBefore` is too late. Both bounds are inclusive.
fn check_time_window(
    valid_after: U256,
    valid_before: U256,
    now: UnixTimestamp,
) -> Result<(), PaymentVerificationError> {
    let now_secs = U256::from(now.as_secs());
    if now_secs < valid_after {
        return Err(PaymentVerificationError::NotYetValid {
            valid_after,
            now: now.as_secs(),
        });
    }
    if now_secs > valid_before {
        return Err(PaymentVerificationError::ExpiredAuthorization {
            deadline: valid_before,
            now: now.as_secs(),
        });
    }
    Ok(())
}

/// A domain carried in the payload must name the configured chain and token.
fn check_payload_domain(
    domain: &Domain,
    ctx: &BindContext<'_>,
) -> Result<(), PaymentVerificationError> {
    if domain.chain_id != ctx.chain_id {
        return Err(PaymentVerificationError::NetworkMismatch {
            payload: format!("chain id {}", domain.chain_id),
            requirements: format!("{} (chain id {})", ctx.requirements.network, ctx.chain_id),
        });
    }
    if domain.verifying_contract != ctx.scheme.asset {
        return Err(PaymentVerificationError::AssetMismatch {
            payload: domain.verifying_contract.to_string(),
            expected: ctx.scheme.asset,
        });
    }
    Ok(())
}

/// A scheme pinned to a destination endpoint only accepts sends to that endpoint.
fn check_destination(
    destination_chain: u32,
    ctx: &BindContext<'_>,
) -> Result<(), PaymentVerificationError> {
    match ctx.scheme.dst_eid() {
        Some(dst_eid) if dst_eid != destination_chain => {
            Err(PaymentVerificationError::SchemeMismatch {
                payload: format!("destination endpoint {destination_chain}"),
                requirements: format!("{} (endpoint {dst_eid})", ctx.scheme.name),
            })
        }
        _ => Ok(()),
    }
}

fn parse_signature(value: &str) -> Result<RawSignature, PaymentVerificationError> {
    Ok(RawSignature::from_hex(value)?)
}

fn parse_payload<'a, T: Deserialize<'a>>(
    payload: &'a RawValue,
) -> Result<T, PaymentVerificationError> {
    Ok(serde_json::from_str(payload.get())?)
}
