//! EIP-712 digest engine.
//!
//! Every authorization accepted by the facilitator is an EIP-712 typed message. The value
//! that a payer actually signs is
//!
//! ```text
//! keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)
//! ```
//!
//! where the domain separator binds the token contract (name, version, chain id, address)
//! and the struct hash binds the message fields. Three message families are supported and
//! share the domain separator and final digest construction:
//!
//! - [`TransferWithAuthorization`] (ERC-3009)
//! - [`Permit`] (EIP-2612)
//! - [`CrossChainTransferWithAuthorization`] (OFT send authorized off-chain)
//!
//! Field parsing lives here too: decimal and hex fields coming from the wire are checked
//! with [`parse_uint`], [`parse_nonce`] and [`parse_address`] before a message is built, so a
//! malformed field is reported as a [`FormatError`] and nothing partially parsed is hashed.

use alloy_primitives::{Address, B256, U256, keccak256};
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain, sol};
use std::str::FromStr;

/// Type string of a domain carrying all four fields.
pub const EIP712_DOMAIN_TYPE: &str =
    "EIP712Domain(string name,string version,uint256 chainId,address verifyingContract)";

sol! {
    /// ERC-3009 `transferWithAuthorization` message.
    #[derive(Debug, PartialEq, Eq)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }

    /// EIP-2612 permit message. The nonce is the owner's sequential permit nonce.
    #[derive(Debug, PartialEq, Eq)]
    struct Permit {
        address owner;
        address spender;
        uint256 value;
        uint256 nonce;
        uint256 deadline;
    }

    /// Cross-chain transfer authorization: `amount` leaves the source chain, at least
    /// `minimalAmount` must arrive on `destinationChain` after the facilitator markup.
    #[derive(Debug, PartialEq, Eq)]
    struct CrossChainTransferWithAuthorization {
        address from;
        address to;
        uint256 amount;
        uint256 minimalAmount;
        uint256 destinationChain;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

/// EIP-712 signing domain of a token contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
    pub verifying_contract: Address,
}

impl Domain {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        chain_id: u64,
        verifying_contract: Address,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            chain_id,
            verifying_contract,
        }
    }

    pub fn separator(&self) -> B256 {
        domain_separator(self)
    }

    pub fn as_eip712(&self) -> Eip712Domain {
        eip712_domain! {
            name: self.name.clone(),
            version: self.version.clone(),
            chain_id: self.chain_id,
            verifying_contract: self.verifying_contract,
        }
    }
}

/// A typed message from one of the supported families.
#[derive(Debug, PartialEq, Eq)]
pub enum Message {
    Transfer(TransferWithAuthorization),
    Permit(Permit),
    CrossChain(CrossChainTransferWithAuthorization),
}

impl Message {
    /// `keccak256` of the message's EIP-712 type string.
    pub fn type_hash(&self) -> B256 {
        match self {
            Message::Transfer(m) => m.eip712_type_hash(),
            Message::Permit(m) => m.eip712_type_hash(),
            Message::CrossChain(m) => m.eip712_type_hash(),
        }
    }

    pub fn struct_hash(&self) -> B256 {
        struct_hash(self)
    }

    /// The 32-byte digest a payer signs for this message under `domain`.
    pub fn signing_digest(&self, domain: &Domain) -> B256 {
        final_digest(&domain_separator(domain), &self.struct_hash())
    }
}

impl From<TransferWithAuthorization> for Message {
    fn from(value: TransferWithAuthorization) -> Self {
        Message::Transfer(value)
    }
}

impl From<Permit> for Message {
    fn from(value: Permit) -> Self {
        Message::Permit(value)
    }
}

impl From<CrossChainTransferWithAuthorization> for Message {
    fn from(value: CrossChainTransferWithAuthorization) -> Self {
        Message::CrossChain(value)
    }
}

/// Computes the EIP-712 domain separator.
///
/// Each field occupies one 32-byte word: strings are hashed, the chain id is a big-endian
/// `uint256`, the contract address is right-aligned.
pub fn domain_separator(domain: &Domain) -> B256 {
    let mut encoded = Vec::with_capacity(5 * 32);
    encoded.extend_from_slice(keccak256(EIP712_DOMAIN_TYPE).as_slice());
    encoded.extend_from_slice(keccak256(domain.name.as_bytes()).as_slice());
    encoded.extend_from_slice(keccak256(domain.version.as_bytes()).as_slice());
    encoded.extend_from_slice(&U256::from(domain.chain_id).to_be_bytes::<32>());
    encoded.extend_from_slice(domain.verifying_contract.into_word().as_slice());
    keccak256(encoded)
}

/// Computes `keccak256(typeHash ‖ abi.encode(fields))` for a message.
pub fn struct_hash(message: &Message) -> B256 {
    match message {
        Message::Transfer(m) => m.eip712_hash_struct(),
        Message::Permit(m) => m.eip712_hash_struct(),
        Message::CrossChain(m) => m.eip712_hash_struct(),
    }
}

/// Computes `keccak256(0x19 0x01 ‖ domainSeparator ‖ structHash)`.
pub fn final_digest(domain_separator: &B256, struct_hash: &B256) -> B256 {
    let mut encoded = [0u8; 2 + 32 + 32];
    encoded[0] = 0x19;
    encoded[1] = 0x01;
    encoded[2..34].copy_from_slice(domain_separator.as_slice());
    encoded[34..].copy_from_slice(struct_hash.as_slice());
    keccak256(encoded)
}

/// A wire field that could not be turned into its typed value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("{field}: expected a decimal unsigned integer, got {value:?}")]
    NotDecimal { field: &'static str, value: String },
    #[error("{field}: {value} does not fit in uint256")]
    Overflow { field: &'static str, value: String },
    #[error("{field}: expected 32 bytes of hex, got {value:?}")]
    InvalidNonce { field: &'static str, value: String },
    #[error("{field}: invalid address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
}

/// Parses a base-10 unsigned integer. Signs, hex prefixes, whitespace and separators are
/// rejected.
pub fn parse_uint(field: &'static str, value: &str) -> Result<U256, FormatError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::NotDecimal {
            field,
            value: value.to_string(),
        });
    }
    U256::from_str_radix(value, 10).map_err(|_| FormatError::Overflow {
        field,
        value: value.to_string(),
    })
}

/// Parses a 32-byte nonce written as hex, with or without the `0x` prefix.
pub fn parse_nonce(field: &'static str, value: &str) -> Result<B256, FormatError> {
    let digits = value.strip_prefix("0x").unwrap_or(value);
    let invalid = || FormatError::InvalidNonce {
        field,
        value: value.to_string(),
    };
    if digits.len() != 64 {
        return Err(invalid());
    }
    let bytes = hex::decode(digits).map_err(|_| invalid())?;
    Ok(B256::from_slice(&bytes))
}

/// Parses a 20-byte address. Mixed-case input is accepted without checksum validation.
pub fn parse_address(field: &'static str, value: &str) -> Result<Address, FormatError> {
    Address::from_str(value).map_err(|_| FormatError::InvalidAddress {
        field,
        value: value.to_string(),
    })
}
