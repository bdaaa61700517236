//! 65-byte ECDSA signatures over EIP-712 digests.
//!
//! Wallets emit `r ‖ s ‖ v` with `v` either as a recovery id (`0`/`1`) or in the legacy
//! Ethereum form (`27`/`28`). Both are accepted; `v` is normalized before recovery and
//! re-encoded as `27`/`28` when handed to a token contract.

use alloy_primitives::{Address, B256, Signature};
use std::fmt::{Display, Formatter};

pub const SIGNATURE_LENGTH: usize = 65;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Recovered address {recovered} differs from claimed {claimed}")]
    IdentityMismatch { recovered: Address, claimed: String },
}

/// Raw signature bytes, validated to be exactly [`SIGNATURE_LENGTH`] long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature([u8; SIGNATURE_LENGTH]);

impl RawSignature {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SignatureError> {
        let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|_| {
            SignatureError::InvalidSignature(format!(
                "expected {SIGNATURE_LENGTH} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Parses `0x`-prefixed (or bare) hex.
    pub fn from_hex(value: &str) -> Result<Self, SignatureError> {
        let digits = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(digits)
            .map_err(|e| SignatureError::InvalidSignature(format!("bad hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.0
    }

    /// Canonical recovery id: `v - 27` when `v >= 27`, otherwise `v` as is.
    pub fn recovery_id(&self) -> u8 {
        normalize_v(self.0[64])
    }

    pub fn recover(&self, digest: &B256) -> Result<Address, SignatureError> {
        recover(digest, &self.0)
    }

    /// Splits into `(v, r, s)` with `v` in the `27`/`28` form token contracts expect.
    pub fn to_vrs(&self) -> (u8, B256, B256) {
        let r = B256::from_slice(&self.0[0..32]);
        let s = B256::from_slice(&self.0[32..64]);
        (self.recovery_id() + 27, r, s)
    }
}

impl Display for RawSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

fn normalize_v(v: u8) -> u8 {
    if v >= 27 { v - 27 } else { v }
}

/// Recovers the address that signed `digest`.
///
/// Fails with [`SignatureError::InvalidSignature`] when the input is not 65 bytes, when the
/// normalized recovery id is not `0` or `1`, or when the curve arithmetic rejects `(r, s)`.
pub fn recover(digest: &B256, signature: &[u8]) -> Result<Address, SignatureError> {
    let mut bytes = RawSignature::from_slice(signature)?.0;
    bytes[64] = normalize_v(bytes[64]);
    if bytes[64] > 1 {
        return Err(SignatureError::InvalidSignature(format!(
            "recovery id must be 0 or 1, got {}",
            bytes[64]
        )));
    }
    let signature = Signature::from_raw(&bytes)
        .map_err(|e| SignatureError::InvalidSignature(e.to_string()))?;
    signature
        .recover_address_from_prehash(digest)
        .map_err(|e| SignatureError::InvalidSignature(e.to_string()))
}

pub(crate) fn strip_hex_prefix(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Compares a recovered address with a claimed one, ignoring hex letter case and an optional
/// `0x` prefix.
pub fn verify_identity(recovered: Address, claimed: &str) -> Result<(), SignatureError> {
    let recovered_hex = recovered.to_string();
    if strip_hex_prefix(&recovered_hex).eq_ignore_ascii_case(strip_hex_prefix(claimed)) {
        Ok(())
    } else {
        Err(SignatureError::IdentityMismatch {
            recovered,
            claimed: claimed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::keccak256;
    use alloy_signer::SignerSync;
    use alloy_signer_local::PrivateKeySigner;

    fn signed(digest: &B256) -> (PrivateKeySigner, [u8; 65]) {
        let signer = PrivateKeySigner::random();
        let signature = signer.sign_hash_sync(digest).unwrap();
        (signer, signature.as_bytes())
    }

    #[test]
    fn recovers_signer() {
        let digest = keccak256("payment");
        let (signer, bytes) = signed(&digest);
        assert_eq!(recover(&digest, &bytes).unwrap(), signer.address());
    }

    #[test]
    fn v_27_and_v_0_are_equivalent() {
        let digest = keccak256("payment");
        let (signer, mut bytes) = signed(&digest);
        assert!(bytes[64] == 27 || bytes[64] == 28);
        let legacy = recover(&digest, &bytes).unwrap();
        bytes[64] -= 27;
        let canonical = recover(&digest, &bytes).unwrap();
        assert_eq!(legacy, canonical);
        assert_eq!(canonical, signer.address());
    }

    #[test]
    fn wrong_length_is_invalid() {
        let digest = keccak256("payment");
        for len in [0usize, 1, 64, 66, 130] {
            let bytes = vec![1u8; len];
            assert!(matches!(
                recover(&digest, &bytes),
                Err(SignatureError::InvalidSignature(_))
            ));
        }
    }

    #[test]
    fn out_of_range_v_is_invalid() {
        let digest = keccak256("payment");
        let (_, mut bytes) = signed(&digest);
        bytes[64] = 30;
        assert!(recover(&digest, &bytes).is_err());
        bytes[64] = 2;
        assert!(recover(&digest, &bytes).is_err());
    }

    #[test]
    fn zero_signature_does_not_panic() {
        let digest = keccak256("payment");
        assert!(recover(&digest, &[0u8; 65]).is_err());
    }

    #[test]
    fn different_digest_recovers_someone_else() {
        let digest = keccak256("payment");
        let (signer, bytes) = signed(&digest);
        let other = keccak256("another payment");
        let recovered = recover(&other, &bytes).unwrap_or(Address::ZERO);
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn identity_is_case_insensitive() {
        let digest = keccak256("payment");
        let (signer, bytes) = signed(&digest);
        let recovered = recover(&digest, &bytes).unwrap();
        let lower = signer.address().to_string().to_lowercase();
        let upper = format!("0x{}", signer.address().to_string()[2..].to_uppercase());
        assert!(verify_identity(recovered, &lower).is_ok());
        assert!(verify_identity(recovered, &upper).is_ok());
        let err = verify_identity(recovered, "0x0000000000000000000000000000000000000001").unwrap_err();
        assert!(matches!(err, SignatureError::IdentityMismatch { .. }));
    }

    #[test]
    fn identity_ignores_hex_prefix() {
        let digest = keccak256("payment");
        let (signer, bytes) = signed(&digest);
        let recovered = recover(&digest, &bytes).unwrap();
        let address = signer.address().to_string();
        assert!(verify_identity(recovered, &address[2..]).is_ok());
        assert!(verify_identity(recovered, &address[2..].to_uppercase()).is_ok());
        assert!(verify_identity(recovered, &format!("0X{}", &address[2..])).is_ok());
        assert!(verify_identity(recovered, "0000000000000000000000000000000000000001").is_err());
    }

    #[test]
    fn hex_parsing_and_vrs() {
        let digest = keccak256("payment");
        let (_, bytes) = signed(&digest);
        let encoded = format!("0x{}", hex::encode(bytes));
        let raw = RawSignature::from_hex(&encoded).unwrap();
        assert_eq!(raw.to_string(), encoded);
        let (v, r, s) = raw.to_vrs();
        assert!(v == 27 || v == 28);
        assert_eq!(r.as_slice(), &bytes[0..32]);
        assert_eq!(s.as_slice(), &bytes[32..64]);
        assert!(RawSignature::from_hex("0xzz").is_err());
        assert!(RawSignature::from_hex("0x00").is_err());
    }
}
