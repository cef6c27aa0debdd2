//! Conversion of KMS DER-encoded ECDSA signatures into fixed-width `(r, s)`.
//!
//! Cloud KMS returns signatures as an ASN.1 `SEQUENCE { INTEGER r, INTEGER s }`.
//! Decoding goes through the RustCrypto curve crates, which accept only
//! canonical DER: minimal lengths, no sign byte unless the high bit is set,
//! no trailing data, and both components in `[1, n)`. Chain verifiers want
//! two 32-byte big-endian words with `s` in the lower half of the curve order.

use alloy::primitives::{B256, U256};

use crate::error::CodecError;

/// Curves the facilitator's signers produce signatures on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Curve {
    /// The EVM transaction curve.
    Secp256k1,
    /// NIST P-256 (secp256r1). EIP-3009 tokens cannot verify it.
    P256,
}

impl Curve {
    /// Group order `n`.
    pub const fn order(&self) -> U256 {
        match self {
            Curve::Secp256k1 => U256::from_limbs([
                0xBFD2_5E8C_D036_4141,
                0xBAAE_DCE6_AF48_A03B,
                0xFFFF_FFFF_FFFF_FFFE,
                0xFFFF_FFFF_FFFF_FFFF,
            ]),
            Curve::P256 => U256::from_limbs([
                0xF3B9_CAC2_FC63_2551,
                0xBCE6_FAAD_A717_9E84,
                0xFFFF_FFFF_FFFF_FFFF,
                0xFFFF_FFFF_0000_0000,
            ]),
        }
    }

    /// `n / 2`, the largest canonical `s`.
    pub fn half_order(&self) -> U256 {
        self.order() >> 1usize
    }
}

/// A signature as two 32-byte big-endian words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignature {
    pub r: B256,
    pub s: B256,
}

impl RawSignature {
    fn from_fixed(bytes: &[u8]) -> Self {
        Self {
            r: B256::from_slice(&bytes[..32]),
            s: B256::from_slice(&bytes[32..]),
        }
    }

    pub fn r_u256(&self) -> U256 {
        U256::from_be_bytes(self.r.0)
    }

    pub fn s_u256(&self) -> U256 {
        U256::from_be_bytes(self.s.0)
    }

    /// `r ‖ s`.
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(self.r.as_slice());
        out[32..].copy_from_slice(self.s.as_slice());
        out
    }
}

/// Decode a KMS signature and bring it into canonical low-s form for `curve`.
pub fn decode_kms_signature(curve: Curve, der: &[u8]) -> Result<RawSignature, CodecError> {
    match curve {
        Curve::Secp256k1 => {
            let sig = k256::ecdsa::Signature::from_der(der)
                .map_err(|e| CodecError::InvalidDer(e.to_string()))?;
            let sig = sig.normalize_s().unwrap_or(sig);
            Ok(RawSignature::from_fixed(&sig.to_bytes()))
        }
        Curve::P256 => {
            let sig = p256::ecdsa::Signature::from_der(der)
                .map_err(|e| CodecError::InvalidDer(e.to_string()))?;
            let sig = sig.normalize_s().unwrap_or(sig);
            Ok(RawSignature::from_fixed(&sig.to_bytes()))
        }
    }
}
