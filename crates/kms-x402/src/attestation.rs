//! Off-chain check of P-256 attestations over an authorization digest.
//!
//! Token contracts cannot verify P-256, so on the attested path this check
//! stands in for the contract's own signature check. Passing it means only
//! that the configured attestation key signed the digest.

use alloy::primitives::{B256, U256};
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::codec::Curve;
use crate::X402Error;

/// Verifies 64-byte `r ‖ s` P-256 signatures against one trusted key.
#[derive(Debug, Clone)]
pub struct AttestationVerifier {
    key: VerifyingKey,
}

impl AttestationVerifier {
    pub fn new(key: VerifyingKey) -> Self {
        Self { key }
    }

    /// Accepts compressed (33-byte) or uncompressed (65-byte) SEC1 points.
    pub fn from_sec1(bytes: &[u8]) -> Result<Self, X402Error> {
        VerifyingKey::from_sec1_bytes(bytes)
            .map(Self::new)
            .map_err(|e| X402Error::ConfigError(format!("invalid attestation public key: {e}")))
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Check that `signature` is a canonical (low-s) P-256 signature over `digest`.
    pub fn verify(&self, digest: &B256, signature: &[u8]) -> Result<(), X402Error> {
        if signature.len() != 64 {
            return Err(X402Error::SignatureError(format!(
                "attestation must be 64 bytes, got {}",
                signature.len()
            )));
        }
        if U256::from_be_slice(&signature[32..]) > Curve::P256.half_order() {
            return Err(X402Error::SignatureError(
                "high-s attestation rejected".to_string(),
            ));
        }
        let signature = Signature::from_slice(signature)
            .map_err(|e| X402Error::SignatureError(format!("invalid attestation: {e}")))?;
        self.key
            .verify_prehash(digest.as_slice(), &signature)
            .map_err(|_| X402Error::SignatureError("attestation does not verify".to_string()))
    }
}
