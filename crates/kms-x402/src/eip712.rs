//! EIP-712 typed data for EIP-3009 `TransferWithAuthorization`.
//!
//! Provides functions for:
//! - Building the token contract's domain ([`authorization_domain`])
//! - Computing signing hashes ([`signing_hash`])
//! - Recovering the signer with EIP-2 malleability protection ([`recover_digest_signer`])
//! - Generating random nonces ([`random_nonce`])
//! - Encoding signatures to hex ([`encode_signature_hex`])

use std::borrow::Cow;

use alloy::primitives::{Address, FixedBytes, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};

use crate::codec::Curve;
use crate::{TransferWithAuthorization, X402Error};

/// The parts of a token's EIP-712 domain that live in the contract itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDomain {
    pub name: String,
    pub version: String,
}

/// Build the EIP-712 domain a token contract checks `transferWithAuthorization` against.
pub fn authorization_domain(domain: &TokenDomain, chain_id: u64, token: Address) -> Eip712Domain {
    Eip712Domain {
        name: Some(Cow::Owned(domain.name.clone())),
        version: Some(Cow::Owned(domain.version.clone())),
        chain_id: Some(U256::from(chain_id)),
        verifying_contract: Some(token),
        salt: None,
    }
}

/// Compute the EIP-712 signing hash of an authorization.
pub fn signing_hash(auth: &TransferWithAuthorization, domain: &Eip712Domain) -> B256 {
    auth.eip712_signing_hash(domain)
}

/// Recover the address that signed an EIP-712 digest.
/// Rejects high-s signatures to prevent malleability (EIP-2).
pub fn recover_digest_signer(hash: &B256, signature_bytes: &[u8]) -> Result<Address, X402Error> {
    parse_signature(signature_bytes)?
        .recover_address_from_prehash(hash)
        .map_err(|e| X402Error::SignatureError(format!("recovery failed: {e}")))
}

/// Parse a 65-byte `r ‖ s ‖ v` signature, rejecting high-s values.
pub fn parse_signature(signature_bytes: &[u8]) -> Result<Signature, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::SignatureError(format!(
            "signature must be 65 bytes, got {}",
            signature_bytes.len()
        )));
    }

    // from_raw accepts v in {0, 1, 27, 28} and normalizes it to a parity bit.
    let sig = Signature::from_raw(signature_bytes)
        .map_err(|e| X402Error::SignatureError(format!("invalid signature: {e}")))?;

    if sig.s() > Curve::Secp256k1.half_order() {
        return Err(X402Error::SignatureError(
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }
    Ok(sig)
}

/// Generate a random 32-byte nonce (keccak256 of 32 random bytes).
pub fn random_nonce() -> FixedBytes<32> {
    use alloy::primitives::keccak256;
    let mut bytes = [0u8; 32];
    rand::fill(&mut bytes);
    keccak256(bytes)
}

/// Encode a Signature to a hex string with 0x prefix (65 bytes -> 0x + 130 hex).
/// Uses Electrum notation: v = 27 or 28 in the last byte.
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn usdc_domain() -> TokenDomain {
        TokenDomain {
            name: "USDC".to_string(),
            version: "2".to_string(),
        }
    }

    fn authorization(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(1_000_000u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(u64::MAX),
            nonce: FixedBytes::repeat_byte(0x33),
        }
    }

    #[test]
    fn sign_and_recover_roundtrip() {
        let signer = PrivateKeySigner::random();
        let token = Address::repeat_byte(0x44);
        let domain = authorization_domain(&usdc_domain(), 84532, token);
        let auth = authorization(signer.address());

        let sig = signer
            .sign_hash_sync(&signing_hash(&auth, &domain))
            .unwrap();
        let bytes = alloy::hex::decode(encode_signature_hex(&sig)).unwrap();

        let recovered = recover_digest_signer(&signing_hash(&auth, &domain), &bytes).unwrap();
        assert_eq!(recovered, signer.address());
    }

    #[test]
    fn other_chain_id_recovers_someone_else() {
        let signer = PrivateKeySigner::random();
        let token = Address::repeat_byte(0x44);
        let auth = authorization(signer.address());
        let signed_for = authorization_domain(&usdc_domain(), 1, token);
        let checked_on = authorization_domain(&usdc_domain(), 84532, token);

        let sig = signer
            .sign_hash_sync(&signing_hash(&auth, &signed_for))
            .unwrap();
        let recovered =
            recover_digest_signer(&signing_hash(&auth, &checked_on), &sig.as_bytes()).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn high_s_signature_is_rejected() {
        let signer = PrivateKeySigner::random();
        let sig = signer.sign_hash_sync(&B256::repeat_byte(0x01)).unwrap();
        let flipped = Signature::new(
            sig.r(),
            Curve::Secp256k1.order() - sig.s(),
            !sig.v(),
        );
        assert!(matches!(
            parse_signature(&flipped.as_bytes()),
            Err(X402Error::SignatureError(_))
        ));
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(parse_signature(&[0u8; 64]).is_err());
    }

    #[test]
    fn random_nonce_is_unique() {
        assert_ne!(random_nonce(), random_nonce());
    }
}
