use std::fmt;
use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256};
use alloy::signers::local::PrivateKeySigner;
use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::VerifyingKey;
use p256::pkcs8::DecodePublicKey;
use tokio::sync::OnceCell;

use super::kms::{KmsBackend, KmsKeyName};
use super::{HashSignature, HashSigner};
use crate::codec::{decode_kms_signature, Curve};
use crate::X402Error;

pub(crate) const P256_ALGORITHM: &str = "EC_SIGN_P256_SHA256";

/// Signs on P-256 with a key held in Cloud KMS.
///
/// EIP-3009 tokens cannot verify these signatures. They are only useful to an
/// off-chain attestation check (see [`crate::attestation`]). Transactions are
/// paid from the optional spender account; without one this signer has no
/// spendable address and [`address`](HashSigner::address) returns a
/// keccak-derived identifier for display only.
pub struct KmsP256Signer {
    key: KmsKeyName,
    backend: Arc<dyn KmsBackend>,
    spender: Option<PrivateKeySigner>,
    identity: OnceCell<Identity>,
}

struct Identity {
    verifying_key: VerifyingKey,
    display_address: Address,
}

impl KmsP256Signer {
    pub fn new(key: KmsKeyName, backend: Arc<dyn KmsBackend>) -> Self {
        Self {
            key,
            backend,
            spender: None,
            identity: OnceCell::new(),
        }
    }

    /// Use `spender` as the account that pays gas and funds attested transfers.
    pub fn with_spender(mut self, spender: PrivateKeySigner) -> Self {
        self.spender = Some(spender);
        self
    }

    pub fn spender(&self) -> Option<&PrivateKeySigner> {
        self.spender.as_ref()
    }

    /// Whether [`address`](HashSigner::address) is an account that can send transactions.
    pub fn is_spendable(&self) -> bool {
        self.spender.is_some()
    }

    /// The KMS public key, e.g. to verify attestations this signer produced.
    pub async fn verifying_key(&self) -> Result<VerifyingKey, X402Error> {
        Ok(self.identity().await?.verifying_key.clone())
    }

    async fn identity(&self) -> Result<&Identity, X402Error> {
        self.identity
            .get_or_try_init(|| async {
                let public = self.backend.public_key(&self.key).await?;
                if public.algorithm != P256_ALGORITHM {
                    return Err(X402Error::KmsError(format!(
                        "key {} has algorithm {}, expected {P256_ALGORITHM}",
                        self.key, public.algorithm
                    )));
                }
                let verifying_key = VerifyingKey::from_public_key_pem(&public.pem)
                    .map_err(|e| X402Error::KmsError(format!("invalid P-256 public key: {e}")))?;
                let display_address = display_address(&verifying_key);
                tracing::info!(
                    key = %self.key,
                    display_address = %display_address,
                    spendable = self.spender.is_some(),
                    "loaded KMS P-256 identity"
                );
                Ok(Identity {
                    verifying_key,
                    display_address,
                })
            })
            .await
    }
}

/// Last 20 bytes of keccak256 over the uncompressed point (without the 0x04 tag).
/// Nobody holds a secp256k1 key for this address.
pub fn display_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    Address::from_slice(&keccak256(&point.as_bytes()[1..])[12..])
}

impl fmt::Debug for KmsP256Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsP256Signer")
            .field("key", &self.key.resource_name())
            .field("spender", &self.spender.as_ref().map(|s| s.address()))
            .finish()
    }
}

impl HashSigner for KmsP256Signer {
    async fn address(&self) -> Result<Address, X402Error> {
        if let Some(spender) = &self.spender {
            return Ok(spender.address());
        }
        Ok(self.identity().await?.display_address)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<HashSignature, X402Error> {
        let identity = self.identity().await?;
        let der = self.backend.sign_digest(&self.key, hash).await?;
        let raw = decode_kms_signature(Curve::P256, &der)?;

        // No recovery id to find here, but a key mismatch should still fail loudly.
        let signature = p256::ecdsa::Signature::from_slice(&raw.to_bytes())
            .map_err(|e| X402Error::SignerError(format!("invalid P-256 signature: {e}")))?;
        identity
            .verifying_key
            .verify_prehash(hash.as_slice(), &signature)
            .map_err(|_| {
                tracing::error!(key = %self.key, "KMS P-256 signature does not verify against its public key");
                X402Error::SignerError(
                    "KMS P-256 signature does not verify against the key's public key".to_string(),
                )
            })?;

        Ok(HashSignature::P256(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signer::fake_kms::FakeKms;

    #[tokio::test]
    async fn signatures_are_low_s_and_verify() {
        let kms = Arc::new(FakeKms::p256().with_high_s());
        let signer = KmsP256Signer::new(FakeKms::key_name(), kms.clone());
        let hash = B256::repeat_byte(0x3c);

        let HashSignature::P256(raw) = signer.sign_hash(&hash).await.unwrap() else {
            panic!("expected P-256 signature");
        };
        assert!(raw.s_u256() <= Curve::P256.half_order());

        let sig = p256::ecdsa::Signature::from_slice(&raw.to_bytes()).unwrap();
        kms.p256_verifying_key()
            .verify_prehash(hash.as_slice(), &sig)
            .unwrap();
    }

    #[tokio::test]
    async fn address_without_spender_is_display_only() {
        let kms = Arc::new(FakeKms::p256());
        let signer = KmsP256Signer::new(FakeKms::key_name(), kms.clone());

        assert!(!signer.is_spendable());
        assert_eq!(
            signer.address().await.unwrap(),
            display_address(&kms.p256_verifying_key())
        );
    }

    #[tokio::test]
    async fn spender_account_takes_precedence() {
        let kms = Arc::new(FakeKms::p256());
        let spender = PrivateKeySigner::random();
        let expected = spender.address();
        let signer = KmsP256Signer::new(FakeKms::key_name(), kms.clone()).with_spender(spender);

        assert!(signer.is_spendable());
        assert_eq!(signer.address().await.unwrap(), expected);
        // The spender address needs no KMS round-trip.
        assert_eq!(kms.public_key_calls(), 0);
    }

    #[tokio::test]
    async fn mismatched_signature_fails() {
        let kms = Arc::new(FakeKms::p256().signing_wrong_digest());
        let signer = KmsP256Signer::new(FakeKms::key_name(), kms);
        assert!(matches!(
            signer.sign_hash(&B256::repeat_byte(0x01)).await,
            Err(X402Error::SignerError(_))
        ));
    }

    #[tokio::test]
    async fn secp256k1_key_is_rejected() {
        let kms = Arc::new(FakeKms::secp256k1());
        let signer = KmsP256Signer::new(FakeKms::key_name(), kms);
        assert!(matches!(
            signer.verifying_key().await,
            Err(X402Error::KmsError(_))
        ));
    }
}
