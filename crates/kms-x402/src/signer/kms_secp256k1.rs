use std::fmt;
use std::sync::Arc;

use alloy::primitives::{Address, Signature, B256};
use k256::ecdsa::VerifyingKey;
use k256::pkcs8::DecodePublicKey;
use tokio::sync::OnceCell;

use super::kms::{KmsBackend, KmsKeyName};
use super::{HashSignature, HashSigner};
use crate::codec::{decode_kms_signature, Curve, RawSignature};
use crate::X402Error;

pub(crate) const SECP256K1_ALGORITHM: &str = "EC_SIGN_SECP256K1_SHA256";

/// Signs on secp256k1 with a key held in Cloud KMS.
///
/// KMS returns bare `(r, s)`; the recovery parity is found by trial against
/// the key's public half, fetched once and cached for the process lifetime.
pub struct KmsSecp256k1Signer {
    key: KmsKeyName,
    backend: Arc<dyn KmsBackend>,
    identity: OnceCell<Identity>,
}

struct Identity {
    verifying_key: VerifyingKey,
    address: Address,
}

impl KmsSecp256k1Signer {
    pub fn new(key: KmsKeyName, backend: Arc<dyn KmsBackend>) -> Self {
        Self {
            key,
            backend,
            identity: OnceCell::new(),
        }
    }

    pub fn key_name(&self) -> &KmsKeyName {
        &self.key
    }

    async fn identity(&self) -> Result<&Identity, X402Error> {
        self.identity
            .get_or_try_init(|| async {
                let public = self.backend.public_key(&self.key).await?;
                if public.algorithm != SECP256K1_ALGORITHM {
                    return Err(X402Error::KmsError(format!(
                        "key {} has algorithm {}, expected {SECP256K1_ALGORITHM}",
                        self.key, public.algorithm
                    )));
                }
                let verifying_key = VerifyingKey::from_public_key_pem(&public.pem)
                    .map_err(|e| X402Error::KmsError(format!("invalid secp256k1 public key: {e}")))?;
                let point = verifying_key.to_encoded_point(false);
                let address = Address::from_raw_public_key(&point.as_bytes()[1..]);
                tracing::info!(key = %self.key, %address, "loaded KMS secp256k1 identity");
                Ok(Identity {
                    verifying_key,
                    address,
                })
            })
            .await
    }
}

/// Attach the recovery parity to a canonical `(r, s)`.
///
/// Exactly one parity recovers `expected` for a valid signature; if neither
/// does, the signature or the key is wrong and this fails.
pub fn resolve_parity(
    hash: &B256,
    raw: &RawSignature,
    expected: &VerifyingKey,
) -> Result<Signature, X402Error> {
    for parity in [false, true] {
        let candidate = Signature::new(raw.r_u256(), raw.s_u256(), parity);
        match candidate.recover_from_prehash(hash) {
            Ok(recovered) if &recovered == expected => return Ok(candidate),
            _ => continue,
        }
    }
    Err(X402Error::SignerError(
        "KMS signature does not recover to the key's public key under either parity".to_string(),
    ))
}

impl fmt::Debug for KmsSecp256k1Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KmsSecp256k1Signer")
            .field("key", &self.key.resource_name())
            .field("address", &self.identity.get().map(|id| id.address))
            .finish()
    }
}

impl HashSigner for KmsSecp256k1Signer {
    async fn address(&self) -> Result<Address, X402Error> {
        Ok(self.identity().await?.address)
    }

    async fn sign_hash(&self, hash: &B256) -> Result<HashSignature, X402Error> {
        let identity = self.identity().await?;
        let der = self.backend.sign_digest(&self.key, hash).await?;
        let raw = decode_kms_signature(Curve::Secp256k1, &der)?;
        let signature = resolve_parity(hash, &raw, &identity.verifying_key).inspect_err(|e| {
            tracing::error!(key = %self.key, error = %e, "KMS parity resolution failed");
        })?;
        Ok(HashSignature::Ecdsa(signature))
    }
}
