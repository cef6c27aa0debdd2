//! In-process stand-in for Cloud KMS, emitting DER like the real service.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use async_trait::async_trait;
use k256::ecdsa::signature::hazmat::PrehashSigner;

use super::kms::{KmsBackend, KmsKeyName, KmsPublicKey};
use super::kms_p256::P256_ALGORITHM;
use super::kms_secp256k1::SECP256K1_ALGORITHM;
use crate::codec::tests::encode_der;
use crate::codec::Curve;
use crate::X402Error;

enum Key {
    Secp256k1(k256::ecdsa::SigningKey),
    P256(p256::ecdsa::SigningKey),
}

pub(crate) struct FakeKms {
    key: Key,
    high_s: bool,
    wrong_digest: bool,
    public_key_calls: AtomicUsize,
}

impl FakeKms {
    pub(crate) fn secp256k1() -> Self {
        Self::with_key(Key::Secp256k1(
            k256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap(),
        ))
    }

    pub(crate) fn p256() -> Self {
        Self::with_key(Key::P256(
            p256::ecdsa::SigningKey::from_slice(&[0x11; 32]).unwrap(),
        ))
    }

    fn with_key(key: Key) -> Self {
        Self {
            key,
            high_s: false,
            wrong_digest: false,
            public_key_calls: AtomicUsize::new(0),
        }
    }

    /// Emit `n - s` instead of the low-s value.
    pub(crate) fn with_high_s(mut self) -> Self {
        self.high_s = true;
        self
    }

    /// Sign a digest other than the one requested.
    pub(crate) fn signing_wrong_digest(mut self) -> Self {
        self.wrong_digest = true;
        self
    }

    pub(crate) fn key_name() -> KmsKeyName {
        KmsKeyName {
            project: "test".into(),
            location: "global".into(),
            key_ring: "ring".into(),
            key: "key".into(),
            version: "1".into(),
        }
    }

    pub(crate) fn public_key_calls(&self) -> usize {
        self.public_key_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn k256_verifying_key(&self) -> k256::ecdsa::VerifyingKey {
        match &self.key {
            Key::Secp256k1(key) => key.verifying_key().clone(),
            Key::P256(_) => panic!("not a secp256k1 key"),
        }
    }

    pub(crate) fn p256_verifying_key(&self) -> p256::ecdsa::VerifyingKey {
        match &self.key {
            Key::P256(key) => key.verifying_key().clone(),
            Key::Secp256k1(_) => panic!("not a P-256 key"),
        }
    }

    /// Ethereum address of the secp256k1 key.
    pub(crate) fn address(&self) -> Address {
        let point = self.k256_verifying_key().to_encoded_point(false);
        Address::from_raw_public_key(&point.as_bytes()[1..])
    }

    pub(crate) fn sign_der(&self, digest: &B256) -> Vec<u8> {
        let digest = if self.wrong_digest {
            alloy::primitives::keccak256(digest)
        } else {
            *digest
        };
        let (curve, bytes) = match &self.key {
            Key::Secp256k1(key) => {
                let sig: k256::ecdsa::Signature = key.sign_prehash(digest.as_slice()).unwrap();
                (Curve::Secp256k1, sig.to_bytes().to_vec())
            }
            Key::P256(key) => {
                let sig: p256::ecdsa::Signature = key.sign_prehash(digest.as_slice()).unwrap();
                (Curve::P256, sig.to_bytes().to_vec())
            }
        };
        let r: [u8; 32] = bytes[..32].try_into().unwrap();
        let mut s = U256::from_be_slice(&bytes[32..]);
        if self.high_s && s <= curve.half_order() {
            s = curve.order() - s;
        }
        encode_der(&r, &s.to_be_bytes::<32>())
    }
}

#[async_trait]
impl KmsBackend for FakeKms {
    async fn public_key(&self, _key: &KmsKeyName) -> Result<KmsPublicKey, X402Error> {
        use k256::pkcs8::{EncodePublicKey, LineEnding};

        self.public_key_calls.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up behind the once-cell.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let (pem, algorithm) = match &self.key {
            Key::Secp256k1(key) => (
                key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap(),
                SECP256K1_ALGORITHM,
            ),
            Key::P256(key) => (
                key.verifying_key().to_public_key_pem(LineEnding::LF).unwrap(),
                P256_ALGORITHM,
            ),
        };
        Ok(KmsPublicKey {
            pem,
            algorithm: algorithm.to_string(),
        })
    }

    async fn sign_digest(&self, _key: &KmsKeyName, digest: &B256) -> Result<Vec<u8>, X402Error> {
        Ok(self.sign_der(digest))
    }
}
