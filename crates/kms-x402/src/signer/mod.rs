//! Signing capability with three custody strategies.
//!
//! - [`LocalSigner`]: private key in process memory
//! - [`KmsSecp256k1Signer`]: Cloud KMS key on the EVM transaction curve
//! - [`KmsP256Signer`]: Cloud KMS key on P-256; attestation only
//!
//! Callers depend on [`HashSigner`]; [`Signer`] dispatches to whichever
//! variant configuration selected.

use std::fmt;
use std::sync::Arc;

use alloy::consensus::SignableTransaction;
use alloy::network::{EthereumWallet, TxSigner};
use alloy::primitives::{Address, Signature, B256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

use crate::codec::{Curve, RawSignature};
use crate::config::SignerConfig;
use crate::X402Error;

pub mod kms;
pub mod kms_p256;
pub mod kms_secp256k1;
pub mod local;
pub mod registry;

#[cfg(test)]
pub(crate) mod fake_kms;

pub use kms::{GcpKmsClient, KmsBackend, KmsKeyName, KmsPublicKey};
pub use kms_p256::KmsP256Signer;
pub use kms_secp256k1::KmsSecp256k1Signer;
pub use local::LocalSigner;

/// Something that can name its account and sign 32-byte digests.
///
/// Both calls may go over the network and may fail.
pub trait HashSigner: Send + Sync {
    fn address(&self) -> impl std::future::Future<Output = Result<Address, X402Error>> + Send;

    fn sign_hash(
        &self,
        hash: &B256,
    ) -> impl std::future::Future<Output = Result<HashSignature, X402Error>> + Send;
}

/// Output of [`HashSigner::sign_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSignature {
    /// secp256k1 with recovery parity, usable on-chain.
    Ecdsa(Signature),
    /// P-256 `(r, s)`, low-s. Only an attestation check can consume it.
    P256(RawSignature),
}

impl HashSignature {
    pub fn curve(&self) -> Curve {
        match self {
            HashSignature::Ecdsa(_) => Curve::Secp256k1,
            HashSignature::P256(_) => Curve::P256,
        }
    }

    /// 65 bytes `r ‖ s ‖ v` (v = 27/28) for ECDSA, 64 bytes `r ‖ s` for P-256.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            HashSignature::Ecdsa(sig) => sig.as_bytes().to_vec(),
            HashSignature::P256(raw) => raw.to_bytes().to_vec(),
        }
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", alloy::hex::encode(self.to_bytes()))
    }
}

/// Which custody strategy a [`Signer`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignerKind {
    PrivateKey,
    GcpKms,
    GcpKmsP256,
}

impl SignerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerKind::PrivateKey => "private-key",
            SignerKind::GcpKms => "gcp-kms",
            SignerKind::GcpKmsP256 => "gcp-kms-p256",
        }
    }
}

impl fmt::Display for SignerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The configured signer.
#[derive(Debug)]
pub enum Signer {
    Local(LocalSigner),
    KmsSecp256k1(Arc<KmsSecp256k1Signer>),
    KmsP256(KmsP256Signer),
}

impl Signer {
    /// Build the signer selected by `config`, talking to Google Cloud KMS for the KMS kinds.
    pub fn from_config(config: SignerConfig) -> Result<Self, X402Error> {
        match config {
            SignerConfig::PrivateKey { key } => Ok(Signer::Local(LocalSigner::from_hex(&key)?)),
            SignerConfig::GcpKms { key, access_token } => {
                let backend = Arc::new(GcpKmsClient::new(access_token)?);
                Ok(Self::kms_secp256k1(key, backend))
            }
            SignerConfig::GcpKmsP256 {
                key,
                access_token,
                spender_key,
            } => {
                let backend = Arc::new(GcpKmsClient::new(access_token)?);
                Self::kms_p256(key, backend, spender_key.as_deref())
            }
        }
    }

    pub fn kms_secp256k1(key: KmsKeyName, backend: Arc<dyn KmsBackend>) -> Self {
        Signer::KmsSecp256k1(Arc::new(KmsSecp256k1Signer::new(key, backend)))
    }

    pub fn kms_p256(
        key: KmsKeyName,
        backend: Arc<dyn KmsBackend>,
        spender_key: Option<&str>,
    ) -> Result<Self, X402Error> {
        let mut signer = KmsP256Signer::new(key, backend);
        if let Some(spender_key) = spender_key {
            let spender = spender_key
                .trim()
                .parse::<PrivateKeySigner>()
                .map_err(|_| X402Error::ConfigError("invalid P-256 spender private key".to_string()))?;
            signer = signer.with_spender(spender);
        }
        Ok(Signer::KmsP256(signer))
    }

    pub fn kind(&self) -> SignerKind {
        match self {
            Signer::Local(_) => SignerKind::PrivateKey,
            Signer::KmsSecp256k1(_) => SignerKind::GcpKms,
            Signer::KmsP256(_) => SignerKind::GcpKmsP256,
        }
    }

    /// Whether [`HashSigner::address`] can send transactions.
    pub fn is_spendable(&self) -> bool {
        match self {
            Signer::Local(_) | Signer::KmsSecp256k1(_) => true,
            Signer::KmsP256(signer) => signer.is_spendable(),
        }
    }

    /// The P-256 KMS public key, when this is a P-256 signer.
    pub async fn p256_verifying_key(&self) -> Result<Option<p256::ecdsa::VerifyingKey>, X402Error> {
        match self {
            Signer::KmsP256(signer) => signer.verifying_key().await.map(Some),
            _ => Ok(None),
        }
    }

    /// Wallet that signs the facilitator's own transactions.
    ///
    /// A P-256 signer without a spender account cannot send transactions.
    pub async fn ethereum_wallet(&self) -> Result<EthereumWallet, X402Error> {
        match self {
            Signer::Local(signer) => Ok(EthereumWallet::from(signer.wallet_signer().clone())),
            Signer::KmsSecp256k1(signer) => {
                let address = signer.address().await?;
                Ok(EthereumWallet::new(KmsTxSigner {
                    inner: Arc::clone(signer),
                    address,
                }))
            }
            Signer::KmsP256(signer) => signer
                .spender()
                .cloned()
                .map(EthereumWallet::from)
                .ok_or_else(|| {
                    X402Error::ConfigError(
                        "gcp-kms-p256 signer has no spender account (set P256_SPENDER_PRIVATE_KEY)"
                            .to_string(),
                    )
                }),
        }
    }
}

impl HashSigner for Signer {
    async fn address(&self) -> Result<Address, X402Error> {
        match self {
            Signer::Local(signer) => signer.address().await,
            Signer::KmsSecp256k1(signer) => signer.address().await,
            Signer::KmsP256(signer) => signer.address().await,
        }
    }

    async fn sign_hash(&self, hash: &B256) -> Result<HashSignature, X402Error> {
        match self {
            Signer::Local(signer) => signer.sign_hash(hash).await,
            Signer::KmsSecp256k1(signer) => signer.sign_hash(hash).await,
            Signer::KmsP256(signer) => signer.sign_hash(hash).await,
        }
    }
}

/// Lets alloy's wallet filler sign transactions through KMS.
struct KmsTxSigner {
    inner: Arc<KmsSecp256k1Signer>,
    address: Address,
}

#[async_trait]
impl TxSigner<Signature> for KmsTxSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_transaction(
        &self,
        tx: &mut dyn SignableTransaction<Signature>,
    ) -> alloy::signers::Result<Signature> {
        let hash = tx.signature_hash();
        match self.inner.sign_hash(&hash).await {
            Ok(HashSignature::Ecdsa(signature)) => Ok(signature),
            Ok(HashSignature::P256(_)) => Err(alloy::signers::Error::other(
                "secp256k1 KMS signer produced a P-256 signature",
            )),
            Err(e) => Err(alloy::signers::Error::other(e)),
        }
    }
}
