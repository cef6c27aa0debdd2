use std::fmt;

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;

use super::{HashSignature, HashSigner};
use crate::X402Error;

/// Signs with a private key held in process memory.
///
/// `Debug` shows only the address.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }

    /// Parse a hex private key (`0x` prefix optional).
    pub fn from_hex(key: &str) -> Result<Self, X402Error> {
        key.trim()
            .parse::<PrivateKeySigner>()
            .map(Self::new)
            .map_err(|_| X402Error::ConfigError("invalid private key".to_string()))
    }

    /// The underlying alloy signer, for transaction signing.
    pub fn wallet_signer(&self) -> &PrivateKeySigner {
        &self.inner
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.inner.address())
            .finish_non_exhaustive()
    }
}

impl HashSigner for LocalSigner {
    async fn address(&self) -> Result<Address, X402Error> {
        Ok(self.inner.address())
    }

    async fn sign_hash(&self, hash: &B256) -> Result<HashSignature, X402Error> {
        self.inner
            .sign_hash_sync(hash)
            .map(HashSignature::Ecdsa)
            .map_err(|e| X402Error::SignerError(format!("local signing failed: {e}")))
    }
}
