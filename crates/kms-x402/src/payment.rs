use alloy::primitives::{Address, FixedBytes, U256};
use serde::{Deserialize, Serialize};

use crate::constants::Network;
use crate::{TransferWithAuthorization, X402Error};

/// The EIP-3009 authorization a payer signs off-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: Address,
    pub to: Address,
    /// Amount in the token's smallest unit, as a decimal string.
    pub value: String,
    pub valid_after: u64,
    pub valid_before: u64,
    pub nonce: FixedBytes<32>,
}

impl Authorization {
    pub fn value(&self) -> Result<U256, X402Error> {
        self.value
            .parse::<U256>()
            .map_err(|e| X402Error::InvalidPayment(format!("invalid value: {e}")))
    }

    /// The typed-data struct this authorization is signed as.
    pub fn to_typed(&self) -> Result<TransferWithAuthorization, X402Error> {
        Ok(TransferWithAuthorization {
            from: self.from,
            to: self.to,
            value: self.value()?,
            validAfter: U256::from(self.valid_after),
            validBefore: U256::from(self.valid_before),
            nonce: self.nonce,
        })
    }
}

/// What the resource server requires to be paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirement {
    pub scheme: String,
    pub network: Network,
    /// Token symbol, resolved per network via [`crate::token_address`].
    pub token: String,
    pub amount: String,
    pub recipient: Address,
    pub payment_id: String,
    /// Unix timestamp after which the requirement can no longer be paid.
    pub expires_at: u64,
}

/// How the payload's signature is meant to be checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureScheme {
    /// secp256k1 EIP-712 signature the token contract verifies itself.
    #[default]
    Eip712,
    /// P-256 signature over the EIP-712 digest. The token contract cannot check
    /// it; settlement falls back to a facilitator-funded transfer.
    AttestedP256,
}

/// An authorization plus its signature and the requirement it satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedPayload {
    pub authorization: Authorization,
    /// Hex-encoded signature, `0x` prefix optional.
    pub signature: String,
    pub requirement: PaymentRequirement,
    pub payer: Address,
    #[serde(default)]
    pub signature_scheme: SignatureScheme,
}

impl SignedPayload {
    pub fn signature_bytes(&self) -> Result<Vec<u8>, X402Error> {
        alloy::hex::decode(
            self.signature
                .strip_prefix("0x")
                .unwrap_or(&self.signature),
        )
        .map_err(|e| X402Error::SignatureError(format!("invalid hex signature: {e}")))
    }
}
