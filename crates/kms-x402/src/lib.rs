//! Gasless EIP-3009 settlement with local or Cloud KMS signers.
//!
//! A facilitator receives an off-chain `transferWithAuthorization` signed by a
//! payer, checks it against the payment requirement and the token contract, and
//! submits it on-chain while paying gas from its own account.
//!
//! # Pieces
//!
//! - [`codec`]: KMS DER signatures to fixed-width `(r, s)` with low-s form
//! - [`signer`]: [`Signer`] over a local key, KMS secp256k1, or KMS P-256
//! - [`verifier`]: the ordered authorization checks behind `verify`
//! - [`settlement`]: simulate, submit, confirm and classify behind `settle`
//! - [`balance`]: native-balance sufficiency of the facilitator account
//! - [`Eip3009Facilitator`]: ties them together per network
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use alloy::providers::ProviderBuilder;
//! use x402::{AlloyChain, Eip3009Facilitator, FacilitatorSettings, Network, Signer, SignerConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), x402::X402Error> {
//! let signer = Arc::new(Signer::from_config(SignerConfig::from_env()?)?);
//! let wallet = signer.ethereum_wallet().await?;
//! let address = x402::HashSigner::address(signer.as_ref()).await?;
//!
//! let provider = ProviderBuilder::new()
//!     .wallet(wallet)
//!     .connect_http("https://sepolia.base.org".parse().unwrap());
//! let settings = FacilitatorSettings::default();
//! let chain = AlloyChain::new(provider, address, Network::BaseSepolia.chain_id(), settings.send_timeout);
//!
//! let facilitator = Eip3009Facilitator::new(signer, settings).with_chain(Network::BaseSepolia, chain);
//! # Ok(())
//! # }
//! ```

// Core types
pub mod constants;
pub mod error;
pub mod payment;
pub mod response;
pub mod scheme;

// Signing
pub mod attestation;
pub mod codec;
pub mod eip712;
pub mod signer;

// Chain access and the facilitator pipeline
pub mod balance;
pub mod chain;
pub mod classify;
pub mod config;
pub mod nonce_store;
pub mod scheme_facilitator;
pub mod settlement;
pub mod verifier;

use alloy::sol;

// EIP-3009 authorization as signed by the payer.
// The sol! macro derives SolStruct which provides eip712_signing_hash().
sol! {
    #[derive(Debug, PartialEq, Eq)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
}

// The subset of an EIP-3009 token (USDC, EURC) the facilitator talks to.
sol! {
    #[sol(rpc)]
    interface IEIP3009 {
        function name() external view returns (string);
        function version() external view returns (string);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;
        function transfer(address to, uint256 value) external returns (bool);
    }
}

// Re-exports
pub use constants::*;
pub use error::{CodecError, X402Error};
pub use payment::*;
pub use response::*;
pub use scheme::*;

pub use chain::{rpc_client, AlloyChain, ReceiptStatus, SettlementCall, TokenChain};
pub use classify::{classify_chain_error, SettlementFailure};
pub use config::{FacilitatorSettings, SignerConfig};
pub use scheme_facilitator::Eip3009Facilitator;
pub use signer::{HashSignature, HashSigner, Signer, SignerKind};
