use thiserror::Error;

/// Errors returned by x402 operations.
///
/// Verification and settlement never surface these to callers directly; they
/// are folded into [`VerifyResponse`](crate::VerifyResponse) and
/// [`SettleResponse`](crate::SettleResponse) at that boundary.
#[derive(Debug, Error)]
pub enum X402Error {
    #[error("signature error: {0}")]
    SignatureError(String),

    #[error("signer error: {0}")]
    SignerError(String),

    #[error("kms error: {0}")]
    KmsError(String),

    #[error("codec error: {0}")]
    CodecError(#[from] CodecError),

    #[error("chain error: {0}")]
    ChainError(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// Failures decoding a KMS DER signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Malformed or non-canonical DER, or a component outside `[1, n)`.
    #[error("invalid DER signature: {0}")]
    InvalidDer(String),
}
