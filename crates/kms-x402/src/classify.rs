//! Coarse classification of opaque RPC / provider failures.
//!
//! Nodes and token contracts report errors as free-form strings. Callers need
//! an actionable category, so these are matched against known fragments and
//! anything unrecognised falls through to [`SettlementFailure::Other`] with the
//! raw message preserved.

use std::fmt;

/// Category of a failed simulation, submission or receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementFailure {
    /// The facilitator account cannot pay for gas.
    InsufficientGasFunds,
    /// The token contract already consumed this authorization nonce.
    NonceAlreadyUsed,
    /// The payer (or, on the attested path, the facilitator) lacks token balance.
    InsufficientTokenBalance,
    /// Unrecognised; carries the raw message.
    Other(String),
}

// Lowercased fragments, checked in order. Gas funds come first because
// "insufficient funds for gas * price + value" would otherwise also match
// the token-balance patterns on some nodes.
const GAS_FUNDS_PATTERNS: &[&str] = &["insufficient funds"];
const NONCE_USED_PATTERNS: &[&str] = &[
    "authorization is used",
    "authorization is used or canceled",
    "nonce already used",
    "authorizationalreadyused",
];
const TOKEN_BALANCE_PATTERNS: &[&str] = &[
    "exceeds balance",
    "insufficient balance",
    "transfer amount exceeds",
];

/// Map a provider error message to a [`SettlementFailure`].
pub fn classify_chain_error(message: &str) -> SettlementFailure {
    let lowered = message.to_ascii_lowercase();
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lowered.contains(p));

    if matches(GAS_FUNDS_PATTERNS) {
        SettlementFailure::InsufficientGasFunds
    } else if matches(NONCE_USED_PATTERNS) {
        SettlementFailure::NonceAlreadyUsed
    } else if matches(TOKEN_BALANCE_PATTERNS) {
        SettlementFailure::InsufficientTokenBalance
    } else {
        SettlementFailure::Other(message.to_string())
    }
}

impl SettlementFailure {
    /// The reason string reported to callers.
    pub fn reason(&self) -> &str {
        match self {
            SettlementFailure::InsufficientGasFunds => "Facilitator has insufficient funds for gas",
            SettlementFailure::NonceAlreadyUsed => "Authorization nonce already used",
            SettlementFailure::InsufficientTokenBalance => "Insufficient token balance",
            SettlementFailure::Other(raw) => raw,
        }
    }
}

impl fmt::Display for SettlementFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_shortfall_is_recognised() {
        let msg = "server returned an error response: error code -32000: insufficient funds for gas * price + value";
        assert_eq!(classify_chain_error(msg), SettlementFailure::InsufficientGasFunds);
    }

    #[test]
    fn usdc_used_nonce_revert_is_recognised() {
        let msg = "execution reverted: FiatTokenV2: authorization is used or canceled";
        assert_eq!(classify_chain_error(msg), SettlementFailure::NonceAlreadyUsed);
        assert_eq!(
            classify_chain_error(msg).reason(),
            "Authorization nonce already used"
        );
    }

    #[test]
    fn token_balance_revert_is_recognised() {
        for msg in [
            "execution reverted: ERC20: transfer amount exceeds balance",
            "Insufficient balance",
        ] {
            assert_eq!(
                classify_chain_error(msg),
                SettlementFailure::InsufficientTokenBalance
            );
        }
    }

    #[test]
    fn unknown_errors_keep_the_raw_message() {
        let msg = "execution reverted: FiatTokenV2: invalid signature";
        let failure = classify_chain_error(msg);
        assert_eq!(failure, SettlementFailure::Other(msg.to_string()));
        assert_eq!(failure.reason(), msg);
    }
}
