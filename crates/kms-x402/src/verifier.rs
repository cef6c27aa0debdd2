//! Authorization checks behind `verify`.
//!
//! Checks run in a fixed order and stop at the first failure, each with its
//! own reason string:
//!
//! 1. the requirement has not expired
//! 2. the token exists on the requirement's network
//! 3. payer, recipient and amount match the requirement exactly
//! 4. now lies inside `[validAfter, validBefore]`
//! 5. the token contract has not seen the nonce
//! 6. the EIP-712 signature recovers the payer under the token's live domain
//!
//! Nothing here writes state, and nothing returns `Err`: every failure,
//! including RPC failures, becomes an invalid [`VerifyResponse`].

use alloy::primitives::{Address, B256, U256};

use crate::attestation::AttestationVerifier;
use crate::chain::TokenChain;
use crate::constants::token_address;
use crate::eip712::{authorization_domain, recover_digest_signer, signing_hash};
use crate::nonce_store::{replay_key, NonceStore};
use crate::{SignedPayload, VerifyResponse};

pub const REQUIREMENT_EXPIRED: &str = "Payment requirement expired";
pub const TOKEN_NOT_SUPPORTED: &str = "Token not supported on network";
pub const PAYER_MISMATCH: &str = "Payer mismatch";
pub const RECIPIENT_MISMATCH: &str = "Recipient mismatch";
pub const AMOUNT_MISMATCH: &str = "Amount mismatch";
pub const NOT_YET_VALID: &str = "Authorization not yet valid";
pub const AUTHORIZATION_EXPIRED: &str = "Authorization expired";
pub const NONCE_ALREADY_USED: &str = "Authorization nonce already used";
pub const NONCE_STATE_UNKNOWN: &str = "Unable to confirm nonce state";
pub const INVALID_SIGNATURE: &str = "Invalid signature";
pub const TOKEN_DOMAIN_UNAVAILABLE: &str = "Unable to read token domain";
pub const ATTESTED_DISABLED: &str = "Attested settlement is disabled";
pub const ATTESTED_WINDOW_TOO_LARGE: &str = "Attested authorization window too large";
pub const INVALID_ATTESTATION: &str = "Invalid attestation";

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Checks 1 through 4. On success returns the token contract address.
pub fn check_terms(payload: &SignedPayload, now: u64) -> Result<Address, VerifyResponse> {
    let auth = &payload.authorization;
    let req = &payload.requirement;
    let reject = |reason: &str| {
        tracing::info!(
            payer = %payload.payer,
            payment_id = %req.payment_id,
            reason,
            "authorization rejected"
        );
        VerifyResponse::invalid(reason, Some(payload.payer))
    };

    // 1. Requirement expiry
    if req.expires_at < now {
        return Err(reject(REQUIREMENT_EXPIRED));
    }

    // 2. Token availability
    let token = token_address(req.network, &req.token);
    if token == Address::ZERO {
        return Err(reject(TOKEN_NOT_SUPPORTED));
    }

    // 3. Field match, no tolerance
    if auth.from != payload.payer {
        return Err(reject(PAYER_MISMATCH));
    }
    if auth.to != req.recipient {
        return Err(reject(RECIPIENT_MISMATCH));
    }
    match (auth.value(), req.amount.parse::<U256>()) {
        (Ok(value), Ok(amount)) if value == amount => {}
        _ => return Err(reject(AMOUNT_MISMATCH)),
    }

    // 4. Validity window
    if now < auth.valid_after {
        return Err(reject(NOT_YET_VALID));
    }
    if now > auth.valid_before {
        return Err(reject(AUTHORIZATION_EXPIRED));
    }

    Ok(token)
}

/// EIP-712 digest of the payload's authorization under the token's live domain.
pub async fn authorization_digest<C: TokenChain>(
    chain: &C,
    payload: &SignedPayload,
    token: Address,
) -> Result<B256, VerifyResponse> {
    let domain = match chain.token_domain(token).await {
        Ok(domain) => domain,
        Err(e) => {
            tracing::warn!(token = %token, error = %e, "failed to read token EIP-712 domain");
            return Err(VerifyResponse::invalid(
                TOKEN_DOMAIN_UNAVAILABLE,
                Some(payload.payer),
            ));
        }
    };
    let typed = payload
        .authorization
        .to_typed()
        .map_err(|_| VerifyResponse::invalid(AMOUNT_MISMATCH, Some(payload.payer)))?;
    let domain = authorization_domain(&domain, chain.chain_id(), token);
    Ok(signing_hash(&typed, &domain))
}

/// All six checks for an EIP-712 payload.
pub async fn verify_authorization<C: TokenChain>(
    chain: &C,
    payload: &SignedPayload,
    strict_nonce_check: bool,
    now: u64,
) -> VerifyResponse {
    let token = match check_terms(payload, now) {
        Ok(token) => token,
        Err(rejection) => return rejection,
    };
    let auth = &payload.authorization;
    let payer = Some(payload.payer);

    // 5. Nonce freshness, per the token contract
    match chain.authorization_state(token, auth.from, auth.nonce).await {
        Ok(true) => {
            tracing::info!(
                payer = %auth.from,
                nonce = %format!("{:.8}", auth.nonce),
                "authorization nonce already used on-chain"
            );
            return VerifyResponse::invalid(NONCE_ALREADY_USED, payer);
        }
        Ok(false) => {}
        Err(e) if strict_nonce_check => {
            tracing::warn!(token = %token, error = %e, "nonce state unreadable, rejecting (strict)");
            return VerifyResponse::invalid(NONCE_STATE_UNKNOWN, payer);
        }
        Err(e) => {
            // Non-standard tokens may lack authorizationState. Admitting them
            // is a known risk; settlement still fails on-chain if the nonce is spent.
            tracing::warn!(
                token = %token,
                payer = %auth.from,
                error = %e,
                "nonce state unreadable, treating as unused"
            );
        }
    }

    // 6. Signature against the token's domain
    let digest = match authorization_digest(chain, payload, token).await {
        Ok(digest) => digest,
        Err(rejection) => return rejection,
    };
    let recovered = payload
        .signature_bytes()
        .and_then(|bytes| recover_digest_signer(&digest, &bytes));
    match recovered {
        Ok(signer) if signer == auth.from => {}
        Ok(signer) => {
            tracing::info!(payer = %auth.from, recovered = %signer, "signature recovers a different address");
            return VerifyResponse::invalid(INVALID_SIGNATURE, payer);
        }
        Err(e) => {
            tracing::info!(payer = %auth.from, error = %e, "signature rejected");
            return VerifyResponse::invalid(INVALID_SIGNATURE, payer);
        }
    }

    tracing::info!(
        payer = %auth.from,
        amount = %auth.value,
        nonce = %format!("{:.8}", auth.nonce),
        "payment verification succeeded"
    );
    VerifyResponse::valid(payload.payer)
}

/// Inputs for the attested (P-256) checks.
pub struct AttestedPolicy<'a> {
    pub attestation: Option<&'a AttestationVerifier>,
    pub replay_store: &'a dyn NonceStore,
    pub max_window_secs: u64,
}

/// What a passing attested payload resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestedClearance {
    pub token: Address,
    pub replay_key: B256,
}

/// Checks for an attested payload. Checks 1 to 4 as usual, then the window
/// cap, the facilitator's replay store and the P-256 attestation in place
/// of checks 5 and 6. Read-only: the replay key is not claimed here.
pub async fn verify_attested<C: TokenChain>(
    chain: &C,
    payload: &SignedPayload,
    policy: &AttestedPolicy<'_>,
    now: u64,
) -> Result<AttestedClearance, VerifyResponse> {
    let token = check_terms(payload, now)?;
    let auth = &payload.authorization;
    let payer = Some(payload.payer);

    let window = auth.valid_before.saturating_sub(auth.valid_after);
    if window > policy.max_window_secs {
        tracing::info!(payer = %auth.from, window, max = policy.max_window_secs, "attested window too large");
        return Err(VerifyResponse::invalid(ATTESTED_WINDOW_TOO_LARGE, payer));
    }

    let replay_key = replay_key(auth.from, &auth.nonce);
    if policy.replay_store.is_claimed(&replay_key) {
        tracing::info!(payer = %auth.from, nonce = %format!("{:.8}", auth.nonce), "attested nonce replayed");
        return Err(VerifyResponse::invalid(NONCE_ALREADY_USED, payer));
    }

    let Some(attestation) = policy.attestation else {
        tracing::warn!("attested payload received but no attestation key is configured");
        return Err(VerifyResponse::invalid(INVALID_ATTESTATION, payer));
    };
    let digest = authorization_digest(chain, payload, token).await?;
    let checked = payload
        .signature_bytes()
        .and_then(|bytes| attestation.verify(&digest, &bytes));
    if let Err(e) = checked {
        tracing::info!(payer = %auth.from, error = %e, "attestation rejected");
        return Err(VerifyResponse::invalid(INVALID_ATTESTATION, payer));
    }

    Ok(AttestedClearance { token, replay_key })
}
