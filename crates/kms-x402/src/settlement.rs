//! Settlement behind `settle`.
//!
//! Two visibly separate paths:
//!
//! - [`settle_authorization`]: the payer's EIP-3009 signature goes on-chain in
//!   `transferWithAuthorization`; the token contract checks it and spends the
//!   nonce.
//! - [`settle_attested`]: the payer only holds a P-256 attestation, which no
//!   token can verify. The facilitator sends its own tokens instead. Gated by
//!   [`FacilitatorSettings::allow_attested_settlement`].
//!
//! Both simulate before submitting and never resubmit. A receipt that does
//! not arrive in time is reported as `unknown` with the transaction hash; a
//! send that times out is `unknown` without one, since it may have gone out.

use std::time::Duration;

use alloy::primitives::{Address, TxHash, B256, U256};

use crate::attestation::AttestationVerifier;
use crate::chain::{ReceiptStatus, SettlementCall, TokenChain};
use crate::classify::{classify_chain_error, SettlementFailure};
use crate::config::FacilitatorSettings;
use crate::constants::Network;
use crate::eip712::parse_signature;
use crate::nonce_store::NonceStore;
use crate::verifier::{
    self, verify_attested, verify_authorization, AttestedPolicy, ATTESTED_DISABLED,
    INVALID_SIGNATURE, NONCE_ALREADY_USED,
};
use crate::{SettleResponse, SignedPayload, X402Error};

pub const TRANSACTION_REVERTED: &str = "Transaction reverted";
pub const CONFIRMATION_TIMED_OUT: &str = "Confirmation timed out; transaction status unknown";
pub const SUBMISSION_TIMED_OUT: &str = "Submission timed out; transaction may be pending";

/// Where a settlement attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    /// Simulation failed; nothing was sent.
    SimulationFailed(SettlementFailure),
    /// The node refused the transaction.
    SubmitFailed(SettlementFailure),
    /// `send()` gave no answer in time. The transaction may have been broadcast.
    SubmitTimedOut,
    Reverted(TxHash),
    Confirmed(TxHash),
    /// Sent, but no receipt before the timeout.
    Unknown(TxHash),
}

impl Execution {
    pub fn into_response(self, payer: Address, network: Network) -> SettleResponse {
        match self {
            Execution::Confirmed(tx) => SettleResponse::confirmed(tx.to_string(), payer, network),
            Execution::Unknown(tx) => {
                SettleResponse::unknown(CONFIRMATION_TIMED_OUT, Some(tx.to_string()), payer, network)
            }
            Execution::SubmitTimedOut => {
                SettleResponse::unknown(SUBMISSION_TIMED_OUT, None, payer, network)
            }
            Execution::Reverted(tx) => SettleResponse::failed(
                TRANSACTION_REVERTED,
                Some(tx.to_string()),
                Some(payer),
                network,
            ),
            Execution::SimulationFailed(failure) | Execution::SubmitFailed(failure) => {
                SettleResponse::failed(failure.reason(), None, Some(payer), network)
            }
        }
    }
}

/// Simulate, submit, then wait up to `receipt_timeout` for one confirmation.
pub async fn execute<C: TokenChain>(
    chain: &C,
    call: &SettlementCall,
    receipt_timeout: Duration,
) -> Execution {
    if let Err(e) = chain.simulate(call).await {
        let failure = classify_chain_error(&e.to_string());
        tracing::warn!(call = call.name(), error = %e, category = %failure, "simulation failed, not submitting");
        return Execution::SimulationFailed(failure);
    }

    let tx = match chain.submit(call).await {
        Ok(tx) => tx,
        Err(X402Error::Timeout(e)) => {
            tracing::warn!(
                call = call.name(),
                error = %e,
                "send timed out; transaction may be pending, not resubmitting"
            );
            return Execution::SubmitTimedOut;
        }
        Err(e) => {
            let failure = classify_chain_error(&e.to_string());
            tracing::error!(call = call.name(), error = %e, category = %failure, "submission failed");
            return Execution::SubmitFailed(failure);
        }
    };
    tracing::info!(call = call.name(), tx = %tx, "transaction submitted");

    match chain.wait_for_receipt(tx, receipt_timeout).await {
        Ok(ReceiptStatus::Success) => Execution::Confirmed(tx),
        Ok(ReceiptStatus::Reverted) => {
            tracing::warn!(tx = %tx, "transaction reverted");
            Execution::Reverted(tx)
        }
        Ok(ReceiptStatus::Unknown) => {
            tracing::warn!(
                tx = %tx,
                timeout_secs = receipt_timeout.as_secs(),
                "no receipt before timeout; status unknown, not resubmitting"
            );
            Execution::Unknown(tx)
        }
        Err(e) => {
            tracing::warn!(tx = %tx, error = %e, "receipt lookup failed; status unknown");
            Execution::Unknown(tx)
        }
    }
}

/// The `transferWithAuthorization` call carrying the payer's `(v, r, s)`.
pub fn authorization_call(payload: &SignedPayload, token: Address) -> Result<SettlementCall, X402Error> {
    let auth = &payload.authorization;
    let signature = parse_signature(&payload.signature_bytes()?)?;
    Ok(SettlementCall::TransferWithAuthorization {
        token,
        from: auth.from,
        to: auth.to,
        value: auth.value()?,
        valid_after: U256::from(auth.valid_after),
        valid_before: U256::from(auth.valid_before),
        nonce: auth.nonce,
        v: 27 + u8::from(signature.v()),
        r: B256::from(signature.r().to_be_bytes::<32>()),
        s: B256::from(signature.s().to_be_bytes::<32>()),
    })
}

/// Settle an EIP-712 payload: re-verify, then submit the payer's authorization.
pub async fn settle_authorization<C: TokenChain>(
    chain: &C,
    network: Network,
    payload: &SignedPayload,
    settings: &FacilitatorSettings,
    now: u64,
) -> SettleResponse {
    let check = verify_authorization(chain, payload, settings.strict_nonce_check, now).await;
    if !check.is_valid {
        let reason = check.invalid_reason.unwrap_or_default();
        tracing::warn!(payer = %payload.payer, reason = %reason, "settlement rejected after re-verification");
        return SettleResponse::failed(reason, None, check.payer, network);
    }

    let token = crate::token_address(payload.requirement.network, &payload.requirement.token);
    let call = match authorization_call(payload, token) {
        Ok(call) => call,
        Err(e) => {
            tracing::warn!(payer = %payload.payer, error = %e, "could not build settlement call");
            return SettleResponse::failed(INVALID_SIGNATURE, None, Some(payload.payer), network);
        }
    };

    let execution = execute(chain, &call, settings.receipt_timeout).await;
    if let Execution::Confirmed(tx) = &execution {
        tracing::info!(
            payer = %payload.payer,
            amount = %payload.authorization.value,
            nonce = %format!("{:.8}", payload.authorization.nonce),
            tx = %tx,
            "payment settled"
        );
    }
    execution.into_response(payload.payer, network)
}

/// Settle an attested P-256 payload from the facilitator's own balance.
///
/// The token contract never sees the payer's authorization, so the replay
/// store is the only thing preventing a second settlement of the same nonce.
/// The claim is given back only when simulation fails, because after that
/// point a transaction may already be in flight.
pub async fn settle_attested<C: TokenChain>(
    chain: &C,
    network: Network,
    payload: &SignedPayload,
    settings: &FacilitatorSettings,
    attestation: Option<&AttestationVerifier>,
    replay_store: &dyn NonceStore,
    now: u64,
) -> SettleResponse {
    let payer = payload.payer;
    if !settings.allow_attested_settlement {
        tracing::warn!(payer = %payer, "attested settlement requested but disabled");
        return SettleResponse::failed(ATTESTED_DISABLED, None, Some(payer), network);
    }

    let policy = AttestedPolicy {
        attestation,
        replay_store,
        max_window_secs: settings.max_attested_window_secs,
    };
    let clearance = match verify_attested(chain, payload, &policy, now).await {
        Ok(clearance) => clearance,
        Err(rejection) => {
            let reason = rejection.invalid_reason.unwrap_or_default();
            return SettleResponse::failed(reason, None, Some(payer), network);
        }
    };

    if !replay_store.try_claim(clearance.replay_key) {
        tracing::warn!(payer = %payer, "attested nonce claimed by a concurrent request");
        return SettleResponse::failed(NONCE_ALREADY_USED, None, Some(payer), network);
    }

    let value = match payload.authorization.value() {
        Ok(value) => value,
        Err(_) => {
            replay_store.release(&clearance.replay_key);
            return SettleResponse::failed(verifier::AMOUNT_MISMATCH, None, Some(payer), network);
        }
    };
    let recipient = payload.requirement.recipient;

    tracing::warn!(
        payer = %payer,
        recipient = %recipient,
        amount = %value,
        network = %network,
        "attested settlement: facilitator-funded transfer in place of on-chain signature verification"
    );

    let call = SettlementCall::Transfer {
        token: clearance.token,
        to: recipient,
        value,
    };
    let execution = execute(chain, &call, settings.receipt_timeout).await;
    if matches!(execution, Execution::SimulationFailed(_)) {
        replay_store.release(&clearance.replay_key);
    }
    execution.into_response(payer, network)
}
