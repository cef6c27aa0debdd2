//! The facilitator's external operations.
//!
//! See [`crate::scheme_facilitator::Eip3009Facilitator`] for the implementation.

use crate::constants::Network;
use crate::error::X402Error;
use crate::payment::SignedPayload;
use crate::response::{BalanceReport, SettleResponse, VerifyResponse};

/// Verifies and settles signed payloads.
///
/// `verify` and `settle` always produce a response; failures are described
/// in it rather than returned as errors.
pub trait SchemeFacilitator: Send + Sync {
    /// Check a payload without changing any state.
    fn verify(
        &self,
        payload: &SignedPayload,
    ) -> impl std::future::Future<Output = VerifyResponse> + Send;

    /// Settle a payload on-chain (re-verifies first).
    fn settle(
        &self,
        payload: &SignedPayload,
    ) -> impl std::future::Future<Output = SettleResponse> + Send;

    /// Native balance of the facilitator account on `network`.
    fn balance(
        &self,
        network: Network,
    ) -> impl std::future::Future<Output = Result<BalanceReport, X402Error>> + Send;
}
