use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::constants::Network;

/// Result of `verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
}

impl VerifyResponse {
    pub fn valid(payer: Address) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    pub fn invalid(reason: impl Into<String>, payer: Option<Address>) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason.into()),
            payer,
        }
    }
}

/// Whether state on chain is known to have changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    /// Receipt observed with a success status.
    Confirmed,
    /// Nothing was transferred (rejected, simulation failed, or reverted).
    Failed,
    /// Submitted but no receipt within the timeout; poll the hash separately.
    Unknown,
}

/// Result of `settle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    pub status: SettlementStatus,
    /// Transaction hash, whenever one was obtained (including reverts and timeouts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<Address>,
    pub network: Network,
}

impl SettleResponse {
    pub fn confirmed(transaction: String, payer: Address, network: Network) -> Self {
        Self {
            success: true,
            status: SettlementStatus::Confirmed,
            transaction: Some(transaction),
            error_reason: None,
            payer: Some(payer),
            network,
        }
    }

    pub fn failed(
        reason: impl Into<String>,
        transaction: Option<String>,
        payer: Option<Address>,
        network: Network,
    ) -> Self {
        Self {
            success: false,
            status: SettlementStatus::Failed,
            transaction,
            error_reason: Some(reason.into()),
            payer,
            network,
        }
    }

    /// The transaction may or may not land. `transaction` is absent when the
    /// send itself timed out before the node returned a hash.
    pub fn unknown(
        reason: impl Into<String>,
        transaction: Option<String>,
        payer: Address,
        network: Network,
    ) -> Self {
        Self {
            success: false,
            status: SettlementStatus::Unknown,
            transaction,
            error_reason: Some(reason.into()),
            payer: Some(payer),
            network,
        }
    }
}

/// Result of the facilitator balance check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceReport {
    pub network: Network,
    pub address: Address,
    /// Native balance in wei, as a decimal string.
    pub balance: String,
    pub sufficient: bool,
}
