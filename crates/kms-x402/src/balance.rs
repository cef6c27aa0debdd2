//! Whether the facilitator account can keep paying for gas.
//!
//! Informational only; settlement does not consult it.

use alloy::primitives::{Address, U256};

use crate::chain::TokenChain;
use crate::constants::{Network, MIN_NATIVE_BALANCE};
use crate::{BalanceReport, X402Error};

/// Read `address`'s native balance on `network` and compare it to [`MIN_NATIVE_BALANCE`].
pub async fn balance_report<C: TokenChain>(
    chain: &C,
    network: Network,
    address: Address,
) -> Result<BalanceReport, X402Error> {
    let balance = chain.native_balance(address).await?;
    let sufficient = is_sufficient(balance);
    if !sufficient {
        tracing::warn!(
            network = %network,
            address = %address,
            balance = %balance,
            "facilitator native balance below operating threshold"
        );
    }
    Ok(BalanceReport {
        network,
        address,
        balance: balance.to_string(),
        sufficient,
    })
}

pub fn is_sufficient(balance: U256) -> bool {
    balance >= MIN_NATIVE_BALANCE
}
