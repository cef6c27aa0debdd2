use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{address, Address, U256};
use serde::{Deserialize, Serialize};

use crate::X402Error;

/// x402 scheme name for EIP-3009 `transferWithAuthorization` payments.
pub const SCHEME_NAME: &str = "exact";

/// Minimum native balance the facilitator should hold to keep paying gas (0.01 native units).
pub const MIN_NATIVE_BALANCE: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

/// Default bound on waiting for a settlement receipt.
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on submitting a transaction to the RPC.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on a single JSON-RPC request (reads, simulation, receipt polls).
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on establishing the TCP/TLS connection to an RPC node.
pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on `validBefore - validAfter` for attested authorizations.
pub const DEFAULT_MAX_ATTESTED_WINDOW_SECS: u64 = 3600;

/// EVM networks the facilitator knows how to settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Network {
    Base,
    BaseSepolia,
    Avalanche,
    AvalancheFuji,
    PolygonAmoy,
    Sepolia,
}

impl Network {
    pub const ALL: [Network; 6] = [
        Network::Base,
        Network::BaseSepolia,
        Network::Avalanche,
        Network::AvalancheFuji,
        Network::PolygonAmoy,
        Network::Sepolia,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Base => "base",
            Network::BaseSepolia => "base-sepolia",
            Network::Avalanche => "avalanche",
            Network::AvalancheFuji => "avalanche-fuji",
            Network::PolygonAmoy => "polygon-amoy",
            Network::Sepolia => "sepolia",
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
            Network::PolygonAmoy => 80002,
            Network::Sepolia => 11155111,
        }
    }

    /// Environment variable holding the RPC endpoint for this network.
    pub fn rpc_env_var(&self) -> &'static str {
        match self {
            Network::Base => "RPC_URL_BASE",
            Network::BaseSepolia => "RPC_URL_BASE_SEPOLIA",
            Network::Avalanche => "RPC_URL_AVALANCHE",
            Network::AvalancheFuji => "RPC_URL_AVALANCHE_FUJI",
            Network::PolygonAmoy => "RPC_URL_POLYGON_AMOY",
            Network::Sepolia => "RPC_URL_SEPOLIA",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| X402Error::ConfigError(format!("unknown network: {s}")))
    }
}

/// Resolve a token symbol to its contract address on `network`.
///
/// Returns [`Address::ZERO`] when the token is not deployed there; callers
/// treat that as "unsupported" rather than an error.
pub fn token_address(network: Network, symbol: &str) -> Address {
    match (network, symbol.to_ascii_uppercase().as_str()) {
        (Network::Base, "USDC") => address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913"),
        (Network::BaseSepolia, "USDC") => address!("036cbd53842c5426634e7929541ec2318f3dcf7e"),
        (Network::Avalanche, "USDC") => address!("b97ef9ef8734c71904d8002f8b6bc66dd9c48a6e"),
        (Network::AvalancheFuji, "USDC") => address!("5425890298aed601595a70ab815c96711a31bc65"),
        (Network::PolygonAmoy, "USDC") => address!("41e94eb019c0762f9bfcf9fb1e58725bfb0e7582"),
        (Network::Sepolia, "USDC") => address!("1c7d4b196cb0c7b01d743fbc6116a902379c7238"),
        (Network::Base, "EURC") => address!("60a3e35cc302bfa44cb288bc5a4f316fdb1adb42"),
        (Network::BaseSepolia, "EURC") => address!("808456652fdb597867f38412077a9182bf77359f"),
        (Network::Avalanche, "EURC") => address!("c891eb4cbdeff6e073e859e987815ed1505c2acd"),
        (Network::AvalancheFuji, "EURC") => address!("5e44db7996c682e92a960b65ac713a54ad815c6b"),
        (Network::Sepolia, "EURC") => address!("08210f9170f89ab7658f0b5e3ff39b0e03c594d4"),
        _ => Address::ZERO,
    }
}
