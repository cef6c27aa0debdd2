//! What the facilitator needs from a chain node, and the alloy implementation.
//!
//! [`TokenChain`] is the seam the verifier and settlement executor use; tests
//! swap in an in-memory token. [`AlloyChain`] talks JSON-RPC through any alloy
//! provider that carries the facilitator's wallet. Providers should sit on a
//! client from [`rpc_client`] so that every read is bounded.

use std::future::Future;
use std::time::Duration;

use alloy::primitives::{Address, FixedBytes, TxHash, B256, U256};
use alloy::providers::{PendingTransactionBuilder, PendingTransactionError, Provider, WatchTxError};
use alloy::rpc::client::RpcClient;
use alloy::transports::http::reqwest;

use crate::constants::RPC_CONNECT_TIMEOUT;
use crate::eip712::TokenDomain;
use crate::{X402Error, IEIP3009};

/// JSON-RPC client over HTTP whose every request gives up after `timeout`.
///
/// The default alloy HTTP transport never times out, so a node that accepts
/// the connection and then goes silent would stall verification forever.
pub fn rpc_client(url: &str, timeout: Duration) -> Result<RpcClient, X402Error> {
    let url: reqwest::Url = url
        .parse()
        .map_err(|e| X402Error::ConfigError(format!("invalid RPC URL: {e}")))?;
    let http = reqwest::Client::builder()
        .connect_timeout(RPC_CONNECT_TIMEOUT.min(timeout))
        .timeout(timeout)
        .build()
        .map_err(|e| X402Error::ConfigError(format!("RPC HTTP client: {e}")))?;
    Ok(RpcClient::builder().http_with_client(http, url))
}

/// State-changing token call the facilitator sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementCall {
    /// Move the payer's funds using their EIP-3009 signature.
    TransferWithAuthorization {
        token: Address,
        from: Address,
        to: Address,
        value: U256,
        valid_after: U256,
        valid_before: U256,
        nonce: FixedBytes<32>,
        v: u8,
        r: B256,
        s: B256,
    },
    /// Move the facilitator's own funds.
    Transfer {
        token: Address,
        to: Address,
        value: U256,
    },
}

impl SettlementCall {
    pub fn token(&self) -> Address {
        match self {
            SettlementCall::TransferWithAuthorization { token, .. }
            | SettlementCall::Transfer { token, .. } => *token,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SettlementCall::TransferWithAuthorization { .. } => "transferWithAuthorization",
            SettlementCall::Transfer { .. } => "transfer",
        }
    }
}

/// Outcome of waiting for a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
    /// No receipt before the timeout. The transaction may still land.
    Unknown,
}

/// Chain access used by verification and settlement.
///
/// Errors carry the node's message so that settlement can classify it.
pub trait TokenChain: Send + Sync {
    fn chain_id(&self) -> u64;

    /// The token's EIP-712 `name` and `version`, read from the contract.
    fn token_domain(
        &self,
        token: Address,
    ) -> impl Future<Output = Result<TokenDomain, X402Error>> + Send;

    /// Whether `authorizer` has already used (or cancelled) `nonce` on `token`.
    fn authorization_state(
        &self,
        token: Address,
        authorizer: Address,
        nonce: FixedBytes<32>,
    ) -> impl Future<Output = Result<bool, X402Error>> + Send;

    fn native_balance(&self, owner: Address)
        -> impl Future<Output = Result<U256, X402Error>> + Send;

    /// Dry-run `call` from the facilitator account against the latest state.
    fn simulate(&self, call: &SettlementCall) -> impl Future<Output = Result<(), X402Error>> + Send;

    /// Sign and broadcast `call`. Returns once the node accepted it.
    fn submit(&self, call: &SettlementCall)
        -> impl Future<Output = Result<TxHash, X402Error>> + Send;

    /// Wait up to `timeout` for one confirmation.
    fn wait_for_receipt(
        &self,
        tx: TxHash,
        timeout: Duration,
    ) -> impl Future<Output = Result<ReceiptStatus, X402Error>> + Send;
}

/// [`TokenChain`] over an alloy provider whose wallet signs as `facilitator`.
pub struct AlloyChain<P> {
    provider: P,
    facilitator: Address,
    chain_id: u64,
    send_timeout: Duration,
}

impl<P> AlloyChain<P> {
    pub fn new(provider: P, facilitator: Address, chain_id: u64, send_timeout: Duration) -> Self {
        Self {
            provider,
            facilitator,
            chain_id,
            send_timeout,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn facilitator(&self) -> Address {
        self.facilitator
    }
}

impl<P> AlloyChain<P>
where
    P: Provider + Send + Sync,
{
    /// Check RPC connectivity by fetching the latest block number.
    pub async fn health_check(&self) -> Result<u64, X402Error> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| X402Error::ChainError(format!("health check failed: {e}")))
    }
}

impl<P> TokenChain for AlloyChain<P>
where
    P: Provider + Send + Sync,
{
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn token_domain(&self, token: Address) -> Result<TokenDomain, X402Error> {
        let contract = IEIP3009::new(token, &self.provider);
        let name = contract
            .name()
            .call()
            .await
            .map_err(|e| X402Error::ChainError(format!("name() failed: {e}")))?;
        let version = contract
            .version()
            .call()
            .await
            .map_err(|e| X402Error::ChainError(format!("version() failed: {e}")))?;
        Ok(TokenDomain { name, version })
    }

    async fn authorization_state(
        &self,
        token: Address,
        authorizer: Address,
        nonce: FixedBytes<32>,
    ) -> Result<bool, X402Error> {
        IEIP3009::new(token, &self.provider)
            .authorizationState(authorizer, nonce)
            .call()
            .await
            .map_err(|e| X402Error::ChainError(format!("authorizationState failed: {e}")))
    }

    async fn native_balance(&self, owner: Address) -> Result<U256, X402Error> {
        self.provider
            .get_balance(owner)
            .await
            .map_err(|e| X402Error::ChainError(format!("eth_getBalance failed: {e}")))
    }

    async fn simulate(&self, call: &SettlementCall) -> Result<(), X402Error> {
        let contract = IEIP3009::new(call.token(), &self.provider);
        let result = match call {
            SettlementCall::TransferWithAuthorization {
                from,
                to,
                value,
                valid_after,
                valid_before,
                nonce,
                v,
                r,
                s,
                ..
            } => contract
                .transferWithAuthorization(
                    *from,
                    *to,
                    *value,
                    *valid_after,
                    *valid_before,
                    *nonce,
                    *v,
                    *r,
                    *s,
                )
                .from(self.facilitator)
                .call()
                .await
                .map(|_| ()),
            SettlementCall::Transfer { to, value, .. } => {
                let ok = contract
                    .transfer(*to, *value)
                    .from(self.facilitator)
                    .call()
                    .await;
                match ok {
                    Ok(true) => Ok(()),
                    Ok(false) => {
                        return Err(X402Error::ChainError(
                            "simulation failed: transfer returned false".to_string(),
                        ))
                    }
                    Err(e) => Err(e),
                }
            }
        };
        result.map_err(|e| X402Error::ChainError(format!("simulation failed: {e}")))
    }

    async fn submit(&self, call: &SettlementCall) -> Result<TxHash, X402Error> {
        let contract = IEIP3009::new(call.token(), &self.provider);
        let send = async {
            match call {
                SettlementCall::TransferWithAuthorization {
                    from,
                    to,
                    value,
                    valid_after,
                    valid_before,
                    nonce,
                    v,
                    r,
                    s,
                    ..
                } => {
                    contract
                        .transferWithAuthorization(
                            *from,
                            *to,
                            *value,
                            *valid_after,
                            *valid_before,
                            *nonce,
                            *v,
                            *r,
                            *s,
                        )
                        .from(self.facilitator)
                        .send()
                        .await
                }
                SettlementCall::Transfer { to, value, .. } => {
                    contract
                        .transfer(*to, *value)
                        .from(self.facilitator)
                        .send()
                        .await
                }
            }
        };

        // The raw transaction may already be out when this fires.
        let pending = tokio::time::timeout(self.send_timeout, send)
            .await
            .map_err(|_| {
                X402Error::Timeout(format!(
                    "{} send after {}s",
                    call.name(),
                    self.send_timeout.as_secs()
                ))
            })?
            .map_err(|e| X402Error::ChainError(format!("{} send failed: {e}", call.name())))?;
        Ok(*pending.tx_hash())
    }

    async fn wait_for_receipt(&self, tx: TxHash, timeout: Duration) -> Result<ReceiptStatus, X402Error> {
        let pending = PendingTransactionBuilder::new(self.provider.root().clone(), tx)
            .with_timeout(Some(timeout));
        match pending.get_receipt().await {
            Ok(receipt) if receipt.status() => Ok(ReceiptStatus::Success),
            Ok(_) => Ok(ReceiptStatus::Reverted),
            Err(PendingTransactionError::TxWatcher(WatchTxError::Timeout)) => {
                Ok(ReceiptStatus::Unknown)
            }
            Err(e) => Err(X402Error::ChainError(format!("receipt for {tx} unavailable: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::providers::ProviderBuilder;

    /// An RPC endpoint that accepts connections and never writes a byte.
    async fn silent_node() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn reads_against_a_silent_node_give_up() {
        let client = rpc_client(&silent_node().await, Duration::from_millis(300)).unwrap();
        let chain = AlloyChain::new(
            ProviderBuilder::new().connect_client(client),
            Address::repeat_byte(0x01),
            84532,
            Duration::from_secs(30),
        );

        let reads = tokio::time::timeout(Duration::from_secs(10), async {
            (
                chain
                    .authorization_state(
                        Address::repeat_byte(0x02),
                        Address::repeat_byte(0x03),
                        FixedBytes::repeat_byte(0x04),
                    )
                    .await,
                chain.token_domain(Address::repeat_byte(0x02)).await,
                chain.native_balance(Address::repeat_byte(0x01)).await,
                chain.health_check().await,
            )
        })
        .await
        .expect("reads must be bounded by the client timeout");

        assert!(matches!(reads.0, Err(X402Error::ChainError(_))));
        assert!(reads.1.is_err());
        assert!(reads.2.is_err());
        assert!(reads.3.is_err());
    }

    #[tokio::test]
    async fn receipt_wait_against_a_silent_node_is_bounded() {
        let client = rpc_client(&silent_node().await, Duration::from_millis(200)).unwrap();
        let chain = AlloyChain::new(
            ProviderBuilder::new().connect_client(client),
            Address::repeat_byte(0x01),
            84532,
            Duration::from_secs(30),
        );

        let status = tokio::time::timeout(
            Duration::from_secs(10),
            chain.wait_for_receipt(B256::repeat_byte(0x05), Duration::from_secs(1)),
        )
        .await
        .expect("receipt wait must end at its own timeout");
        assert!(!matches!(status, Ok(ReceiptStatus::Success) | Ok(ReceiptStatus::Reverted)));
    }

    #[test]
    fn rejects_malformed_rpc_url() {
        assert!(matches!(
            rpc_client("not a url", Duration::from_secs(1)),
            Err(X402Error::ConfigError(_))
        ));
    }
}
