//! Startup wiring.
//!
//! Reads configuration, installs the process signer, builds one wallet-backed
//! provider per configured network and assembles the [`AppState`].

use std::sync::Arc;

use alloy::providers::{Provider, ProviderBuilder};
use x402::attestation::AttestationVerifier;
use x402::config::ENV_P256_SPENDER_PRIVATE_KEY;
use x402::nonce_store::{InMemoryNonceStore, NonceStore, SqliteNonceStore};
use x402::signer::registry;
use x402::{
    rpc_client, AlloyChain, Eip3009Facilitator, FacilitatorSettings, HashSigner, Network, Signer,
    SignerConfig, X402Error,
};

use crate::metrics::Metrics;
use crate::state::AppState;

pub const ENV_NONCE_DB_PATH: &str = "NONCE_DB_PATH";
pub const ENV_FACILITATOR_PORT: &str = "FACILITATOR_PORT";
pub const ENV_PORT: &str = "PORT";
pub const DEFAULT_PORT: u16 = 4022;

/// Everything the server needs before it starts.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub signer: SignerConfig,
    pub settings: FacilitatorSettings,
    /// `(network, rpc url)` for every network with an `RPC_URL_*` variable set.
    pub rpc_urls: Vec<(Network, String)>,
    /// SQLite file for attested replay claims.
    pub nonce_db_path: Option<String>,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_urls: Vec<(Network, String)> = Network::ALL
            .into_iter()
            .filter_map(|network| {
                get(network.rpc_env_var()).map(|url| (network, url.trim().to_string()))
            })
            .collect();
        if rpc_urls.is_empty() {
            return Err(X402Error::ConfigError(
                "no network configured; set at least one RPC_URL_<NETWORK>".to_string(),
            ));
        }

        let port = match get(ENV_FACILITATOR_PORT).or_else(|| get(ENV_PORT)) {
            Some(port) => port.trim().parse::<u16>().map_err(|_| {
                X402Error::ConfigError(format!("invalid port '{}'", port.trim()))
            })?,
            None => DEFAULT_PORT,
        };

        Ok(Self {
            signer: SignerConfig::from_lookup(&lookup)?,
            settings: FacilitatorSettings::from_lookup(&lookup)?,
            rpc_urls,
            nonce_db_path: get(ENV_NONCE_DB_PATH),
            port,
        })
    }
}

/// Build the application state from `config`.
///
/// Fails when the signer cannot send transactions, when attested settlement
/// is enabled without a persistent replay store, or when an RPC endpoint
/// reports a chain id other than its network's.
pub async fn bootstrap(config: ServerConfig) -> Result<AppState, X402Error> {
    let ServerConfig {
        signer,
        settings,
        rpc_urls,
        nonce_db_path,
        ..
    } = config;

    let signer = Signer::from_config(signer)?;
    let signer_kind = signer.kind();
    if !signer.is_spendable() {
        return Err(X402Error::ConfigError(format!(
            "{signer_kind} signer cannot send transactions; set {ENV_P256_SPENDER_PRIVATE_KEY}"
        )));
    }
    let signer = registry::install(signer)?;

    // Resolve the address now so KMS misconfiguration fails startup, not the first request.
    let address = signer.address().await?;
    tracing::info!(kind = %signer_kind, address = %address, "facilitator signer ready");

    let wallet = signer.ethereum_wallet().await?;
    let attestation = attestation_verifier(&signer, &settings).await?;
    let replay_store = replay_store(nonce_db_path.as_deref(), &settings)?;
    let send_timeout = settings.send_timeout;
    let rpc_timeout = settings.rpc_timeout;
    let allow_attested = settings.allow_attested_settlement;

    let mut facilitator =
        Eip3009Facilitator::new(Arc::clone(&signer), settings).with_replay_store(replay_store);
    match attestation {
        Some(verifier) => facilitator = facilitator.with_attestation_verifier(verifier),
        None if allow_attested => tracing::warn!(
            "attested settlement enabled without an attestation key; attested payloads will be rejected"
        ),
        None => {}
    }

    for (network, url) in rpc_urls {
        let client = rpc_client(&url, rpc_timeout).map_err(|e| {
            X402Error::ConfigError(format!("{}: {e}", network.rpc_env_var()))
        })?;
        let provider = ProviderBuilder::new()
            .wallet(wallet.clone())
            .connect_client(client);
        check_chain_id(&provider, network).await?;

        let chain = AlloyChain::new(provider, address, network.chain_id(), send_timeout);
        facilitator = facilitator.with_chain(network, chain);
        tracing::info!(network = %network, chain_id = network.chain_id(), "network configured");
    }

    if allow_attested {
        tracing::warn!("attested P-256 settlement is enabled; it is funded by the facilitator");
        facilitator.start_replay_cleanup();
    }

    let metrics = Metrics::new()
        .map_err(|e| X402Error::ConfigError(format!("metrics registration failed: {e}")))?;

    Ok(AppState {
        facilitator,
        facilitator_address: address,
        signer_kind,
        metrics,
    })
}

/// The configured attestation key, or the P-256 signer's own public key.
async fn attestation_verifier(
    signer: &Signer,
    settings: &FacilitatorSettings,
) -> Result<Option<AttestationVerifier>, X402Error> {
    if let Some(sec1) = &settings.attestation_public_key {
        return AttestationVerifier::from_sec1(sec1).map(Some);
    }
    Ok(signer
        .p256_verifying_key()
        .await?
        .map(AttestationVerifier::new))
}

fn replay_store(
    path: Option<&str>,
    settings: &FacilitatorSettings,
) -> Result<Arc<dyn NonceStore>, X402Error> {
    match path {
        Some(path) => {
            let store = SqliteNonceStore::open(path).map_err(|e| {
                X402Error::ConfigError(format!("cannot open replay store at {path}: {e}"))
            })?;
            tracing::info!(path, "replay store: SQLite");
            Ok(Arc::new(store))
        }
        // In-memory claims vanish on restart, which would let an attested
        // payment be settled twice inside its validity window.
        None if settings.allow_attested_settlement => Err(X402Error::ConfigError(format!(
            "attested settlement requires {ENV_NONCE_DB_PATH}"
        ))),
        None => Ok(Arc::new(InMemoryNonceStore::new())),
    }
}

async fn check_chain_id<P: Provider>(provider: &P, network: Network) -> Result<(), X402Error> {
    match provider.get_chain_id().await {
        Ok(id) if id == network.chain_id() => Ok(()),
        Ok(id) => Err(X402Error::ConfigError(format!(
            "{} points at chain {id}, expected {} for {network}",
            network.rpc_env_var(),
            network.chain_id()
        ))),
        Err(e) => {
            tracing::warn!(network = %network, error = %e, "RPC unreachable at startup; chain id not checked");
            Ok(())
        }
    }
}
