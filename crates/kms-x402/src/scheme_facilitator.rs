use std::collections::HashMap;
use std::sync::Arc;

use crate::attestation::AttestationVerifier;
use crate::balance::balance_report;
use crate::chain::TokenChain;
use crate::config::FacilitatorSettings;
use crate::constants::{Network, SCHEME_NAME};
use crate::nonce_store::{InMemoryNonceStore, NonceStore};
use crate::settlement::{settle_attested, settle_authorization};
use crate::signer::{HashSigner, Signer};
use crate::verifier::{
    unix_now, verify_attested, verify_authorization, AttestedPolicy, ATTESTED_DISABLED,
};
use crate::{
    BalanceReport, SchemeFacilitator, SettleResponse, SignatureScheme, SignedPayload,
    VerifyResponse, X402Error,
};

pub const UNSUPPORTED_SCHEME: &str = "Unsupported scheme";
pub const UNSUPPORTED_NETWORK: &str = "Network not supported by this facilitator";

/// EIP-3009 facilitator over one [`TokenChain`] per network.
pub struct Eip3009Facilitator<C> {
    chains: HashMap<Network, C>,
    signer: Arc<Signer>,
    settings: FacilitatorSettings,
    /// Replay claims for the attested path.
    replay_store: Arc<dyn NonceStore>,
    attestation: Option<AttestationVerifier>,
}

impl<C> Eip3009Facilitator<C> {
    /// A facilitator with no networks and an in-memory replay store.
    ///
    /// # Warning
    /// The in-memory store forgets attested claims on restart. Deployments that
    /// enable attested settlement should chain `.with_replay_store(sqlite_store)`.
    pub fn new(signer: Arc<Signer>, settings: FacilitatorSettings) -> Self {
        Self {
            chains: HashMap::new(),
            signer,
            settings,
            replay_store: Arc::new(InMemoryNonceStore::new()),
            attestation: None,
        }
    }

    pub fn with_chain(mut self, network: Network, chain: C) -> Self {
        self.chains.insert(network, chain);
        self
    }

    pub fn with_replay_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.replay_store = store;
        self
    }

    /// Key that attested payloads must be signed with.
    pub fn with_attestation_verifier(mut self, verifier: AttestationVerifier) -> Self {
        self.attestation = Some(verifier);
        self
    }

    pub fn chain(&self, network: Network) -> Option<&C> {
        self.chains.get(&network)
    }

    /// Configured networks, in [`Network::ALL`] order.
    pub fn networks(&self) -> Vec<Network> {
        Network::ALL
            .into_iter()
            .filter(|n| self.chains.contains_key(n))
            .collect()
    }

    pub fn signer(&self) -> &Arc<Signer> {
        &self.signer
    }

    pub fn settings(&self) -> &FacilitatorSettings {
        &self.settings
    }

    /// Purge attested replay claims every 60 seconds. A claim only needs to
    /// outlive the longest accepted validity window.
    pub fn start_replay_cleanup(&self) {
        let store = Arc::clone(&self.replay_store);
        let max_age = self.settings.max_attested_window_secs + 60;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = store.purge_expired(max_age);
                if purged > 0 {
                    tracing::info!(purged, "purged expired attested claims");
                }
            }
        });
    }

    fn route(&self, payload: &SignedPayload) -> Result<&C, &'static str> {
        if payload.requirement.scheme != SCHEME_NAME {
            return Err(UNSUPPORTED_SCHEME);
        }
        self.chains
            .get(&payload.requirement.network)
            .ok_or(UNSUPPORTED_NETWORK)
    }

    fn attested_policy(&self) -> AttestedPolicy<'_> {
        AttestedPolicy {
            attestation: self.attestation.as_ref(),
            replay_store: self.replay_store.as_ref(),
            max_window_secs: self.settings.max_attested_window_secs,
        }
    }
}

impl<C: TokenChain> SchemeFacilitator for Eip3009Facilitator<C> {
    async fn verify(&self, payload: &SignedPayload) -> VerifyResponse {
        let chain = match self.route(payload) {
            Ok(chain) => chain,
            Err(reason) => return VerifyResponse::invalid(reason, Some(payload.payer)),
        };
        let now = unix_now();

        match payload.signature_scheme {
            SignatureScheme::Eip712 => {
                verify_authorization(chain, payload, self.settings.strict_nonce_check, now).await
            }
            SignatureScheme::AttestedP256 => {
                if !self.settings.allow_attested_settlement {
                    return VerifyResponse::invalid(ATTESTED_DISABLED, Some(payload.payer));
                }
                match verify_attested(chain, payload, &self.attested_policy(), now).await {
                    Ok(_) => VerifyResponse::valid(payload.payer),
                    Err(rejection) => rejection,
                }
            }
        }
    }

    async fn settle(&self, payload: &SignedPayload) -> SettleResponse {
        let network = payload.requirement.network;
        let chain = match self.route(payload) {
            Ok(chain) => chain,
            Err(reason) => {
                return SettleResponse::failed(reason, None, Some(payload.payer), network)
            }
        };
        let now = unix_now();

        match payload.signature_scheme {
            SignatureScheme::Eip712 => {
                settle_authorization(chain, network, payload, &self.settings, now).await
            }
            SignatureScheme::AttestedP256 => {
                settle_attested(
                    chain,
                    network,
                    payload,
                    &self.settings,
                    self.attestation.as_ref(),
                    self.replay_store.as_ref(),
                    now,
                )
                .await
            }
        }
    }

    async fn balance(&self, network: Network) -> Result<BalanceReport, X402Error> {
        let chain = self
            .chains
            .get(&network)
            .ok_or_else(|| X402Error::ConfigError(format!("network {network} is not configured")))?;
        let address = self.signer.address().await?;
        balance_report(chain, network, address).await
    }
}
