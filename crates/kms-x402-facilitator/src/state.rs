use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::providers::{
    fillers::{
        BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
    },
    Identity, RootProvider,
};
use x402::{AlloyChain, Eip3009Facilitator, SignerKind};

use crate::metrics::Metrics;

/// Concrete provider type from `ProviderBuilder::new().wallet(...).connect_client(...)`.
pub type WalletProvider = FillProvider<
    JoinFill<
        JoinFill<
            Identity,
            JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
        >,
        WalletFiller<EthereumWallet>,
    >,
    RootProvider,
>;

pub type Facilitator = Eip3009Facilitator<AlloyChain<WalletProvider>>;

/// Shared application state for the facilitator server.
pub struct AppState {
    pub facilitator: Facilitator,
    /// Account that signs settlement transactions and pays their gas.
    pub facilitator_address: Address,
    pub signer_kind: SignerKind,
    pub metrics: Metrics,
}
