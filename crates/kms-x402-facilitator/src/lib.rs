//! HTTP facilitator: verifies EIP-3009 authorizations and settles them on-chain.
//!
//! Verification and settlement live in the core [`x402`] crate; this crate wires
//! configuration, the signer, one provider per network and the HTTP surface.
//!
//! # Modules
//!
//! - [`bootstrap`]: configuration from the environment and startup wiring
//! - [`routes`]: HTTP endpoints (health, supported, verify, settle, metrics)
//! - [`state`]: shared [`AppState`](state::AppState)
//! - [`metrics`]: Prometheus metrics for verification and settlement

pub mod bootstrap;
pub mod metrics;
pub mod routes;
pub mod state;
