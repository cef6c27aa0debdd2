//! Process-wide signer guard.
//!
//! Startup installs exactly one [`Signer`] and hands the returned `Arc` to the
//! facilitator, which owns it from then on. The slot exists so a second
//! signer (a second key, or a second KMS identity) can never be brought up in
//! the same process; nothing reads it back at request time. Only test
//! harnesses may clear it, through [`reset_for_tests`].

use std::sync::{Arc, PoisonError, RwLock};

use super::Signer;
use crate::X402Error;

static INSTALLED: RwLock<Option<Arc<Signer>>> = RwLock::new(None);

/// Install the process signer. Fails if one is already installed.
pub fn install(signer: Signer) -> Result<Arc<Signer>, X402Error> {
    let mut slot = INSTALLED.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(X402Error::ConfigError(
            "a signer is already installed for this process".to_string(),
        ));
    }
    let signer = Arc::new(signer);
    tracing::info!(kind = %signer.kind(), "installed process signer");
    *slot = Some(Arc::clone(&signer));
    Ok(signer)
}

/// Clear the slot so another test can install its own signer.
#[doc(hidden)]
pub fn reset_for_tests() {
    *INSTALLED.write().unwrap_or_else(PoisonError::into_inner) = None;
}
