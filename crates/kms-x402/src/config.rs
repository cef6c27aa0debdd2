//! Startup configuration read from the environment.
//!
//! `from_env` constructors read the process environment; `from_lookup` takes
//! any key lookup so the parsing can be exercised without touching it.
//! Missing or malformed values fail here, before the first request.

use std::fmt;
use std::time::Duration;

use crate::constants::{
    DEFAULT_MAX_ATTESTED_WINDOW_SECS, DEFAULT_RECEIPT_TIMEOUT, DEFAULT_RPC_TIMEOUT,
    DEFAULT_SEND_TIMEOUT,
};
use crate::signer::KmsKeyName;
use crate::X402Error;

pub const ENV_SIGNER_TYPE: &str = "SIGNER_TYPE";
pub const ENV_FACILITATOR_PRIVATE_KEY: &str = "FACILITATOR_PRIVATE_KEY";
pub const ENV_GCP_KMS_PROJECT: &str = "GCP_KMS_PROJECT";
pub const ENV_GCP_KMS_LOCATION: &str = "GCP_KMS_LOCATION";
pub const ENV_GCP_KMS_KEY_RING: &str = "GCP_KMS_KEY_RING";
pub const ENV_GCP_KMS_KEY: &str = "GCP_KMS_KEY";
pub const ENV_GCP_KMS_KEY_VERSION: &str = "GCP_KMS_KEY_VERSION";
pub const ENV_GCP_ACCESS_TOKEN: &str = "GCP_ACCESS_TOKEN";
pub const ENV_P256_SPENDER_PRIVATE_KEY: &str = "P256_SPENDER_PRIVATE_KEY";

pub const ENV_ALLOW_ATTESTED_SETTLEMENT: &str = "ALLOW_ATTESTED_SETTLEMENT";
pub const ENV_ATTESTATION_PUBLIC_KEY: &str = "ATTESTATION_PUBLIC_KEY";
pub const ENV_STRICT_NONCE_CHECK: &str = "STRICT_NONCE_CHECK";
pub const ENV_RECEIPT_TIMEOUT_SECS: &str = "RECEIPT_TIMEOUT_SECS";
pub const ENV_SEND_TIMEOUT_SECS: &str = "SEND_TIMEOUT_SECS";
pub const ENV_RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const ENV_MAX_ATTESTED_WINDOW_SECS: &str = "MAX_ATTESTED_WINDOW_SECS";

/// Which signer to build, with its parameters.
#[derive(Clone, PartialEq, Eq)]
pub enum SignerConfig {
    PrivateKey {
        key: String,
    },
    GcpKms {
        key: KmsKeyName,
        access_token: Option<String>,
    },
    GcpKmsP256 {
        key: KmsKeyName,
        access_token: Option<String>,
        spender_key: Option<String>,
    },
}

impl SignerConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| X402Error::ConfigError(format!("{key} is required")))
        };

        let kind = get(ENV_SIGNER_TYPE).unwrap_or_else(|| "private-key".to_string());
        match kind.as_str() {
            "private-key" => Ok(SignerConfig::PrivateKey {
                key: require(ENV_FACILITATOR_PRIVATE_KEY)?,
            }),
            "gcp-kms" | "gcp-kms-p256" => {
                let key = KmsKeyName {
                    project: require(ENV_GCP_KMS_PROJECT)?,
                    location: get(ENV_GCP_KMS_LOCATION).unwrap_or_else(|| "global".to_string()),
                    key_ring: require(ENV_GCP_KMS_KEY_RING)?,
                    key: require(ENV_GCP_KMS_KEY)?,
                    version: get(ENV_GCP_KMS_KEY_VERSION).unwrap_or_else(|| "1".to_string()),
                };
                let access_token = get(ENV_GCP_ACCESS_TOKEN);
                if kind == "gcp-kms" {
                    Ok(SignerConfig::GcpKms { key, access_token })
                } else {
                    Ok(SignerConfig::GcpKmsP256 {
                        key,
                        access_token,
                        spender_key: get(ENV_P256_SPENDER_PRIVATE_KEY),
                    })
                }
            }
            other => Err(X402Error::ConfigError(format!(
                "unknown {ENV_SIGNER_TYPE} '{other}' (expected private-key, gcp-kms or gcp-kms-p256)"
            ))),
        }
    }
}

// Hand-written so keys and tokens never reach logs.
impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignerConfig::PrivateKey { .. } => f
                .debug_struct("PrivateKey")
                .field("key", &"<redacted>")
                .finish(),
            SignerConfig::GcpKms { key, access_token } => f
                .debug_struct("GcpKms")
                .field("key", &key.resource_name())
                .field("access_token", &access_token.as_ref().map(|_| "<redacted>"))
                .finish(),
            SignerConfig::GcpKmsP256 {
                key,
                access_token,
                spender_key,
            } => f
                .debug_struct("GcpKmsP256")
                .field("key", &key.resource_name())
                .field("access_token", &access_token.as_ref().map(|_| "<redacted>"))
                .field("spender_key", &spender_key.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Policy knobs for verification and settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilitatorSettings {
    /// Enable the facilitator-funded P-256 path. Off unless explicitly set.
    pub allow_attested_settlement: bool,
    /// SEC1-encoded P-256 key that attestations must verify against. When
    /// unset and the signer is a P-256 KMS key, its public key is used.
    pub attestation_public_key: Option<Vec<u8>>,
    /// Reject when the token's nonce state cannot be read, instead of
    /// treating the nonce as unused.
    pub strict_nonce_check: bool,
    pub receipt_timeout: Duration,
    pub send_timeout: Duration,
    /// Per-request bound on JSON-RPC calls.
    pub rpc_timeout: Duration,
    /// Longest `validBefore - validAfter` accepted on the attested path.
    pub max_attested_window_secs: u64,
}

impl Default for FacilitatorSettings {
    fn default() -> Self {
        Self {
            allow_attested_settlement: false,
            attestation_public_key: None,
            strict_nonce_check: false,
            receipt_timeout: DEFAULT_RECEIPT_TIMEOUT,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            rpc_timeout: DEFAULT_RPC_TIMEOUT,
            max_attested_window_secs: DEFAULT_MAX_ATTESTED_WINDOW_SECS,
        }
    }
}

impl FacilitatorSettings {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let attestation_public_key = get(ENV_ATTESTATION_PUBLIC_KEY)
            .map(|hex| {
                alloy::hex::decode(hex.trim()).map_err(|e| {
                    X402Error::ConfigError(format!("{ENV_ATTESTATION_PUBLIC_KEY} is not hex: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            allow_attested_settlement: parse_flag(&get, ENV_ALLOW_ATTESTED_SETTLEMENT)?
                .unwrap_or(defaults.allow_attested_settlement),
            attestation_public_key,
            strict_nonce_check: parse_flag(&get, ENV_STRICT_NONCE_CHECK)?
                .unwrap_or(defaults.strict_nonce_check),
            receipt_timeout: parse_secs(&get, ENV_RECEIPT_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.receipt_timeout),
            send_timeout: parse_secs(&get, ENV_SEND_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.send_timeout),
            rpc_timeout: parse_secs(&get, ENV_RPC_TIMEOUT_SECS)?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rpc_timeout),
            max_attested_window_secs: parse_secs(&get, ENV_MAX_ATTESTED_WINDOW_SECS)?
                .unwrap_or(defaults.max_attested_window_secs),
        })
    }
}

fn parse_flag(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<bool>, X402Error> {
    get(key)
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(X402Error::ConfigError(format!(
                "{key} must be a boolean, got '{other}'"
            ))),
        })
        .transpose()
}

fn parse_secs(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>, X402Error> {
    get(key)
        .map(|v| match v.trim().parse::<u64>() {
            Ok(0) => Err(X402Error::ConfigError(format!("{key} must be positive"))),
            Ok(secs) => Ok(secs),
            Err(e) => Err(X402Error::ConfigError(format!("{key} is not a number: {e}"))),
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn private_key_is_the_default_kind() {
        let config = SignerConfig::from_lookup(lookup(&[(ENV_FACILITATOR_PRIVATE_KEY, "0xabc")])).unwrap();
        assert_eq!(config, SignerConfig::PrivateKey { key: "0xabc".into() });
        assert!(!format!("{config:?}").contains("0xabc"));
    }

    #[test]
    fn missing_private_key_fails_fast() {
        let err = SignerConfig::from_lookup(lookup(&[(ENV_SIGNER_TYPE, "private-key")])).unwrap_err();
        assert!(err.to_string().contains(ENV_FACILITATOR_PRIVATE_KEY));
    }

    #[test]
    fn kms_config_fills_location_and_version_defaults() {
        let config = SignerConfig::from_lookup(lookup(&[
            (ENV_SIGNER_TYPE, "gcp-kms"),
            (ENV_GCP_KMS_PROJECT, "acme"),
            (ENV_GCP_KMS_KEY_RING, "ring"),
            (ENV_GCP_KMS_KEY, "facilitator"),
        ]))
        .unwrap();
        let SignerConfig::GcpKms { key, access_token } = config else {
            panic!("expected gcp-kms");
        };
        assert_eq!(key.location, "global");
        assert_eq!(key.version, "1");
        assert_eq!(access_token, None);
    }

    #[test]
    fn kms_config_requires_key_ring_and_key() {
        for missing in [ENV_GCP_KMS_PROJECT, ENV_GCP_KMS_KEY_RING, ENV_GCP_KMS_KEY] {
            let pairs: Vec<(&str, &str)> = [
                (ENV_SIGNER_TYPE, "gcp-kms-p256"),
                (ENV_GCP_KMS_PROJECT, "acme"),
                (ENV_GCP_KMS_KEY_RING, "ring"),
                (ENV_GCP_KMS_KEY, "attestor"),
            ]
            .into_iter()
            .filter(|(k, _)| *k != missing)
            .collect();
            let err = SignerConfig::from_lookup(lookup(&pairs)).unwrap_err();
            assert!(err.to_string().contains(missing), "{err}");
        }
    }

    #[test]
    fn p256_spender_is_optional_and_redacted() {
        let config = SignerConfig::from_lookup(lookup(&[
            (ENV_SIGNER_TYPE, "gcp-kms-p256"),
            (ENV_GCP_KMS_PROJECT, "acme"),
            (ENV_GCP_KMS_KEY_RING, "ring"),
            (ENV_GCP_KMS_KEY, "attestor"),
            (ENV_P256_SPENDER_PRIVATE_KEY, "0xdeadbeef"),
            (ENV_GCP_ACCESS_TOKEN, "ya29.secret"),
        ]))
        .unwrap();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("deadbeef"));
        assert!(!rendered.contains("ya29"));
        assert!(matches!(
            config,
            SignerConfig::GcpKmsP256 { spender_key: Some(_), .. }
        ));
    }

    #[test]
    fn unknown_signer_kind_is_rejected() {
        assert!(SignerConfig::from_lookup(lookup(&[(ENV_SIGNER_TYPE, "aws-kms")])).is_err());
    }

    #[test]
    fn settings_default_to_safe_values() {
        let settings = FacilitatorSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, FacilitatorSettings::default());
        assert!(!settings.allow_attested_settlement);
        assert!(!settings.strict_nonce_check);
    }

    #[test]
    fn settings_parse_flags_and_durations() {
        let settings = FacilitatorSettings::from_lookup(lookup(&[
            (ENV_ALLOW_ATTESTED_SETTLEMENT, "true"),
            (ENV_STRICT_NONCE_CHECK, "1"),
            (ENV_RECEIPT_TIMEOUT_SECS, "90"),
            (ENV_RPC_TIMEOUT_SECS, "4"),
            (ENV_MAX_ATTESTED_WINDOW_SECS, "600"),
            (ENV_ATTESTATION_PUBLIC_KEY, "0x0102"),
        ]))
        .unwrap();
        assert!(settings.allow_attested_settlement);
        assert!(settings.strict_nonce_check);
        assert_eq!(settings.receipt_timeout, Duration::from_secs(90));
        assert_eq!(settings.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert_eq!(settings.rpc_timeout, Duration::from_secs(4));
        assert_eq!(settings.max_attested_window_secs, 600);
        assert_eq!(settings.attestation_public_key, Some(vec![1, 2]));
    }

    #[test]
    fn settings_reject_malformed_values() {
        assert!(FacilitatorSettings::from_lookup(lookup(&[(ENV_STRICT_NONCE_CHECK, "maybe")])).is_err());
        assert!(FacilitatorSettings::from_lookup(lookup(&[(ENV_SEND_TIMEOUT_SECS, "0")])).is_err());
        assert!(FacilitatorSettings::from_lookup(lookup(&[(ENV_RPC_TIMEOUT_SECS, "soon")])).is_err());
        assert!(FacilitatorSettings::from_lookup(lookup(&[(ENV_ATTESTATION_PUBLIC_KEY, "zz")])).is_err());
    }
}
