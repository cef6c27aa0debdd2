//! Remote key-management backend.
//!
//! [`KmsBackend`] is the seam between the KMS signers and the service that
//! holds the key. [`GcpKmsClient`] talks to Google Cloud KMS over its REST API;
//! tests substitute an in-process key.

use std::fmt;
use std::time::{Duration, Instant};

use alloy::primitives::B256;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::X402Error;

const KMS_BASE_URL: &str = "https://cloudkms.googleapis.com/v1";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const KMS_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Refresh metadata tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Fully qualified Cloud KMS key version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsKeyName {
    pub project: String,
    pub location: String,
    pub key_ring: String,
    pub key: String,
    pub version: String,
}

impl KmsKeyName {
    /// `projects/…/locations/…/keyRings/…/cryptoKeys/…/cryptoKeyVersions/…`
    pub fn resource_name(&self) -> String {
        format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}/cryptoKeyVersions/{}",
            self.project, self.location, self.key_ring, self.key, self.version
        )
    }
}

impl fmt::Display for KmsKeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_name())
    }
}

/// Public half of a KMS key, as the service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct KmsPublicKey {
    /// SubjectPublicKeyInfo PEM.
    pub pem: String,
    /// e.g. `EC_SIGN_SECP256K1_SHA256`.
    pub algorithm: String,
}

/// A service that signs 32-byte digests with a key it never releases.
#[async_trait]
pub trait KmsBackend: Send + Sync {
    async fn public_key(&self, key: &KmsKeyName) -> Result<KmsPublicKey, X402Error>;

    /// Sign `digest` and return the DER-encoded `(r, s)` signature.
    async fn sign_digest(&self, key: &KmsKeyName, digest: &B256) -> Result<Vec<u8>, X402Error>;
}

/// Google Cloud KMS REST client.
pub struct GcpKmsClient {
    http: reqwest::Client,
    base_url: String,
    tokens: AccessTokenSource,
}

enum AccessTokenSource {
    Static(String),
    Metadata(Mutex<Option<CachedToken>>),
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct AsymmetricSignResponse {
    signature: String,
}

impl GcpKmsClient {
    /// With `access_token` set, every request uses it. Otherwise tokens come
    /// from the GCE/Cloud Run metadata server and are cached until near expiry.
    pub fn new(access_token: Option<String>) -> Result<Self, X402Error> {
        let http = reqwest::Client::builder()
            .timeout(KMS_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| X402Error::KmsError(format!("failed to build HTTP client: {e}")))?;
        let tokens = match access_token {
            Some(token) => AccessTokenSource::Static(token),
            None => AccessTokenSource::Metadata(Mutex::new(None)),
        };
        Ok(Self {
            http,
            base_url: KMS_BASE_URL.to_string(),
            tokens,
        })
    }

    /// Point at a different endpoint (regional endpoint or emulator).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String, X402Error> {
        let cache = match &self.tokens {
            AccessTokenSource::Static(token) => return Ok(token.clone()),
            AccessTokenSource::Metadata(cache) => cache,
        };

        let mut cached = cache.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| X402Error::KmsError(format!("metadata token request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(X402Error::KmsError(format!(
                "metadata server returned {}",
                resp.status()
            )));
        }
        let token: MetadataToken = resp
            .json()
            .await
            .map_err(|e| X402Error::KmsError(format!("metadata token parse failed: {e}")))?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!(expires_in = token.expires_in, "refreshed KMS access token");
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            refresh_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn check_status(resp: reqwest::Response, what: &str) -> Result<reqwest::Response, X402Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(X402Error::KmsError(format!("{what} returned {status}: {body}")))
    }
}

#[async_trait]
impl KmsBackend for GcpKmsClient {
    async fn public_key(&self, key: &KmsKeyName) -> Result<KmsPublicKey, X402Error> {
        let url = format!("{}/{}/publicKey", self.base_url, key.resource_name());
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| X402Error::KmsError(format!("publicKey request failed: {e}")))?;
        Self::check_status(resp, "publicKey")
            .await?
            .json::<KmsPublicKey>()
            .await
            .map_err(|e| X402Error::KmsError(format!("publicKey response parse failed: {e}")))
    }

    async fn sign_digest(&self, key: &KmsKeyName, digest: &B256) -> Result<Vec<u8>, X402Error> {
        let url = format!("{}/{}:asymmetricSign", self.base_url, key.resource_name());
        let body = serde_json::json!({
            "digest": { "sha256": BASE64.encode(digest.as_slice()) }
        });
        let token = self.access_token().await?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| X402Error::KmsError(format!("asymmetricSign request failed: {e}")))?;
        let signed: AsymmetricSignResponse = Self::check_status(resp, "asymmetricSign")
            .await?
            .json()
            .await
            .map_err(|e| X402Error::KmsError(format!("asymmetricSign response parse failed: {e}")))?;
        BASE64
            .decode(signed.signature)
            .map_err(|e| X402Error::KmsError(format!("asymmetricSign returned invalid base64: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_name_is_fully_qualified() {
        let key = KmsKeyName {
            project: "acme".into(),
            location: "global".into(),
            key_ring: "payments".into(),
            key: "facilitator".into(),
            version: "3".into(),
        };
        assert_eq!(
            key.to_string(),
            "projects/acme/locations/global/keyRings/payments/cryptoKeys/facilitator/cryptoKeyVersions/3"
        );
    }

    #[test]
    fn base_url_override_drops_trailing_slash() {
        let client = GcpKmsClient::new(Some("token".into()))
            .unwrap()
            .with_base_url("http://localhost:9011/v1/");
        assert_eq!(client.base_url, "http://localhost:9011/v1");
    }
}
