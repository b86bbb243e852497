//! HTTP client for the registry v2 token-auth flow.
//!
//! Two requests per lookup:
//! 1. GET the token endpoint for the target's scope (no credentials).
//! 2. GET the manifest with `Authorization: Bearer <token>`.
//!
//! Neither call is retried here. A timeout is reported as the failure of the
//! step it interrupted.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::RegistryError;
use crate::manifest::{ManifestDescriptor, MANIFEST_V2_MEDIA_TYPE};
use crate::target::FetchTarget;
use crate::token::BearerToken;

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Deadline for each individual HTTP request.
    pub request_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Registry client shared by the token and manifest lookups.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    /// Create a new registry client.
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RegistryError::Setup(e.to_string()))?;

        Ok(Self { client })
    }

    /// Exchange the target's scope for a bearer token.
    pub async fn fetch_token(&self, target: &FetchTarget) -> Result<BearerToken, RegistryError> {
        let url = target.token_url();
        debug!(url = %url, scope = %target.scope(), "Fetching registry token");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RegistryError::AuthFailure(describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::AuthFailure(format!(
                "token endpoint returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::AuthFailure(describe(&e)))?;

        let now = Utc::now();
        let token = BearerToken::from_json(&body, now)?;
        if token.is_expired(now) {
            warn!(expires_at = ?token.expires_at(), "Registry issued an already expired token");
        } else {
            debug!(expires_at = ?token.expires_at(), "Fetched registry token");
        }

        Ok(token)
    }

    /// Fetch the manifest for `repository:tag` and return its config
    /// descriptor.
    pub async fn resolve_descriptor(
        &self,
        target: &FetchTarget,
        token: &BearerToken,
    ) -> Result<ManifestDescriptor, RegistryError> {
        let url = target.manifest_url();
        debug!(url = %url, "Fetching manifest");

        let response = self
            .client
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token.secret()))
            .header(ACCEPT, MANIFEST_V2_MEDIA_TYPE)
            .send()
            .await
            .map_err(|e| RegistryError::ResolveFailure(describe(&e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::ResolveFailure(format!(
                "manifest endpoint returned {status}"
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::ResolveFailure(describe(&e)))?;

        let descriptor = ManifestDescriptor::from_json(&body, target.digest_field())?;
        debug!(
            digest = %descriptor.digest,
            size = ?descriptor.size,
            media_type = ?descriptor.media_type,
            "Resolved config descriptor"
        );

        Ok(descriptor)
    }

    /// Fetch the manifest and return only the config digest.
    pub async fn resolve_digest(
        &self,
        target: &FetchTarget,
        token: &BearerToken,
    ) -> Result<String, RegistryError> {
        self.resolve_descriptor(target, token)
            .await
            .map(|descriptor| descriptor.digest)
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {error}")
    } else {
        error.to_string()
    }
}
