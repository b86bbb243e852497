//! Configuration for the autoupdater.

use std::time::Duration;

use anyhow::{Context, Result};
use autoupdater_registry::{
    FetchTarget, RegistryConfig, DEFAULT_DIGEST_FIELD, DEFAULT_REGISTRY_URL,
    DEFAULT_TOKEN_TEMPLATE,
};

/// Autoupdater configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Logical name of the service to update.
    pub service: String,

    /// Image repository path, e.g. `library/redis`.
    pub repository: String,

    /// Tag to watch.
    pub tag: String,

    /// Registry API base URL.
    pub registry_url: String,

    /// Token endpoint URL with a `{scope}` placeholder.
    pub token_template: String,

    /// Field of the manifest config descriptor holding the digest.
    pub digest_field: String,

    /// Time between polls.
    pub poll_interval: Duration,

    /// Deadline for each registry request.
    pub request_timeout: Duration,

    /// Update command template; `None` runs in dry-run mode.
    pub update_command: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{key} must be set"))
        };
        let seconds = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => {
                    let secs: u64 = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("{key} is not a number of seconds: {raw:?}"))?;
                    anyhow::ensure!(secs > 0, "{key} must be greater than zero");
                    Ok(Duration::from_secs(secs))
                }
                None => Ok(Duration::from_secs(default)),
            }
        };

        let service = required("AUTOUPDATER_SERVICE")?;
        let repository = required("AUTOUPDATER_REPOSITORY")?;

        let tag = lookup("AUTOUPDATER_TAG").unwrap_or_else(|| "latest".to_string());

        let registry_url = lookup("AUTOUPDATER_REGISTRY_URL")
            .unwrap_or_else(|| DEFAULT_REGISTRY_URL.to_string());

        let token_template = lookup("AUTOUPDATER_TOKEN_TEMPLATE")
            .unwrap_or_else(|| DEFAULT_TOKEN_TEMPLATE.to_string());

        let digest_field = lookup("AUTOUPDATER_DIGEST_FIELD")
            .unwrap_or_else(|| DEFAULT_DIGEST_FIELD.to_string());

        let poll_interval = seconds("AUTOUPDATER_INTERVAL_SECS", 60)?;
        let request_timeout = seconds("AUTOUPDATER_REQUEST_TIMEOUT_SECS", 30)?;

        let update_command =
            lookup("AUTOUPDATER_UPDATE_COMMAND").filter(|v| !v.trim().is_empty());

        let log_level = lookup("AUTOUPDATER_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            service,
            repository,
            tag,
            registry_url,
            token_template,
            digest_field,
            poll_interval,
            request_timeout,
            update_command,
            log_level,
        })
    }

    /// The image this configuration watches.
    pub fn fetch_target(&self) -> FetchTarget {
        FetchTarget::new(&self.repository, &self.tag, &self.service)
            .with_registry_url(&self.registry_url)
            .with_token_template(&self.token_template)
            .with_digest_field(&self.digest_field)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            request_timeout: self.request_timeout,
        }
    }
}
