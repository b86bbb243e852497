//! Identity of a watched image.

/// Docker Hub registry API.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Docker Hub token endpoint. `{scope}` is replaced by the repository path.
pub const DEFAULT_TOKEN_TEMPLATE: &str =
    "https://auth.docker.io/token?service=registry.docker.io&scope=repository:{scope}:pull";

/// Field of the manifest `config` descriptor holding the digest.
pub const DEFAULT_DIGEST_FIELD: &str = "digest";

/// Placeholder substituted in the token template.
pub const SCOPE_PLACEHOLDER: &str = "{scope}";

/// What a fetcher watches: one `repository:tag` on one registry, on behalf of
/// one service.
///
/// Built once and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    registry_url: String,
    token_template: String,
    repository: String,
    tag: String,
    service: String,
    digest_field: String,
}

impl FetchTarget {
    /// Create a target on Docker Hub.
    ///
    /// A leading `/` on the repository is ignored.
    pub fn new(
        repository: impl Into<String>,
        tag: impl Into<String>,
        service: impl Into<String>,
    ) -> Self {
        let repository: String = repository.into();
        Self {
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            token_template: DEFAULT_TOKEN_TEMPLATE.to_string(),
            repository: repository.trim_start_matches('/').to_string(),
            tag: tag.into(),
            service: service.into(),
            digest_field: DEFAULT_DIGEST_FIELD.to_string(),
        }
    }

    pub fn with_registry_url(mut self, url: impl Into<String>) -> Self {
        let url: String = url.into();
        self.registry_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_token_template(mut self, template: impl Into<String>) -> Self {
        self.token_template = template.into();
        self
    }

    pub fn with_digest_field(mut self, field: impl Into<String>) -> Self {
        self.digest_field = field.into();
        self
    }

    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn digest_field(&self) -> &str {
        &self.digest_field
    }

    /// Scope requested from the token endpoint.
    pub fn scope(&self) -> &str {
        &self.repository
    }

    /// Token endpoint URL for this target's scope.
    pub fn token_url(&self) -> String {
        self.token_template.replace(SCOPE_PLACEHOLDER, self.scope())
    }

    /// Manifest URL for `repository:tag`.
    pub fn manifest_url(&self) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_url, self.repository, self.tag
        )
    }

    /// Image reference handed to the updater, e.g. `library/redis:latest`.
    pub fn version_ref(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}
