//! Error types for registry access.

use thiserror::Error;

/// Errors returned by the registry client.
///
/// Each variant covers every way its step can fail (network, status code,
/// body shape, timeout). The message is for logs; callers only match on the
/// variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Bearer token acquisition failed.
    #[error("registry authentication failed: {0}")]
    AuthFailure(String),

    /// Manifest fetch or digest extraction failed.
    #[error("digest resolution failed: {0}")]
    ResolveFailure(String),

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Setup(String),
}

impl RegistryError {
    /// Returns true if this error came from the token endpoint.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, RegistryError::AuthFailure(_))
    }

    /// Returns true if this error came from the manifest endpoint.
    pub fn is_resolve_failure(&self) -> bool {
        matches!(self, RegistryError::ResolveFailure(_))
    }
}
