//! Registry access for the autoupdater.
//!
//! Implements the Docker Registry v2 token-auth lookup of an image's config
//! digest:
//!
//! ```text
//! FetchTarget ──token_url()──▶ auth endpoint ──▶ BearerToken
//!             ──manifest_url()─▶ registry (Bearer) ──▶ ManifestDescriptor.digest
//! ```
//!
//! Tokens are not cached; each lookup fetches a fresh one.

mod client;
mod error;
mod manifest;
mod target;
mod token;

pub use client::{RegistryClient, RegistryConfig};
pub use error::RegistryError;
pub use manifest::{ManifestDescriptor, MANIFEST_V2_MEDIA_TYPE};
pub use target::{
    FetchTarget, DEFAULT_DIGEST_FIELD, DEFAULT_REGISTRY_URL, DEFAULT_TOKEN_TEMPLATE,
    SCOPE_PLACEHOLDER,
};
pub use token::BearerToken;
