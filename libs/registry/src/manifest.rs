//! Manifest config descriptor extraction.

use serde_json::Value;

use crate::error::RegistryError;

/// Media type requested from the manifest endpoint.
pub const MANIFEST_V2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The `config` descriptor of an image manifest.
///
/// Only `digest` drives change detection; `size` and `media_type` are kept
/// for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestDescriptor {
    pub digest: String,
    pub size: Option<u64>,
    pub media_type: Option<String>,
}

impl ManifestDescriptor {
    /// Parse a manifest body and read `config.<digest_field>`.
    pub(crate) fn from_json(body: &[u8], digest_field: &str) -> Result<Self, RegistryError> {
        let manifest: Value = serde_json::from_slice(body)
            .map_err(|e| RegistryError::ResolveFailure(format!("invalid manifest: {e}")))?;

        let config = manifest
            .get("config")
            .ok_or_else(|| RegistryError::ResolveFailure("manifest has no config".to_string()))?;

        let digest = config
            .get(digest_field)
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RegistryError::ResolveFailure(format!("manifest has no config.{digest_field}"))
            })?
            .to_string();

        Ok(Self {
            digest,
            size: config.get("size").and_then(Value::as_u64),
            media_type: config
                .get("mediaType")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}
