//! Manifest types and multi-platform resolution.
//!
//! A tag resolves either straight to a single-platform manifest that already
//! lists its layers, or to an image index whose entries point at one manifest
//! per platform. For an index the entry matching the target platform is
//! fetched by digest to obtain the concrete, ordered layer list.

use serde::{Deserialize, Serialize};
use skiff_core::error::{Result, SkiffError};

use super::registry::{Endpoint, RegistryClient};

/// Docker distribution manifest v2.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list (multi-platform).
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image index (multi-platform).
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// Content-addressed reference to a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

/// OS/architecture pair in OCI naming (`linux`, `amd64`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub architecture: String,
    pub os: String,
}

impl Platform {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
        }
    }

    /// Platform of the running host, mapped to OCI names.
    pub fn host() -> Self {
        let architecture = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" => "ppc64le",
            other => other,
        };
        Self::new(architecture, std::env::consts::OS)
    }

    /// Parse `os/arch` (e.g. `linux/arm64`).
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().split_once('/') {
            Some((os, arch)) if !os.is_empty() && !arch.is_empty() && !arch.contains('/') => {
                Ok(Self::new(arch, os))
            }
            _ => Err(SkiffError::ConfigError(format!(
                "platform must be os/arch (e.g. linux/amd64), got '{}'",
                value
            ))),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)
    }
}

/// One entry of an image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformManifestRef {
    #[serde(flatten)]
    pub descriptor: Descriptor,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Top-level manifest returned for a tag: either an index or a manifest with layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<PlatformManifestRef>,
    #[serde(default)]
    pub layers: Option<Vec<Descriptor>>,
}

/// Platform-specific manifest listing the layers base-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerManifest {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

/// Pick the index entry whose platform equals `platform` exactly.
pub fn select_platform<'a>(
    index: &'a IndexManifest,
    platform: &Platform,
) -> Result<&'a PlatformManifestRef> {
    index
        .manifests
        .iter()
        .find(|entry| entry.platform.as_ref() == Some(platform))
        .ok_or_else(|| SkiffError::NoMatchingPlatform {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            available: index
                .manifests
                .iter()
                .filter_map(|entry| entry.platform.as_ref())
                .map(|p| p.to_string())
                .collect(),
        })
}

impl RegistryClient {
    /// Resolve `image:reference` to its ordered layer list for this client's platform.
    pub async fn resolve_layers(&self, image: &str, reference: &str) -> Result<Vec<Descriptor>> {
        let mut index: IndexManifest = self
            .fetch_manifest(
                image,
                reference,
                &[
                    MEDIA_TYPE_DOCKER_MANIFEST,
                    MEDIA_TYPE_DOCKER_MANIFEST_LIST,
                    MEDIA_TYPE_OCI_INDEX,
                    MEDIA_TYPE_OCI_MANIFEST,
                ],
            )
            .await?;

        if let Some(layers) = index.layers.take().filter(|layers| !layers.is_empty()) {
            if !index.manifests.is_empty() {
                tracing::warn!(
                    image = %image,
                    reference = %reference,
                    "Manifest lists both platform entries and layers; using layers"
                );
            }
            tracing::debug!(image = %image, layers = layers.len(), "Tag names a single-platform manifest");
            return checked_layers(image, reference, layers);
        }

        let entry = select_platform(&index, self.platform())?;
        if !is_valid_descriptor_digest(&entry.descriptor.digest) {
            return Err(invalid_digest(image, reference, &entry.descriptor.digest));
        }
        tracing::debug!(
            image = %image,
            platform = %self.platform(),
            digest = %entry.descriptor.digest,
            "Selected platform manifest"
        );

        let manifest: LayerManifest = self
            .fetch_manifest(
                image,
                &entry.descriptor.digest,
                &[MEDIA_TYPE_OCI_MANIFEST, MEDIA_TYPE_DOCKER_MANIFEST],
            )
            .await?;

        checked_layers(image, &entry.descriptor.digest, manifest.layers)
    }

    /// GET and decode `/v2/library/<image>/manifests/<reference>`.
    async fn fetch_manifest<T: serde::de::DeserializeOwned>(
        &self,
        image: &str,
        reference: &str,
        accept: &[&str],
    ) -> Result<T> {
        let fetch_err = |status: Option<u16>, message: String| SkiffError::ManifestFetch {
            image: image.to_string(),
            reference: reference.to_string(),
            status,
            message,
        };

        let url = self.url(image, Endpoint::Manifests, reference);
        let request = self
            .authorized_get(image, &url, &accept_header(accept), |m| fetch_err(None, m))
            .await?;

        tracing::debug!(url = %url, "Fetching manifest");
        let response = self
            .execute(request)
            .await
            .map_err(|e| fetch_err(None, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("request failed");
            return Err(fetch_err(Some(status.as_u16()), reason.to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| fetch_err(Some(status.as_u16()), e.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|e| fetch_err(Some(status.as_u16()), format!("undecodable manifest: {}", e)))
    }
}

/// Reject layer lists containing a malformed digest.
///
/// Digests become file names under the root and URL path segments.
fn checked_layers(image: &str, reference: &str, layers: Vec<Descriptor>) -> Result<Vec<Descriptor>> {
    match layers.iter().find(|layer| !is_valid_descriptor_digest(&layer.digest)) {
        Some(layer) => Err(invalid_digest(image, reference, &layer.digest)),
        None => Ok(layers),
    }
}

/// OCI descriptor digest grammar: `algorithm:encoded`, where the algorithm is
/// lowercase alphanumerics joined by `+._-` and the encoded part is `[A-Za-z0-9=_-]+`.
pub fn is_valid_descriptor_digest(digest: &str) -> bool {
    let Some((algorithm, encoded)) = digest.split_once(':') else {
        return false;
    };
    let algorithm_ok = !algorithm.is_empty()
        && algorithm
            .split(|c| "+._-".contains(c))
            .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    let encoded_ok = !encoded.is_empty()
        && encoded
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "=_-".contains(c));
    algorithm_ok && encoded_ok
}

fn invalid_digest(image: &str, reference: &str, digest: &str) -> SkiffError {
    SkiffError::ManifestFetch {
        image: image.to_string(),
        reference: reference.to_string(),
        status: None,
        message: format!("invalid digest '{}'", digest),
    }
}

/// `Accept` value listing media types in decreasing preference.
fn accept_header(media_types: &[&str]) -> String {
    media_types
        .iter()
        .enumerate()
        .map(|(i, media_type)| match i {
            0 => media_type.to_string(),
            _ => format!("{};q=0.{}", media_type, 9 - i.min(8)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
