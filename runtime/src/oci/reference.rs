//! Image reference parsing.
//!
//! Parses references like `alpine:3.19` or `ubuntu@sha256:...` into the
//! image name and the tag-or-digest used in `/v2/library/<name>/manifests/<ref>`.
//! Only Docker Hub official (`library/`) images are addressable.

use skiff_core::error::{Result, SkiffError};

/// Default tag when none is specified.
pub const DEFAULT_TAG: &str = "latest";

/// Longest image name accepted.
const MAX_NAME_LEN: usize = 255;

/// Prefixes that still name a Docker Hub official image.
const LIBRARY_PREFIXES: &[&str] = &[
    "docker.io/library/",
    "index.docker.io/library/",
    "registry.hub.docker.com/library/",
    "library/",
];

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Image name inside `library/` (e.g., "alpine")
    pub name: String,
    /// Tag (e.g., "latest", "3.19")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `alpine` → alpine:latest
    /// - `alpine:3.19` → alpine:3.19
    /// - `library/alpine:3.19` / `docker.io/library/alpine:3.19` → alpine:3.19
    /// - `alpine@sha256:abc...` → alpine@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(invalid(reference, "empty image reference"));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !is_valid_digest(digest_part) {
                    return Err(invalid(reference, "expected digest as algorithm:hex"));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // Split tag on the last colon after the last slash
        let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[last_segment_start..].rfind(':') {
            Some(colon) => {
                let colon = last_segment_start + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        let name = strip_library_prefix(name);
        validate_name(reference, name)?;

        if let Some(tag) = &tag {
            validate_tag(reference, tag)?;
        }

        // Apply default tag if no tag and no digest
        let tag = if tag.is_none() && digest.is_none() {
            Some(DEFAULT_TAG.to_string())
        } else {
            tag
        };

        Ok(ImageReference {
            name: name.to_string(),
            tag,
            digest,
        })
    }

    /// The tag-or-digest placed in the manifest URL. A digest wins over a tag.
    pub fn manifest_reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.name.clone();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

fn invalid(reference: &str, message: &str) -> SkiffError {
    SkiffError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

fn strip_library_prefix(name: &str) -> &str {
    LIBRARY_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

fn validate_name(reference: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid(reference, "empty image name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(
            reference,
            &format!("image name exceeds {} bytes", MAX_NAME_LEN),
        ));
    }
    if name.contains('/') {
        return Err(invalid(
            reference,
            "only Docker Hub official images (library/<name>) are supported",
        ));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c);
    if !name.chars().all(allowed) {
        return Err(invalid(reference, "image name contains invalid characters"));
    }
    Ok(())
}

fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    let allowed = |c: char| c.is_ascii_alphanumeric() || "._-".contains(c);
    if tag.is_empty() || tag.len() > 128 || !tag.chars().all(allowed) {
        return Err(invalid(reference, "invalid tag"));
    }
    Ok(())
}

fn is_valid_digest(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((algorithm, hex)) => {
            !algorithm.is_empty()
                && !hex.is_empty()
                && algorithm
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}
