//! OCI image reference parsing.
//!
//! Parses image references like `unikraft.org/nginx:1.25` into structured components.

use ukpack_core::error::{PackError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed OCI image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "unikraft.org", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "unikraft/helloworld")
    pub repository: String,
    /// Tag (e.g., "latest", "0.16")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `unikraft.org/nginx:1.25` → unikraft.org/nginx:1.25
    /// - `localhost:5000/app` → localhost:5000/app:latest
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PackError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }
        if reference.chars().any(|c| c.is_whitespace()) {
            return Err(PackError::InvalidReference(format!(
                "image reference '{}' contains whitespace",
                reference
            )));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(PackError::InvalidReference(format!(
                        "invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() {
            return Err(PackError::InvalidReference(format!(
                "missing repository in reference '{}'",
                reference
            )));
        }
        if matches!(tag, Some(t) if t.is_empty()) {
            return Err(PackError::InvalidReference(format!(
                "empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = Self::split_registry_repository(name)?;

        // Apply default tag if no tag and no digest
        let tag = match (tag, &digest) {
            (Some(t), _) => Some(t.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> Result<(String, String)> {
        // The first component is a registry if it looks like a hostname
        // (contains a dot or colon, or is "localhost")
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                if rest.is_empty() {
                    return Err(PackError::InvalidReference(format!(
                        "empty repository in reference '{}'",
                        name
                    )));
                }
                return Ok((first.to_string(), rest.to_string()));
            }
        }

        if name.split('/').any(|part| part.is_empty()) {
            return Err(PackError::InvalidReference(format!(
                "empty path component in reference '{}'",
                name
            )));
        }

        let repository = if name.contains('/') {
            name.to_string()
        } else {
            format!("library/{}", name)
        };

        Ok((DEFAULT_REGISTRY.to_string(), repository))
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
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

    /// File stem under which this image's manifest is stored: the full
    /// reference with every `/` replaced by `-`.
    pub fn store_name(&self) -> String {
        hyphenate(&self.full_reference())
    }
}

/// Replace path separators so a reference can be used as a single file name.
pub fn hyphenate(name: &str) -> String {
    name.replace('/', "-")
}

/// Split `name[:tag]`, where the tag colon must come after the last `/` and a
/// purely numeric suffix without a slash is a registry port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    let last_segment = &name_tag[last_segment_start..];

    match last_segment.rfind(':') {
        Some(colon) => {
            let tag = &last_segment[colon + 1..];
            let looks_like_port =
                last_segment_start == 0 && !tag.is_empty() && tag.chars().all(|c| c.is_ascii_digit());
            if looks_like_port {
                (name_tag, None)
            } else {
                (&name_tag[..last_segment_start + colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("1.25".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("unikraft.org/helloworld:0.16").unwrap();
        assert_eq!(r.registry, "unikraft.org");
        assert_eq!(r.repository, "helloworld");
        assert_eq!(r.tag, Some("0.16".to_string()));
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("ghcr.io/org/app:v1@sha256:abcdef").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest, Some("sha256:abcdef".to_string()));
    }

    #[test]
    fn test_parse_digest_only_has_no_default_tag() {
        let r = ImageReference::parse("ghcr.io/org/app@sha256:abcdef").unwrap();
        assert_eq!(r.tag, None);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("nginx@invaliddigest").is_err());
        assert!(ImageReference::parse("nginx:").is_err());
        assert!(ImageReference::parse("ghcr.io/").is_err());
        assert!(ImageReference::parse("a//b").is_err());
        assert!(ImageReference::parse("has space").is_err());
    }

    #[test]
    fn test_store_name_replaces_slashes() {
        let r = ImageReference::parse("unikraft.org/nginx:1.25").unwrap();
        assert_eq!(r.store_name(), "unikraft.org-nginx:1.25");
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.store_name(), "docker.io-library-nginx:latest");
    }

    #[test]
    fn test_display() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/nginx:1.25");
    }
}
