//! Remote registry access.
//!
//! [`RemoteRegistry`] is the narrow interface the image handler consumes;
//! [`OciDistributionRegistry`] implements it with the `oci-distribution`
//! crate against real registries (Docker Hub, GHCR, unikraft.org, ...).

use std::path::Path;

use async_trait::async_trait;
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::io::AsyncWriteExt;
use ukpack_core::digest::Digest;
use ukpack_core::error::{PackError, Result};

use super::reference::ImageReference;

/// A blob descriptor: media type, content digest and size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: i64,
}

/// An image as resolved from a registry, before any layer is downloaded.
#[derive(Debug, Clone)]
pub struct RemoteImage {
    /// Image manifest exactly as served by the registry
    pub raw_manifest: Vec<u8>,
    /// Digest the registry reported for `raw_manifest`
    pub manifest_digest: Digest,
    /// Raw image configuration JSON
    pub raw_config: Vec<u8>,
    /// Digest of the configuration blob
    pub config_digest: Digest,
    /// Compressed layer descriptors, bottom to top
    pub layers: Vec<BlobDescriptor>,
}

/// Registry client capable of resolving references and streaming blobs.
#[async_trait]
pub trait RemoteRegistry: Send + Sync {
    /// Resolve a reference to its manifest, config and layer descriptors.
    async fn resolve(&self, reference: &ImageReference) -> Result<RemoteImage>;

    /// Download the compressed blob described by `descriptor` into `dest`.
    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        descriptor: &BlobDescriptor,
        dest: &Path,
    ) -> Result<()>;
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(u), Some(p)) => Self::basic(u, p),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// [`RemoteRegistry`] backed by `oci-distribution`.
pub struct OciDistributionRegistry {
    client: Client,
    auth: RegistryAuth,
}

impl OciDistributionRegistry {
    /// Create a registry client with anonymous authentication.
    pub fn new() -> Self {
        Self::with_auth(RegistryAuth::anonymous())
    }

    /// Create a registry client with the given authentication.
    pub fn with_auth(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::Https,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    fn registry_error(reference: &ImageReference, message: String) -> PackError {
        PackError::Registry {
            registry: reference.registry.clone(),
            message,
        }
    }
}

impl Default for OciDistributionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteRegistry for OciDistributionRegistry {
    async fn resolve(&self, reference: &ImageReference) -> Result<RemoteImage> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth.to_oci_auth();

        tracing::info!(reference = %reference, "Resolving image manifest");

        // Resolves multi-arch indexes to the current platform
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| Self::registry_error(reference, format!("Failed to pull manifest: {}", e)))?;

        // The parsed manifest cannot be re-encoded byte for byte, so fetch the
        // platform manifest body again by digest
        let by_digest = Reference::with_digest(
            oci_ref.registry().to_string(),
            oci_ref.repository().to_string(),
            manifest_digest.clone(),
        );
        let (raw_manifest, _) = self
            .client
            .pull_manifest_raw(&by_digest, &auth, &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE])
            .await
            .map_err(|e| Self::registry_error(reference, format!("Failed to pull raw manifest: {}", e)))?;
        let manifest_digest: Digest = manifest_digest.parse()?;
        manifest_digest.verify(&raw_manifest)?;

        let mut raw_config: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut raw_config)
            .await
            .map_err(|e| {
                Self::registry_error(reference, format!("Failed to pull config blob: {}", e))
            })?;

        let config_digest: Digest = manifest.config.digest.parse()?;
        let layers = manifest
            .layers
            .iter()
            .map(|layer| -> Result<BlobDescriptor> {
                Ok(BlobDescriptor {
                    media_type: layer.media_type.clone(),
                    digest: layer.digest.parse()?,
                    size: layer.size,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            reference = %reference,
            digest = %manifest_digest,
            layers = layers.len(),
            "Resolved image"
        );

        Ok(RemoteImage {
            raw_manifest,
            manifest_digest,
            raw_config,
            config_digest,
            layers,
        })
    }

    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        descriptor: &BlobDescriptor,
        dest: &Path,
    ) -> Result<()> {
        let oci_ref = to_oci_reference(reference)?;
        let oci_descriptor = OciDescriptor {
            media_type: descriptor.media_type.clone(),
            digest: descriptor.digest.to_string(),
            size: descriptor.size,
            ..Default::default()
        };

        let mut file = tokio::fs::File::create(dest).await?;
        self.client
            .pull_blob(&oci_ref, &oci_descriptor, &mut file)
            .await
            .map_err(|e| {
                Self::registry_error(
                    reference,
                    format!("Failed to pull blob {}: {}", descriptor.digest, e),
                )
            })?;
        file.flush().await?;
        Ok(())
    }
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.digest, &reference.tag) {
        (Some(digest), _) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (None, Some(tag)) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
    };

    ref_str.parse::<Reference>().map_err(|e| {
        PackError::InvalidReference(format!("invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Pick the linux manifest for the host architecture from a multi-arch index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
