//! Directory-backed OCI image handler.
//!
//! Resolves image references against a [`ContentStore`], fetches missing
//! blobs from a [`RemoteRegistry`] and unpacks layers into a rootfs.
//!
//! ```text
//! <root>/manifests/<reference-with-slashes-as-hyphens>.json
//! <root>/manifests/<algorithm>/<hex>
//! <root>/configs/<algorithm>/<hex>
//! <root>/layers/<algorithm>/<hex>
//! ```

use std::path::{Path, PathBuf};

use oci_spec::image::{ImageConfiguration, ImageManifest};
use ukpack_core::digest::Digest;
use ukpack_core::error::{PackError, Result};

use super::layers::extract_layer;
use super::reference::ImageReference;
use super::registry::RemoteRegistry;
use super::store::{BlobKind, ContentStore};

/// Progress callback receiving the completed fraction (0.0 to 1.0).
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Annotation recording the reference a stored manifest was fetched as.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// A reference manifest found in the store.
#[derive(Debug, Clone)]
pub struct StoredManifest {
    /// File stem under `manifests/`
    pub name: String,
    /// Reference recorded at fetch time, if any
    pub reference: Option<ImageReference>,
    pub manifest: ImageManifest,
}

/// An image whose manifest and config are present locally.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub reference: ImageReference,
    pub manifest: ImageManifest,
    pub config: ImageConfiguration,
}

impl ResolvedImage {
    /// Pair each config `DiffID` with the stored blob digest of the layer at
    /// the same position, bottom layer first.
    pub fn layer_pairs(&self) -> Result<Vec<(Digest, Digest)>> {
        let diff_ids = self.config.rootfs().diff_ids();
        let layers = self.manifest.layers();
        if diff_ids.len() != layers.len() {
            return Err(PackError::Other(format!(
                "image {} lists {} diff ids but {} layers",
                self.reference,
                diff_ids.len(),
                layers.len()
            )));
        }

        diff_ids
            .iter()
            .zip(layers.iter())
            .map(|(diff_id, layer)| -> Result<(Digest, Digest)> {
                Ok((diff_id.parse()?, layer.digest().parse()?))
            })
            .collect()
    }
}

/// OCI image handler over a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryHandler {
    store: ContentStore,
}

impl DirectoryHandler {
    /// Open a handler rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            store: ContentStore::new(root)?,
        })
    }

    /// The underlying content store.
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Where the manifest for `reference` lives.
    pub fn manifest_path(&self, reference: &ImageReference) -> PathBuf {
        self.manifests_dir()
            .join(format!("{}.json", reference.store_name()))
    }

    fn manifests_dir(&self) -> PathBuf {
        self.store.root().join(BlobKind::Manifest.dir_name())
    }

    /// Resolve a reference to its locally stored manifest and config.
    pub fn resolve_image(&self, reference: &str) -> Result<ResolvedImage> {
        let reference = ImageReference::parse(reference)?;

        let manifest_path = self.manifest_path(&reference);
        let raw_manifest = std::fs::read(&manifest_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PackError::not_found("manifest", reference.full_reference())
            } else {
                PackError::Io(e)
            }
        })?;
        let manifest: ImageManifest = serde_json::from_slice(&raw_manifest)?;

        let config_digest: Digest = manifest.config().digest().parse()?;
        let raw_config = self
            .store
            .read(BlobKind::Config, &config_digest)
            .map_err(|e| match e {
                PackError::NotFound { .. } => PackError::not_found(
                    "config",
                    format!("{} ({})", config_digest, reference),
                ),
                other => other,
            })?;
        let config: ImageConfiguration = serde_json::from_slice(&raw_config)?;

        Ok(ResolvedImage {
            reference,
            manifest,
            config,
        })
    }

    /// Whether an image is resolvable locally.
    pub fn has_image(&self, reference: &str) -> bool {
        self.resolve_image(reference).is_ok()
    }

    /// Fetch an image from `registry` into the store.
    ///
    /// Config and layers are stored first; the reference manifest is written
    /// last, so a failed fetch never leaves a resolvable but incomplete image.
    /// Layers already present are not downloaded again.
    pub async fn fetch_image(
        &self,
        reference: &str,
        registry: &dyn RemoteRegistry,
        on_progress: Option<ProgressFn<'_>>,
    ) -> Result<ResolvedImage> {
        let parsed = ImageReference::parse(reference)?;
        let remote = registry.resolve(&parsed).await?;

        self.store
            .put(BlobKind::Config, &remote.config_digest, &remote.raw_config)?;

        let total = remote.layers.len().max(1) as f64;
        for (i, layer) in remote.layers.iter().enumerate() {
            if self.store.exists(BlobKind::Layer, &layer.digest) {
                tracing::debug!(digest = %layer.digest, "Layer already present");
            } else {
                tracing::info!(digest = %layer.digest, size = layer.size, "Fetching layer");
                let partial = tempfile::NamedTempFile::new_in(self.store.root())?;
                let partial_path = partial.into_temp_path();
                registry.fetch_blob(&parsed, layer, &partial_path).await?;
                let downloaded = partial_path.keep().map_err(|e| {
                    PackError::Other(format!("Failed to keep downloaded layer: {}", e))
                })?;
                if let Err(e) = self
                    .store
                    .ingest_file(BlobKind::Layer, &layer.digest, &downloaded)
                {
                    let _ = std::fs::remove_file(&downloaded);
                    return Err(e);
                }
            }
            if let Some(progress) = on_progress {
                progress((i + 1) as f64 / total);
            }
        }

        let manifest_digest = &remote.manifest_digest;
        self.store
            .put(BlobKind::Manifest, manifest_digest, &remote.raw_manifest)?;
        self.write_reference_manifest(&parsed, &remote.raw_manifest)?;

        tracing::info!(
            reference = %parsed,
            manifest = %manifest_digest,
            layers = remote.layers.len(),
            "Fetched image"
        );

        self.resolve_image(reference)
    }

    /// Write the per-reference manifest, annotated with the reference name.
    /// The digest-addressed copy keeps the registry's bytes untouched.
    fn write_reference_manifest(&self, reference: &ImageReference, raw: &[u8]) -> Result<()> {
        let mut document: serde_json::Value = serde_json::from_slice(raw)?;
        if let Some(object) = document.as_object_mut() {
            let annotations = object
                .entry("annotations")
                .or_insert_with(|| serde_json::json!({}));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations.insert(
                    REF_NAME_ANNOTATION.to_string(),
                    serde_json::Value::String(reference.full_reference()),
                );
            }
        }

        let dir = self.manifests_dir();
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer(&mut tmp, &document)?;
        let target = self.manifest_path(reference);
        tmp.persist(&target).map_err(|e| {
            PackError::Other(format!(
                "Failed to write manifest {}: {}",
                target.display(),
                e.error
            ))
        })?;
        Ok(())
    }

    /// Unpack an image's layers into `dest`, bottom layer first.
    ///
    /// Any missing blob or extraction failure aborts the unpack; a partially
    /// populated `dest` must then be treated as unusable.
    pub fn unpack_image(&self, reference: &str, dest: &Path) -> Result<ResolvedImage> {
        let image = self.resolve_image(reference)?;

        for (diff_id, blob) in image.layer_pairs()? {
            let layer_path = self.store.path(BlobKind::Layer, &blob);
            if !layer_path.is_file() {
                return Err(PackError::not_found("layer", blob.to_string()));
            }
            extract_layer(&layer_path, Some(&diff_id), dest)?;
        }

        tracing::info!(
            reference = %image.reference,
            dest = %dest.display(),
            "Unpacked image"
        );
        Ok(image)
    }

    /// List the reference manifests stored locally, sorted by file stem.
    pub fn list_manifests(&self) -> Result<Vec<StoredManifest>> {
        let dir = self.manifests_dir();
        let mut manifests = Vec::new();
        if !dir.is_dir() {
            return Ok(manifests);
        }

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let manifest: ImageManifest = match std::fs::read(&path)
                .map_err(PackError::from)
                .and_then(|raw| serde_json::from_slice(&raw).map_err(PackError::from))
            {
                Ok(manifest) => manifest,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable image manifest");
                    continue;
                }
            };
            let reference = manifest
                .annotations()
                .as_ref()
                .and_then(|a| a.get(REF_NAME_ANNOTATION))
                .and_then(|r| ImageReference::parse(r).ok());
            manifests.push(StoredManifest {
                name: stem,
                reference,
                manifest,
            });
        }

        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }

    /// Whether any stored manifest references `digest` as its config.
    pub fn digest_exists(&self, digest: &Digest) -> Result<bool> {
        let wanted = digest.to_string();
        Ok(self
            .list_manifests()?
            .iter()
            .any(|stored| stored.manifest.config().digest() == &wanted))
    }

    /// Push an image to a registry.
    pub async fn push_image(&self, reference: &str) -> Result<()> {
        Err(PackError::NotImplemented(format!(
            "pushing {} from a directory handler",
            reference
        )))
    }

    /// Finalize a locally assembled image.
    pub fn finalize_image(&self, reference: &str) -> Result<()> {
        Err(PackError::NotImplemented(format!(
            "finalizing {} in a directory handler",
            reference
        )))
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    //! Fixtures shared by OCI tests: an in-memory registry and a helper that
    //! seeds a handler directly.

    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::oci::layers::tests::gzip;
    use crate::oci::registry::{BlobDescriptor, RemoteImage};

    const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

    /// Build a manifest/config/blob set from uncompressed layer tars.
    pub(crate) fn image_from_layers(tars: &[Vec<u8>]) -> (RemoteImage, HashMap<Digest, Vec<u8>>) {
        let mut blobs = HashMap::new();
        let mut layers = Vec::new();
        let mut diff_ids = Vec::new();

        for tar in tars {
            let compressed = gzip(tar);
            let digest = Digest::sha256(&compressed);
            layers.push(BlobDescriptor {
                media_type: LAYER_MEDIA_TYPE.to_string(),
                digest: digest.clone(),
                size: compressed.len() as i64,
            });
            diff_ids.push(Digest::sha256(tar).to_string());
            blobs.insert(digest, compressed);
        }

        let raw_config = serde_json::to_vec(&serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "config": {},
            "rootfs": { "type": "layers", "diff_ids": diff_ids },
            "history": []
        }))
        .unwrap();
        let config_digest = Digest::sha256(&raw_config);

        let raw_manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest.to_string(),
                "size": raw_config.len()
            },
            "layers": layers.iter().map(|l| serde_json::json!({
                "mediaType": l.media_type,
                "digest": l.digest.to_string(),
                "size": l.size
            })).collect::<Vec<_>>()
        }))
        .unwrap();

        let manifest_digest = Digest::sha256(&raw_manifest);
        (
            RemoteImage {
                raw_manifest,
                manifest_digest,
                raw_config,
                config_digest,
                layers,
            },
            blobs,
        )
    }

    /// Registry serving one image from memory and counting blob downloads.
    pub(crate) struct FakeRegistry {
        pub image: RemoteImage,
        pub blobs: HashMap<Digest, Vec<u8>>,
        pub blob_fetches: AtomicUsize,
        pub fail_blobs: bool,
    }

    impl FakeRegistry {
        pub(crate) fn new(tars: &[Vec<u8>]) -> Self {
            let (image, blobs) = image_from_layers(tars);
            Self {
                image,
                blobs,
                blob_fetches: AtomicUsize::new(0),
                fail_blobs: false,
            }
        }

        pub(crate) fn fetches(&self) -> usize {
            self.blob_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteRegistry for FakeRegistry {
        async fn resolve(&self, _reference: &ImageReference) -> Result<RemoteImage> {
            Ok(self.image.clone())
        }

        async fn fetch_blob(
            &self,
            reference: &ImageReference,
            descriptor: &BlobDescriptor,
            dest: &Path,
        ) -> Result<()> {
            self.blob_fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_blobs {
                return Err(PackError::Registry {
                    registry: reference.registry.clone(),
                    message: "connection reset".to_string(),
                });
            }
            let data = self
                .blobs
                .get(&descriptor.digest)
                .ok_or_else(|| PackError::not_found("blob", descriptor.digest.to_string()))?;
            std::fs::write(dest, data)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testutil::FakeRegistry;
    use super::*;
    use crate::oci::layers::tests::tar_bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const REF: &str = "unikraft.org/helloworld:0.16";

    #[tokio::test]
    async fn test_fetch_then_resolve() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[tar_bytes(&[("etc/x", b"1")])]);

        handler.fetch_image(REF, &registry, None).await.unwrap();

        let manifest_file = tmp
            .path()
            .join("manifests")
            .join("unikraft.org-helloworld:0.16.json");
        assert!(manifest_file.is_file());

        let image = handler.resolve_image(REF).unwrap();
        assert_eq!(image.manifest.layers().len(), 1);
        assert_eq!(image.config.rootfs().diff_ids().len(), 1);
        assert!(handler
            .store()
            .exists(BlobKind::Config, &registry.image.config_digest));
    }

    #[tokio::test]
    async fn test_fetch_skips_present_layers() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[
            tar_bytes(&[("a", b"1")]),
            tar_bytes(&[("b", b"2")]),
        ]);

        handler.fetch_image(REF, &registry, None).await.unwrap();
        assert_eq!(registry.fetches(), 2);

        handler.fetch_image(REF, &registry, None).await.unwrap();
        assert_eq!(registry.fetches(), 2);
    }

    #[tokio::test]
    async fn test_fetch_reports_progress() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[
            tar_bytes(&[("a", b"1")]),
            tar_bytes(&[("b", b"2")]),
        ]);
        let calls = AtomicUsize::new(0);
        let progress = |fraction: f64| {
            assert!(fraction > 0.0 && fraction <= 1.0);
            calls.fetch_add(1, Ordering::SeqCst);
        };

        handler
            .fetch_image(REF, &registry, Some(&progress))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_image_unresolvable() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let mut registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        registry.fail_blobs = true;

        assert!(handler.fetch_image(REF, &registry, None).await.is_err());
        assert!(handler.resolve_image(REF).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_manifest_blob_keeps_registry_bytes() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let mut registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        // Whitespace and key order a re-encode would not reproduce
        let pretty = serde_json::to_vec_pretty(
            &serde_json::from_slice::<serde_json::Value>(&registry.image.raw_manifest).unwrap(),
        )
        .unwrap();
        registry.image.manifest_digest = Digest::sha256(&pretty);
        registry.image.raw_manifest = pretty.clone();

        handler.fetch_image(REF, &registry, None).await.unwrap();

        let stored = handler
            .store()
            .read(BlobKind::Manifest, &registry.image.manifest_digest)
            .unwrap();
        assert_eq!(stored, pretty);
    }

    #[tokio::test]
    async fn test_fetch_rejects_manifest_digest_mismatch() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let mut registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        registry.image.manifest_digest = Digest::sha256(b"something else");

        let err = handler.fetch_image(REF, &registry, None).await.unwrap_err();
        assert!(matches!(err, PackError::DigestMismatch { .. }));
        assert!(handler.resolve_image(REF).unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_skips_corrupt_manifest() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        handler.fetch_image(REF, &registry, None).await.unwrap();
        std::fs::write(tmp.path().join("manifests/broken.json"), "{ not json").unwrap();

        let stored = handler.list_manifests().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].name, "unikraft.org-helloworld:0.16");
        assert!(handler.digest_exists(&registry.image.config_digest).unwrap());
    }

    #[test]
    fn test_resolve_missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let err = handler.resolve_image("nginx:latest").unwrap_err();
        assert!(matches!(err, PackError::NotFound { ref kind, .. } if kind == "manifest"));
    }

    #[test]
    fn test_resolve_invalid_reference() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let err = handler.resolve_image("nginx@nodigest").unwrap_err();
        assert!(matches!(err, PackError::InvalidReference(_)));
    }

    #[tokio::test]
    async fn test_resolve_missing_config() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        handler.fetch_image(REF, &registry, None).await.unwrap();

        handler
            .store()
            .delete(BlobKind::Config, &registry.image.config_digest)
            .unwrap();

        let err = handler.resolve_image(REF).unwrap_err();
        assert!(matches!(err, PackError::NotFound { ref kind, .. } if kind == "config"));
    }

    #[tokio::test]
    async fn test_unpack_last_layer_wins() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path().join("oci")).unwrap();
        let registry = FakeRegistry::new(&[
            tar_bytes(&[("etc/", b""), ("etc/x", b"1")]),
            tar_bytes(&[("etc/x", b"2")]),
        ]);
        handler.fetch_image(REF, &registry, None).await.unwrap();

        let rootfs = tmp.path().join("rootfs");
        handler.unpack_image(REF, &rootfs).unwrap();

        assert_eq!(std::fs::read_to_string(rootfs.join("etc/x")).unwrap(), "2");
    }

    #[tokio::test]
    async fn test_unpack_missing_layer_fails() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path().join("oci")).unwrap();
        let registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        handler.fetch_image(REF, &registry, None).await.unwrap();

        handler
            .store()
            .delete(BlobKind::Layer, &registry.image.layers[0].digest)
            .unwrap();

        let err = handler
            .unpack_image(REF, &tmp.path().join("rootfs"))
            .unwrap_err();
        assert!(matches!(err, PackError::NotFound { ref kind, .. } if kind == "layer"));
    }

    #[tokio::test]
    async fn test_list_manifests_and_digest_exists() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        let registry = FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]);
        handler.fetch_image(REF, &registry, None).await.unwrap();

        let manifests = handler.list_manifests().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].name, "unikraft.org-helloworld:0.16");
        assert_eq!(
            manifests[0].reference.as_ref().map(|r| r.full_reference()),
            Some("unikraft.org/helloworld:0.16".to_string())
        );
        assert!(handler.digest_exists(&registry.image.config_digest).unwrap());
        assert!(!handler.digest_exists(&Digest::sha256(b"other")).unwrap());
    }

    #[tokio::test]
    async fn test_push_and_finalize_not_implemented() {
        let tmp = TempDir::new().unwrap();
        let handler = DirectoryHandler::new(tmp.path()).unwrap();
        assert!(matches!(
            handler.push_image(REF).await,
            Err(PackError::NotImplemented(_))
        ));
        assert!(matches!(
            handler.finalize_image(REF),
            Err(PackError::NotImplemented(_))
        ));
    }
}
