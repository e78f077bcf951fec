//! OCI-backed package manager.

use std::path::PathBuf;
use std::sync::Arc;

use ukpack_core::component::ComponentType;
use ukpack_core::error::{PackError, Result};

use super::handler::DirectoryHandler;
use super::reference::{hyphenate, ImageReference};
use super::registry::RemoteRegistry;
use crate::pack::{CatalogQuery, PullOptions};

/// Directory under the store root where images are unpacked by default.
const ROOTFS_DIR: &str = "rootfs";

/// Lists and pulls OCI images through a [`DirectoryHandler`].
#[derive(Clone)]
pub struct OciManager {
    handler: DirectoryHandler,
    registry: Arc<dyn RemoteRegistry>,
}

impl OciManager {
    pub fn new(handler: DirectoryHandler, registry: Arc<dyn RemoteRegistry>) -> Self {
        Self { handler, registry }
    }

    pub fn handler(&self) -> &DirectoryHandler {
        &self.handler
    }

    /// List images matching `query`.
    ///
    /// With `no_cache` and a name that carries an explicit registry host, the
    /// image is fetched from that registry. Otherwise the name is matched as a glob
    /// against stored images, with `/` read as `-`.
    pub async fn catalog(&self, query: &CatalogQuery) -> Result<Vec<OciPackage>> {
        if !query.matches_type(Some(ComponentType::App)) {
            return Ok(Vec::new());
        }

        if query.no_cache {
            if let Some(name) = query
                .name
                .as_deref()
                .filter(|n| !is_glob(n) && names_registry(n))
            {
                if let Ok(reference) = ImageReference::parse(name) {
                    let image = self
                        .handler
                        .fetch_image(name, self.registry.as_ref(), None)
                        .await?;
                    tracing::debug!(reference = %image.reference, "Fetched image for catalog");
                    return Ok(vec![self.package(reference)]);
                }
            }
        }

        let pattern = hyphenate(query.name.as_deref().unwrap_or("*"));
        let pattern = glob::Pattern::new(&pattern).map_err(|e| {
            PackError::InvalidReference(format!("invalid name pattern '{}': {}", pattern, e))
        })?;

        let mut packages = Vec::new();
        for stored in self.handler.list_manifests()? {
            let Some(reference) = stored.reference else {
                tracing::debug!(name = %stored.name, "Skipping manifest without a reference name");
                continue;
            };
            if !candidate_names(&stored.name, &reference)
                .iter()
                .any(|c| pattern.matches(c))
            {
                continue;
            }
            if let Some(version) = &query.version {
                if reference.tag.as_deref() != Some(version.as_str()) {
                    continue;
                }
            }
            packages.push(self.package(reference));
        }
        Ok(packages)
    }

    fn package(&self, reference: ImageReference) -> OciPackage {
        OciPackage {
            reference,
            handler: self.handler.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl std::fmt::Debug for OciManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciManager")
            .field("handler", &self.handler)
            .finish_non_exhaustive()
    }
}

/// An OCI image that can be pulled into a directory.
#[derive(Clone)]
pub struct OciPackage {
    reference: ImageReference,
    handler: DirectoryHandler,
    registry: Arc<dyn RemoteRegistry>,
}

impl OciPackage {
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.reference.repository
    }

    pub fn version(&self) -> &str {
        self.reference
            .tag
            .as_deref()
            .or(self.reference.digest.as_deref())
            .unwrap_or_default()
    }

    /// Fetch the image if it is not stored yet, then unpack it.
    ///
    /// Unpacks into `<workdir>/<image>`, or `<store>/rootfs/<image>`
    /// without a workdir, so images never share a tree.
    pub async fn pull(&self, opts: &PullOptions) -> Result<PathBuf> {
        let full = self.reference.full_reference();
        if !self.handler.has_image(&full) {
            self.handler
                .fetch_image(&full, self.registry.as_ref(), opts.on_progress.as_deref())
                .await?;
        }

        let dest = opts
            .workdir
            .clone()
            .unwrap_or_else(|| self.handler.store().root().join(ROOTFS_DIR))
            .join(self.reference.store_name());

        let handler = self.handler.clone();
        let target = dest.clone();
        tokio::task::spawn_blocking(move || handler.unpack_image(&full, &target))
            .await
            .map_err(|e| PackError::Other(format!("Unpack task failed: {}", e)))??;

        Ok(dest)
    }
}

impl std::fmt::Debug for OciPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OciPackage")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

fn is_glob(name: &str) -> bool {
    name.contains(['*', '?', '['])
}

/// Whether the first path component is a registry host.
fn names_registry(name: &str) -> bool {
    match name.split_once('/') {
        Some((host, _)) => host.contains('.') || host.contains(':') || host == "localhost",
        None => false,
    }
}

/// Names a stored image answers to: its file stem, its repository, and
/// the repository's last path component, each with and without the tag.
fn candidate_names(stem: &str, reference: &ImageReference) -> Vec<String> {
    let short = reference
        .repository
        .rsplit('/')
        .next()
        .unwrap_or(&reference.repository);

    let mut names = vec![stem.to_string()];
    for base in [reference.repository.as_str(), short] {
        names.push(hyphenate(base));
        if let Some(tag) = &reference.tag {
            names.push(hyphenate(&format!("{}:{}", base, tag)));
        }
    }
    names
}
