//! The manifest package manager.
//!
//! Keeps a local cache of the configured manifest sources:
//!
//! ```text
//! <manifests-dir>/
//!   index.yaml                  # last_updated + pointers
//!   <type-plural>/<name>.yaml   # one file per manifest
//! ```
//!
//! The index is always replaced as a whole; it is never patched in place.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use ukpack_core::config::ConfigManager;
use ukpack_core::error::{PackError, Result};

use super::package::ManifestPackage;
use super::source::find_manifests_from_source;
use super::types::{Manifest, ManifestIndex};
use crate::pack::CatalogQuery;

/// File name of the top-level index inside the manifests directory.
pub const INDEX_FILE: &str = "index.yaml";

/// Manifest-backed package manager.
#[derive(Debug, Clone)]
pub struct ManifestManager {
    config: Arc<ConfigManager>,
}

impl ManifestManager {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        Self { config }
    }

    /// Directory holding the cached manifests.
    pub fn local_manifests_dir(&self) -> PathBuf {
        self.config.config().paths.manifests
    }

    /// Path of the cached index.
    pub fn local_manifest_index(&self) -> PathBuf {
        self.local_manifests_dir().join(INDEX_FILE)
    }

    /// Configured sources, in precedence order.
    pub fn sources(&self) -> Vec<String> {
        self.config.config().manifests
    }

    /// Fetch every configured source. An unreachable source is logged and
    /// contributes nothing.
    async fn fetch_sources(&self) -> Result<Vec<Manifest>> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(PackError::Config(
                "no manifest sources configured".to_string(),
            ));
        }

        let mut manifests = Vec::new();
        for source in &sources {
            tracing::info!(source = %source, "Fetching manifests");
            match find_manifests_from_source(source).await {
                Ok(found) => manifests.extend(found),
                Err(e) => tracing::warn!(source = %source, error = %e, "Skipping manifest source"),
            }
        }
        Ok(manifests)
    }

    /// Refresh the local cache from all sources.
    ///
    /// A manifest that cannot be written is logged and left out of the
    /// index; failing to write the index itself is fatal.
    pub async fn update(&self) -> Result<ManifestIndex> {
        let manifests = self.fetch_sources().await?;
        self.persist(&manifests)
    }

    fn persist(&self, manifests: &[Manifest]) -> Result<ManifestIndex> {
        let dir = self.local_manifests_dir();
        std::fs::create_dir_all(&dir)?;

        let mut index = ManifestIndex::new();
        let mut used = HashSet::new();
        let mut failed = 0usize;

        for manifest in manifests {
            let relative = unique_relative_path(manifest, &mut used);
            let location = dir.join(&relative);

            tracing::debug!(path = %location.display(), "Saving manifest");
            if let Err(e) = manifest.write_to_file(&location) {
                tracing::error!(
                    manifest = %manifest.name,
                    path = %location.display(),
                    error = %e,
                    "Could not save manifest"
                );
                failed += 1;
                continue;
            }

            index.manifests.push(Manifest {
                name: manifest.name.clone(),
                component_type: manifest.component_type,
                manifest: format!("./{}", relative),
                ..Default::default()
            });
        }

        let index_path = self.local_manifest_index();
        index.write_to_file(&index_path).map_err(|e| {
            PackError::PartialWriteFailure(format!(
                "could not write index {}: {}",
                index_path.display(),
                e
            ))
        })?;

        if failed > 0 {
            tracing::warn!(failed, saved = index.manifests.len(), "Manifest cache partially updated");
        }
        tracing::info!(
            manifests = index.manifests.len(),
            path = %index_path.display(),
            "Updated manifest index"
        );
        Ok(index)
    }

    /// Read the cached index and load the manifests it points at.
    fn load_cached(&self) -> Result<Vec<Manifest>> {
        let dir = self.local_manifests_dir();
        let index = ManifestIndex::from_file(&self.local_manifest_index())?;

        let mut manifests = Vec::with_capacity(index.manifests.len());
        for entry in index.manifests {
            if !entry.is_pointer() {
                if entry.has_safe_name() {
                    manifests.push(entry);
                }
                continue;
            }
            let location = dir.join(entry.manifest.trim_start_matches("./"));
            match Manifest::from_file(&location) {
                Ok(manifest) if manifest.has_safe_name() => manifests.push(manifest),
                Ok(manifest) => tracing::warn!(
                    name = %manifest.name.escape_debug(),
                    path = %location.display(),
                    "Skipping cached manifest with an unusable name"
                ),
                Err(e) => tracing::warn!(
                    manifest = %entry.name,
                    path = %location.display(),
                    error = %e,
                    "Skipping cached manifest"
                ),
            }
        }
        Ok(manifests)
    }

    /// List packages matching `query`.
    ///
    /// With `source` and `no_cache` set, only that source is read. With
    /// `no_cache` alone, the cache is refreshed first. Otherwise the cached
    /// index is used. Filters apply in order: type, source, name glob,
    /// version. A requested version that a manifest does not have yields no
    /// package for it.
    pub async fn catalog(&self, query: &CatalogQuery) -> Result<Vec<ManifestPackage>> {
        let query = query.normalized();

        let manifests = match (&query.source, query.no_cache) {
            (Some(source), true) => find_manifests_from_source(source).await?,
            (None, true) => {
                let manifests = self.fetch_sources().await?;
                self.persist(&manifests)?;
                manifests
            }
            (_, false) => self.load_cached()?,
        };

        let pattern = query
            .name
            .as_deref()
            .map(|name| {
                glob::Pattern::new(name).map_err(|e| {
                    PackError::InvalidReference(format!("invalid name pattern '{}': {}", name, e))
                })
            })
            .transpose()?;

        let sources_dir = self.config.config().paths.sources;
        let mut packages = Vec::new();

        for manifest in manifests {
            if !query.matches_type(manifest.component_type) {
                continue;
            }
            if let Some(source) = &query.source {
                if &manifest.origin != source {
                    continue;
                }
            }
            if let Some(pattern) = &pattern {
                if !pattern.matches(&manifest.name) {
                    continue;
                }
            }

            let selection = match &query.version {
                Some(version) => match manifest.select(version) {
                    Some(selection) => selection,
                    None => {
                        tracing::debug!(
                            manifest = %manifest.name,
                            version = %version,
                            "Requested version not available"
                        );
                        continue;
                    }
                },
                None => match manifest.default_selection() {
                    Some(selection) => selection,
                    None => {
                        tracing::warn!(manifest = %manifest.name, "Manifest has no versions or channels");
                        continue;
                    }
                },
            };

            packages.push(ManifestPackage::new(manifest, selection, &sources_dir));
        }

        Ok(packages)
    }

    /// Add a source. Returns `false` (and changes nothing) if it is
    /// already configured.
    pub fn add_source(&self, source: &str) -> Result<bool> {
        if self.sources().iter().any(|s| s == source) {
            tracing::warn!(source = %source, "Manifest source already saved");
            return Ok(false);
        }

        tracing::info!(source = %source, "Adding manifest source");
        self.config
            .update(|config| config.manifests.push(source.to_string()))?;
        Ok(true)
    }

    /// Remove a source. Returns whether it was configured.
    pub fn remove_source(&self, source: &str) -> Result<bool> {
        let mut removed = false;
        self.config.update(|config| {
            let before = config.manifests.len();
            config.manifests.retain(|s| s != source);
            removed = config.manifests.len() != before;
        })?;

        tracing::info!(source = %source, removed, "Removing manifest source");
        Ok(removed)
    }
}

/// `<type-plural>/<name>.yaml`, suffixed when an earlier source already
/// claimed that path in this update.
fn unique_relative_path(manifest: &Manifest, used: &mut HashSet<String>) -> String {
    let base = manifest.relative_path();
    if used.insert(base.clone()) {
        return base;
    }

    let stem = base.trim_end_matches(".yaml");
    let mut n = 1;
    loop {
        let candidate = format!("{}.{}.yaml", stem, n);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
