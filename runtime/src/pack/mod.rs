//! Packages and the package manager registry.
//!
//! A [`Package`] is a tagged union over the supported backends; every
//! operation dispatches on the variant. [`PackageManagers`] is built once at
//! startup and passed to whoever needs to resolve packages.

mod bulk;
mod query;

use std::path::PathBuf;
use std::sync::Arc;

use ukpack_core::component::ComponentType;
use ukpack_core::config::ConfigManager;
use ukpack_core::error::{PackError, Result};

use crate::manifest::{ManifestManager, ManifestPackage};
use crate::oci::{DirectoryHandler, OciDistributionRegistry, OciManager, OciPackage, RemoteRegistry};

pub use bulk::{pull_all, PullReport};
pub use query::{guess_type_name_version, CatalogQuery};

/// Progress callback receiving the completed fraction (0.0 to 1.0).
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Package backend discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PackageFormat {
    Manifest,
    Oci,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Manifest => "manifest",
            PackageFormat::Oci => "oci",
        }
    }
}

impl std::fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for pulling a package.
#[derive(Clone, Default)]
pub struct PullOptions {
    /// Destination root; each backend has its own default
    pub workdir: Option<PathBuf>,
    pub on_progress: Option<ProgressCallback>,
}

impl PullOptions {
    pub(crate) fn report(&self, fraction: f64) {
        if let Some(progress) = &self.on_progress {
            progress(fraction);
        }
    }
}

impl std::fmt::Debug for PullOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullOptions")
            .field("workdir", &self.workdir)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// A resolved package.
#[derive(Debug, Clone)]
pub enum Package {
    Manifest(ManifestPackage),
    Oci(OciPackage),
}

impl Package {
    pub fn format(&self) -> PackageFormat {
        match self {
            Package::Manifest(_) => PackageFormat::Manifest,
            Package::Oci(_) => PackageFormat::Oci,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Package::Manifest(p) => p.name(),
            Package::Oci(p) => p.name(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Package::Manifest(p) => p.version(),
            Package::Oci(p) => p.version(),
        }
    }

    pub fn component_type(&self) -> Option<ComponentType> {
        match self {
            Package::Manifest(p) => p.component_type(),
            Package::Oci(_) => Some(ComponentType::App),
        }
    }

    /// `type/name:version`, the form accepted back by catalog queries.
    pub fn id(&self) -> String {
        match self.component_type() {
            Some(t) => format!("{}/{}:{}", t, self.name(), self.version()),
            None => format!("{}:{}", self.name(), self.version()),
        }
    }

    /// Pull the package and return where it landed.
    pub async fn pull(&self, opts: &PullOptions) -> Result<PathBuf> {
        match self {
            Package::Manifest(p) => p.pull(opts).await,
            Package::Oci(p) => p.pull(opts).await,
        }
    }

    pub async fn push(&self) -> Result<()> {
        Err(PackError::NotImplemented(format!(
            "pushing {} packages",
            self.format()
        )))
    }
}

/// A package manager backend.
#[derive(Debug, Clone)]
pub enum PackageManager {
    Manifest(ManifestManager),
    Oci(OciManager),
}

impl PackageManager {
    pub fn format(&self) -> PackageFormat {
        match self {
            PackageManager::Manifest(_) => PackageFormat::Manifest,
            PackageManager::Oci(_) => PackageFormat::Oci,
        }
    }

    pub async fn catalog(&self, query: &CatalogQuery) -> Result<Vec<Package>> {
        Ok(match self {
            PackageManager::Manifest(m) => m
                .catalog(query)
                .await?
                .into_iter()
                .map(Package::Manifest)
                .collect(),
            PackageManager::Oci(m) => m.catalog(query).await?.into_iter().map(Package::Oci).collect(),
        })
    }
}

/// Registry of package manager backends, ordered by format.
#[derive(Debug, Clone, Default)]
pub struct PackageManagers {
    managers: Vec<PackageManager>,
}

impl PackageManagers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard backends from configuration.
    pub fn from_config(config: Arc<ConfigManager>) -> Result<Self> {
        let oci_root = config.config().paths.oci;
        let registry: Arc<dyn RemoteRegistry> = Arc::new(OciDistributionRegistry::with_auth(
            crate::oci::RegistryAuth::from_env(),
        ));

        let mut managers = Self::new();
        managers.register(PackageManager::Manifest(ManifestManager::new(config)));
        managers.register(PackageManager::Oci(OciManager::new(
            DirectoryHandler::new(oci_root)?,
            registry,
        )));
        Ok(managers)
    }

    /// Add a backend, replacing any existing one of the same format.
    pub fn register(&mut self, manager: PackageManager) {
        let format = manager.format();
        self.managers.retain(|m| m.format() != format);
        self.managers.push(manager);
        self.managers.sort_by_key(|m| m.format());
    }

    pub fn get(&self, format: PackageFormat) -> Option<&PackageManager> {
        self.managers.iter().find(|m| m.format() == format)
    }

    pub fn manifest(&self) -> Option<&ManifestManager> {
        match self.get(PackageFormat::Manifest)? {
            PackageManager::Manifest(m) => Some(m),
            PackageManager::Oci(_) => None,
        }
    }

    pub fn oci(&self) -> Option<&OciManager> {
        match self.get(PackageFormat::Oci)? {
            PackageManager::Oci(m) => Some(m),
            PackageManager::Manifest(_) => None,
        }
    }

    pub fn formats(&self) -> Vec<PackageFormat> {
        self.managers.iter().map(|m| m.format()).collect()
    }

    /// Query every backend and concatenate the results in format order.
    ///
    /// A manifest cache that has never been written contributes nothing
    /// rather than failing the whole query.
    pub async fn catalog(&self, query: &CatalogQuery) -> Result<Vec<Package>> {
        let mut packages = Vec::new();
        for manager in &self.managers {
            match manager.catalog(query).await {
                Ok(found) => packages.extend(found),
                Err(e) if e.is_not_found() && manager.format() == PackageFormat::Manifest => {
                    tracing::warn!(error = %e, "Manifest cache missing; run update first");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(packages)
    }

    /// Resolve a query that must match exactly one package.
    pub async fn resolve_one(&self, query: &CatalogQuery) -> Result<Package> {
        expect_one(query, self.catalog(query).await?)
    }
}

/// The single package in `packages`, or `NotFound` / `AmbiguousMatch`.
pub fn expect_one(query: &CatalogQuery, mut packages: Vec<Package>) -> Result<Package> {
    match packages.len() {
        0 => Err(PackError::not_found("package", query.to_string())),
        1 => Ok(packages.remove(0)),
        count => Err(PackError::AmbiguousMatch {
            query: query.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::handler::testutil::FakeRegistry;
    use crate::oci::layers::tests::tar_bytes;
    use std::path::Path;
    use tempfile::TempDir;
    use ukpack_core::config::{KitConfig, PathsConfig};

    fn config(root: &Path, sources: Vec<String>) -> Arc<ConfigManager> {
        Arc::new(ConfigManager::with_config(
            root.join("config.yaml"),
            KitConfig {
                paths: PathsConfig {
                    manifests: root.join("manifests"),
                    sources: root.join("sources"),
                    oci: root.join("oci"),
                },
                manifests: sources,
                ..Default::default()
            },
        ))
    }

    fn managers(root: &Path, sources: Vec<String>) -> PackageManagers {
        let config = config(root, sources);
        let registry = Arc::new(FakeRegistry::new(&[tar_bytes(&[("a", b"1")])]));
        let mut managers = PackageManagers::new();
        managers.register(PackageManager::Oci(OciManager::new(
            DirectoryHandler::new(root.join("oci")).unwrap(),
            registry,
        )));
        managers.register(PackageManager::Manifest(ManifestManager::new(config)));
        managers
    }

    fn write_source(root: &Path) -> String {
        let dir = root.join("source");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("foo.yaml"),
            "name: foo\ntype: lib\nversions:\n  - version: \"1.0\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("bar.yaml"),
            "name: foo\ntype: plat\nversions:\n  - version: \"1.0\"\n",
        )
        .unwrap();
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn test_register_orders_and_replaces() {
        let tmp = TempDir::new().unwrap();
        let mut m = managers(tmp.path(), Vec::new());
        assert_eq!(m.formats(), vec![PackageFormat::Manifest, PackageFormat::Oci]);

        m.register(PackageManager::Manifest(ManifestManager::new(config(
            tmp.path(),
            Vec::new(),
        ))));
        assert_eq!(m.formats().len(), 2);
        assert!(m.manifest().is_some());
        assert!(m.oci().is_some());
    }

    #[tokio::test]
    async fn test_catalog_without_manifest_cache_is_empty() {
        let tmp = TempDir::new().unwrap();
        let m = managers(tmp.path(), Vec::new());
        assert!(m.catalog(&CatalogQuery::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_one() {
        let tmp = TempDir::new().unwrap();
        let m = managers(tmp.path(), vec![write_source(tmp.path())]);
        m.manifest().unwrap().update().await.unwrap();

        let package = m
            .resolve_one(&CatalogQuery::new().with_name("lib/foo"))
            .await
            .unwrap();
        assert_eq!(package.format(), PackageFormat::Manifest);
        assert_eq!(package.id(), "lib/foo:1.0");

        let err = m
            .resolve_one(&CatalogQuery::new().with_name("foo"))
            .await
            .unwrap_err();
        assert!(matches!(err, PackError::AmbiguousMatch { count: 2, .. }));

        let err = m
            .resolve_one(&CatalogQuery::new().with_name("missing"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_push_not_implemented() {
        let tmp = TempDir::new().unwrap();
        let m = managers(tmp.path(), vec![write_source(tmp.path())]);
        m.manifest().unwrap().update().await.unwrap();

        let package = m
            .resolve_one(&CatalogQuery::new().with_name("plat/foo"))
            .await
            .unwrap();
        assert!(matches!(package.push().await, Err(PackError::NotImplemented(_))));
    }
}
