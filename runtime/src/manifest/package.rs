//! Packages backed by a manifest version or channel.

use std::path::{Path, PathBuf};

use ukpack_core::component::ComponentType;
use ukpack_core::digest::Digest;
use ukpack_core::error::{PackError, Result};

use super::source::is_remote;
use super::types::{Manifest, Selection};
use crate::oci::layers::apply_layer;
use crate::pack::PullOptions;

/// A manifest paired with the version or channel selected for it.
#[derive(Debug, Clone)]
pub struct ManifestPackage {
    manifest: Manifest,
    selection: Selection,
    sources_dir: PathBuf,
}

impl ManifestPackage {
    pub fn new(manifest: Manifest, selection: Selection, sources_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest,
            selection,
            sources_dir: sources_dir.into(),
        }
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    pub fn version(&self) -> &str {
        self.selection.label()
    }

    pub fn component_type(&self) -> Option<ComponentType> {
        self.manifest.component_type
    }

    /// Where this package lands under `workdir`.
    pub fn destination(&self, workdir: &Path) -> PathBuf {
        match self.manifest.component_type {
            Some(t) => workdir.join(t.plural()).join(&self.manifest.name),
            None => workdir.join(&self.manifest.name),
        }
    }

    /// Download, verify and extract the selected resource.
    ///
    /// An existing destination is replaced only once the new tree has been
    /// fully extracted next to it.
    pub async fn pull(&self, opts: &PullOptions) -> Result<PathBuf> {
        if !self.manifest.has_safe_name() {
            return Err(PackError::InvalidReference(format!(
                "package name is not a single path component: {:?}",
                self.manifest.name
            )));
        }
        let resource = self.selection.resource();
        if resource.is_empty() {
            return Err(PackError::not_found(
                "resource",
                format!("{}@{}", self.manifest.name, self.version()),
            ));
        }

        let workdir = opts
            .workdir
            .clone()
            .unwrap_or_else(|| self.sources_dir.clone());
        let dest = self.destination(&workdir);

        tracing::info!(
            package = %self.manifest.name,
            version = %self.version(),
            resource = %resource,
            "Pulling package"
        );

        let data = download(resource).await?;
        opts.report(0.5);

        let expected = self.selection.sha256();
        if !expected.is_empty() {
            let actual = Digest::sha256(&data);
            if !actual.hex.eq_ignore_ascii_case(expected) {
                return Err(PackError::DigestMismatch {
                    expected: format!("sha256:{}", expected),
                    actual: actual.to_string(),
                });
            }
        }

        let target = dest.clone();
        tokio::task::spawn_blocking(move || extract_stripped(&data, &target))
            .await
            .map_err(|e| PackError::Other(format!("Extraction task failed: {}", e)))??;
        opts.report(1.0);

        tracing::info!(package = %self.manifest.name, dest = %dest.display(), "Pulled package");
        Ok(dest)
    }
}

async fn download(resource: &str) -> Result<Vec<u8>> {
    if !is_remote(resource) {
        return tokio::fs::read(resource).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PackError::not_found("resource", resource)
            } else {
                PackError::Io(e)
            }
        });
    }

    let response = reqwest::get(resource).await.map_err(|e| PackError::SourceUnreachable {
        source_name: resource.to_string(),
        message: e.to_string(),
    })?;
    if !response.status().is_success() {
        return Err(PackError::SourceUnreachable {
            source_name: resource.to_string(),
            message: format!("HTTP {}", response.status().as_u16()),
        });
    }
    let bytes = response.bytes().await.map_err(|e| PackError::SourceUnreachable {
        source_name: resource.to_string(),
        message: e.to_string(),
    })?;
    Ok(bytes.to_vec())
}

/// Extract a (possibly gzipped) tarball to `dest`, dropping a single
/// top-level directory if the archive has one.
fn extract_stripped(data: &[u8], dest: &Path) -> Result<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| PackError::Other(format!("No parent directory for {}", dest.display())))?;
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::TempDir::new_in(parent)?;
    apply_layer(data, None, staging.path())?;

    let entries: Vec<_> = std::fs::read_dir(staging.path())?.collect::<std::io::Result<_>>()?;
    let root = if entries.len() == 1 && entries[0].file_type()?.is_dir() {
        entries[0].path()
    } else {
        staging.path().to_path_buf()
    };

    if dest.exists() {
        std::fs::remove_dir_all(dest)?;
    }
    std::fs::rename(&root, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::types::ManifestVersion;
    use crate::oci::layers::tests::{gzip, tar_bytes};
    use tempfile::TempDir;

    fn package(resource: &Path, sha256: &str, sources: &Path) -> ManifestPackage {
        let manifest = Manifest {
            name: "foo".to_string(),
            component_type: Some(ComponentType::Lib),
            ..Default::default()
        };
        let selection = Selection::Version(ManifestVersion {
            version: "1.0".to_string(),
            resource: resource.to_string_lossy().into_owned(),
            sha256: sha256.to_string(),
            ..Default::default()
        });
        ManifestPackage::new(manifest, selection, sources)
    }

    #[tokio::test]
    async fn test_pull_strips_top_level_directory() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("foo-1.0.tar.gz");
        let data = gzip(&tar_bytes(&[
            ("foo-1.0/", b""),
            ("foo-1.0/Makefile.uk", b"LIBFOO=y\n"),
        ]));
        std::fs::write(&tarball, &data).unwrap();
        let sha = Digest::sha256(&data).hex;

        let pkg = package(&tarball, &sha, &tmp.path().join("sources"));
        let dest = pkg.pull(&PullOptions::default()).await.unwrap();

        assert_eq!(dest, tmp.path().join("sources/libs/foo"));
        assert_eq!(
            std::fs::read_to_string(dest.join("Makefile.uk")).unwrap(),
            "LIBFOO=y\n"
        );
    }

    #[tokio::test]
    async fn test_pull_keeps_flat_archives() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("foo.tar");
        std::fs::write(&tarball, tar_bytes(&[("a.c", b"int a;"), ("b.c", b"int b;")])).unwrap();

        let workdir = tmp.path().join("work");
        let pkg = package(&tarball, "", &tmp.path().join("unused"));
        let dest = pkg
            .pull(&PullOptions {
                workdir: Some(workdir.clone()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(dest.starts_with(&workdir));
        assert!(dest.join("a.c").is_file());
        assert!(dest.join("b.c").is_file());
    }

    #[tokio::test]
    async fn test_pull_checksum_mismatch() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("foo.tar");
        std::fs::write(&tarball, tar_bytes(&[("a.c", b"x")])).unwrap();

        let pkg = package(&tarball, &"0".repeat(64), tmp.path());
        let err = pkg.pull(&PullOptions::default()).await.unwrap_err();

        assert!(matches!(err, PackError::DigestMismatch { .. }));
        assert!(!tmp.path().join("libs/foo").exists());
    }

    #[tokio::test]
    async fn test_pull_without_resource() {
        let tmp = TempDir::new().unwrap();
        let pkg = ManifestPackage::new(
            Manifest {
                name: "foo".to_string(),
                ..Default::default()
            },
            Selection::Version(ManifestVersion {
                version: "1.0".to_string(),
                ..Default::default()
            }),
            tmp.path(),
        );
        assert!(pkg.pull(&PullOptions::default()).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pull_refuses_unsafe_name() {
        let tmp = TempDir::new().unwrap();
        let keep = tmp.path().join("keep");
        std::fs::create_dir_all(&keep).unwrap();
        let archive = tmp.path().join("foo.tar.gz");
        std::fs::write(&archive, gzip(&tar_bytes(&[("foo/Makefile", b"all:\n")]))).unwrap();

        let mut pkg = package(&archive, "", &tmp.path().join("sources"));
        pkg.manifest.name = "../../keep".to_string();

        let err = pkg.pull(&PullOptions::default()).await.unwrap_err();
        assert!(matches!(err, PackError::InvalidReference(_)));
        assert!(keep.is_dir());
    }
}
