//! Initial ramdisk construction.
//!
//! Every mode ends the same way: a directory tree serialized depth-first
//! into a newc CPIO archive.
//!
//! | Input                     | Mode                   |
//! |---------------------------|------------------------|
//! | `*Dockerfile*`            | [`DockerfileInitrd`]   |
//! | directory                 | [`DirectoryInitrd`]    |
//! | `.tar`, `.tar.gz`, `.tgz` | [`TarballInitrd`]      |
//! | any other file            | [`PrebuiltInitrd`]     |

pub mod cpio;
mod directory;
mod dockerfile;
mod tarball;

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ukpack_core::config::DEFAULT_BUILDKIT_HOST;
use ukpack_core::error::{PackError, Result};

pub use directory::{serialize_dir, DirectoryInitrd};
pub use dockerfile::{BuildBackend, BuildProgress, BuildRequest, BuildctlBackend, DockerfileInitrd};
pub use tarball::TarballInitrd;

/// A buildable initrd.
#[async_trait]
pub trait Initrd: Send + Sync {
    /// Build the archive and return its path. Each call rebuilds from scratch.
    async fn build(&mut self) -> Result<PathBuf>;

    /// Archive names of the non-directory entries written by the last build.
    fn files(&self) -> &[String];
}

/// Options shared by all initrd modes.
#[derive(Debug, Clone, Default)]
pub struct InitrdOptions {
    /// Archive path; a fresh temporary file when unset
    pub output: Option<PathBuf>,
    /// Build cache export directory (Dockerfile mode)
    pub cache_dir: Option<PathBuf>,
    /// BuildKit address (Dockerfile mode)
    pub buildkit_host: Option<String>,
}

/// Fix the output path, creating a temporary file on first use.
pub(crate) fn resolve_output(opts: &mut InitrdOptions) -> Result<PathBuf> {
    if let Some(output) = &opts.output {
        return Ok(output.clone());
    }

    let (_, path) = tempfile::Builder::new()
        .prefix("ukpack-initrd-")
        .suffix(".cpio")
        .tempfile()?
        .keep()
        .map_err(|e| PackError::Other(format!("Failed to keep initrd file: {}", e)))?;
    opts.output = Some(path.clone());
    Ok(path)
}

/// Pick the initrd mode for `path`.
pub fn new_from_path(path: impl AsRef<Path>, opts: InitrdOptions) -> Result<Box<dyn Initrd>> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    if file_name.contains("dockerfile") {
        let host = opts
            .buildkit_host
            .clone()
            .unwrap_or_else(|| DEFAULT_BUILDKIT_HOST.to_string());
        let backend = std::sync::Arc::new(BuildctlBackend::new(host));
        return Ok(Box::new(DockerfileInitrd::new(path, opts, backend)?));
    }
    if path.is_dir() {
        return Ok(Box::new(DirectoryInitrd::new(path, opts)?));
    }
    if is_tarball(&file_name) {
        return Ok(Box::new(TarballInitrd::new(path, opts)?));
    }
    if path.is_file() {
        return Ok(Box::new(PrebuiltInitrd::new(path)?));
    }

    Err(PackError::not_found("initrd source", path.display().to_string()))
}

fn is_tarball(file_name: &str) -> bool {
    file_name.ends_with(".tar") || file_name.ends_with(".tar.gz") || file_name.ends_with(".tgz")
}

/// An archive that already exists; building only validates it.
#[derive(Debug)]
pub struct PrebuiltInitrd {
    path: PathBuf,
    files: Vec<String>,
}

impl PrebuiltInitrd {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(PackError::not_found("initrd", path.display().to_string()));
        }
        Ok(Self {
            path,
            files: Vec::new(),
        })
    }
}

#[async_trait]
impl Initrd for PrebuiltInitrd {
    async fn build(&mut self) -> Result<PathBuf> {
        let path = self.path.clone();
        self.files = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let entries = cpio::Reader::new(std::io::BufReader::new(File::open(&path)?))
                .entries()
                .map_err(|e| PackError::Archive(format!("{}: {}", path.display(), e)))?;
            Ok(entries
                .into_iter()
                .filter(|(h, _)| h.kind() != cpio::EntryKind::Directory)
                .map(|(h, _)| h.name)
                .collect())
        })
        .await
        .map_err(|e| PackError::Other(format!("Initrd task failed: {}", e)))??;
        Ok(self.path.clone())
    }

    fn files(&self) -> &[String] {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_dispatch_directory_then_prebuilt() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("rootfs");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("init"), "#!/bin/sh\n").unwrap();
        let output = tmp.path().join("initrd.cpio");

        let mut built = new_from_path(
            &root,
            InitrdOptions {
                output: Some(output.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        built.build().await.unwrap();

        let mut prebuilt = new_from_path(&output, InitrdOptions::default()).unwrap();
        assert_eq!(prebuilt.build().await.unwrap(), output);
        assert_eq!(prebuilt.files(), ["/init"]);
    }

    #[test]
    fn test_dispatch_dockerfile_by_name() {
        let tmp = TempDir::new().unwrap();
        let dockerfile = tmp.path().join("Dockerfile.rootfs");
        std::fs::write(&dockerfile, "FROM scratch\n").unwrap();
        assert!(new_from_path(&dockerfile, InitrdOptions::default()).is_ok());
    }

    #[test]
    fn test_dispatch_missing_path() {
        let tmp = TempDir::new().unwrap();
        let err = new_from_path(tmp.path().join("nothing.img"), InitrdOptions::default())
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_resolve_output_is_stable() {
        let mut opts = InitrdOptions::default();
        let first = resolve_output(&mut opts).unwrap();
        assert_eq!(resolve_output(&mut opts).unwrap(), first);
        std::fs::remove_file(first).unwrap();
    }
}
