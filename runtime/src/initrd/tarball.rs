//! Tarball-backed initrd: a rootfs `.tar` or `.tar.gz` repacked as CPIO.

use std::fs::File;
use std::path::PathBuf;

use async_trait::async_trait;
use ukpack_core::error::{PackError, Result};

use super::directory::serialize_dir;
use super::{resolve_output, Initrd, InitrdOptions};
use crate::oci::layers::apply_layer;

#[derive(Debug)]
pub struct TarballInitrd {
    path: PathBuf,
    opts: InitrdOptions,
    files: Vec<String>,
}

impl TarballInitrd {
    pub fn new(path: impl Into<PathBuf>, opts: InitrdOptions) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(PackError::not_found("tarball", path.display().to_string()));
        }
        Ok(Self {
            path,
            opts,
            files: Vec::new(),
        })
    }
}

#[async_trait]
impl Initrd for TarballInitrd {
    async fn build(&mut self) -> Result<PathBuf> {
        let output = resolve_output(&mut self.opts)?;
        let tarball = self.path.clone();
        let target = output.clone();

        self.files = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let staging = tempfile::TempDir::new()?;
            apply_layer(File::open(&tarball)?, None, staging.path())?;
            serialize_dir(staging.path(), &target)
        })
        .await
        .map_err(|e| PackError::Other(format!("Initrd task failed: {}", e)))??;

        tracing::info!(
            source = %self.path.display(),
            output = %output.display(),
            files = self.files.len(),
            "Built initrd from tarball"
        );
        Ok(output)
    }

    fn files(&self) -> &[String] {
        &self.files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initrd::cpio::{EntryKind, Reader};
    use crate::oci::layers::tests::{gzip, tar_bytes};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tarball_to_cpio() {
        let tmp = TempDir::new().unwrap();
        let tarball = tmp.path().join("rootfs.tar.gz");
        std::fs::write(
            &tarball,
            gzip(&tar_bytes(&[
                ("etc/", b""),
                ("etc/hostname", b"unikraft\n"),
                ("bin/", b""),
                ("bin/app", b"\x7fELF"),
            ])),
        )
        .unwrap();

        let output = tmp.path().join("initrd.cpio");
        let mut initrd = TarballInitrd::new(
            &tarball,
            InitrdOptions {
                output: Some(output.clone()),
                ..Default::default()
            },
        )
        .unwrap();
        initrd.build().await.unwrap();

        let entries = Reader::new(File::open(&output).unwrap()).entries().unwrap();
        let names: Vec<_> = entries.iter().map(|(h, _)| h.name.as_str()).collect();
        assert_eq!(names, vec!["/bin", "/bin/app", "/etc", "/etc/hostname"]);
        assert_eq!(entries[0].0.kind(), EntryKind::Directory);
        assert_eq!(entries[3].1, b"unikraft\n");
        assert_eq!(initrd.files(), ["/bin/app", "/etc/hostname"]);
    }

    #[test]
    fn test_missing_tarball() {
        let tmp = TempDir::new().unwrap();
        assert!(TarballInitrd::new(tmp.path().join("rootfs.tar"), InitrdOptions::default())
            .unwrap_err()
            .is_not_found());
    }
}
