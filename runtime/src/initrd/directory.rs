//! Directory-backed initrd, and the tree serializer the other modes share.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ukpack_core::error::{PackError, Result};

use super::cpio::{Header, Writer};
use super::{resolve_output, Initrd, InitrdOptions};

/// Serializes an existing directory tree.
#[derive(Debug)]
pub struct DirectoryInitrd {
    path: PathBuf,
    opts: InitrdOptions,
    files: Vec<String>,
}

impl DirectoryInitrd {
    /// Fails unless `path` is an existing directory.
    pub fn new(path: impl Into<PathBuf>, opts: InitrdOptions) -> Result<Self> {
        let path = path.into();
        let meta = std::fs::metadata(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PackError::not_found("directory", path.display().to_string())
            } else {
                PackError::Io(e)
            }
        })?;
        if !meta.is_dir() {
            return Err(PackError::Other(format!(
                "supplied path is not a directory: {}",
                path.display()
            )));
        }

        Ok(Self {
            path,
            opts,
            files: Vec::new(),
        })
    }
}

#[async_trait]
impl Initrd for DirectoryInitrd {
    async fn build(&mut self) -> Result<PathBuf> {
        let output = resolve_output(&mut self.opts)?;
        let root = self.path.clone();
        let target = output.clone();

        self.files = tokio::task::spawn_blocking(move || serialize_dir(&root, &target))
            .await
            .map_err(|e| PackError::Other(format!("Initrd task failed: {}", e)))??;

        tracing::info!(
            source = %self.path.display(),
            output = %output.display(),
            files = self.files.len(),
            "Built initrd"
        );
        Ok(output)
    }

    fn files(&self) -> &[String] {
        &self.files
    }
}

/// Write `root` as a newc archive at `output` and return the archive names
/// of every non-directory entry, in archive order.
///
/// The walk is depth-first with siblings sorted by name, so directories
/// precede their children and the output is reproducible. The root itself
/// is not emitted. The archive is written next to `output` and renamed into
/// place once complete.
pub fn serialize_dir(root: &Path, output: &Path) -> Result<Vec<String>> {
    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;

    let tmp = tempfile::NamedTempFile::new_in(&parent)?;
    let mut writer = Writer::new(BufWriter::new(tmp));
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| PackError::Archive(format!("Failed to walk {}: {}", root.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| PackError::Other(e.to_string()))?;
        if relative.as_os_str().is_empty() {
            continue;
        }

        let name = archive_name(relative);
        let meta = entry
            .metadata()
            .map_err(|e| PackError::Archive(format!("Failed to stat {}: {}", name, e)))?;
        let perm = permissions(&meta);
        let file_type = entry.file_type();

        let mut header = if file_type.is_dir() {
            Header::directory(&name, perm)
        } else if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())?;
            Header::symlink(&name, target.to_string_lossy(), perm)
        } else if file_type.is_file() {
            Header::regular(&name, perm, meta.len())
        } else {
            tracing::debug!(path = %name, "Skipping special file");
            continue;
        };
        header.mtime = mtime(&meta);

        tracing::trace!(path = %name, "Serializing");
        let appended = if file_type.is_file() {
            writer.append(&header, File::open(entry.path())?)
        } else {
            writer.append(&header, std::io::empty())
        };
        appended.map_err(|e| PackError::Archive(format!("Failed to write {}: {}", name, e)))?;

        if !file_type.is_dir() {
            files.push(name);
        }
    }

    let buffered = writer
        .finish()
        .map_err(|e| PackError::Archive(format!("Failed to finish archive: {}", e)))?;
    let tmp = buffered
        .into_inner()
        .map_err(|e| PackError::Archive(format!("Failed to flush archive: {}", e.error())))?;
    tmp.persist(output).map_err(|e| {
        PackError::Other(format!("Failed to write {}: {}", output.display(), e.error))
    })?;

    Ok(files)
}

/// `/`-separated archive name with a leading `/`.
fn archive_name(relative: &Path) -> String {
    let mut name = String::new();
    for component in relative.components() {
        name.push('/');
        name.push_str(&component.as_os_str().to_string_lossy());
    }
    name
}

#[cfg(unix)]
fn permissions(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permissions(meta: &std::fs::Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

fn mtime(meta: &std::fs::Metadata) -> u32 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs().min(u32::MAX as u64) as u32)
        .unwrap_or(0)
}
