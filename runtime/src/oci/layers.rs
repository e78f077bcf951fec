//! OCI layer extraction utilities.
//!
//! Applies a layer blob (tar, optionally gzip-compressed) on top of a
//! destination directory with overlay semantics: later layers overwrite
//! earlier ones, and OCI whiteout entries delete what lower layers wrote.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use ukpack_core::digest::{Digest, Hasher};
use ukpack_core::error::{PackError, Result};

/// Prefix marking a whiteout entry.
const WHITEOUT_PREFIX: &str = ".wh.";

/// Marker making a directory opaque (hides everything below it from lower layers).
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Extract a single layer file to the target directory.
///
/// When `diff_id` is given, the uncompressed tar stream must hash to it.
pub fn extract_layer(layer_path: &Path, diff_id: Option<&Digest>, target_dir: &Path) -> Result<()> {
    let file = File::open(layer_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PackError::not_found("layer", layer_path.display().to_string())
        } else {
            PackError::Io(e)
        }
    })?;

    apply_layer(file, diff_id, target_dir)?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        "Extracted OCI layer"
    );
    Ok(())
}

/// Apply a layer read from `blob` on top of `target_dir`.
pub fn apply_layer<'a>(blob: impl Read + 'a, diff_id: Option<&Digest>, target_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(target_dir).map_err(|e| {
        PackError::Other(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let mut buffered = BufReader::new(blob);
    let gzipped = {
        let head = buffered.fill_buf()?;
        head.len() >= 2 && head[0] == 0x1f && head[1] == 0x8b
    };
    let tar_stream: Box<dyn Read + 'a> = if gzipped {
        Box::new(GzDecoder::new(buffered))
    } else {
        Box::new(buffered)
    };

    let hashing = HashingReader {
        inner: tar_stream,
        hasher: diff_id.map(|d| d.algorithm.hasher()),
    };

    let mut archive = Archive::new(hashing);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    archive.set_unpack_xattrs(false);

    // Paths this layer has written, with their ancestors; whiteouts only
    // hide what lower layers left behind
    let mut written: HashSet<PathBuf> = HashSet::new();

    let entries = archive
        .entries()
        .map_err(|e| PackError::Archive(format!("Failed to read layer: {}", e)))?;
    for entry in entries {
        let mut entry =
            entry.map_err(|e| PackError::Archive(format!("Failed to read layer entry: {}", e)))?;
        let path = entry
            .path()
            .map_err(|e| PackError::Archive(format!("Invalid entry path: {}", e)))?
            .into_owned();

        let Some(relative) = sanitize(&path) else {
            tracing::warn!(path = %path.display(), "Skipping layer entry outside destination");
            continue;
        };

        let file_name = relative
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = relative.parent().unwrap_or(Path::new(""));

        if file_name == WHITEOUT_OPAQUE {
            match resolve_dir(target_dir, parent)? {
                Some(dir) => clear_directory(&dir, parent, &written)?,
                None => tracing::warn!(path = %relative.display(), "Ignoring opaque whiteout below a symlink"),
            }
            continue;
        }
        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            if !is_plain_name(hidden) {
                tracing::warn!(path = %relative.display(), "Ignoring malformed whiteout");
                continue;
            }
            if written.contains(&parent.join(hidden)) {
                continue;
            }
            match resolve_dir(target_dir, parent)? {
                Some(dir) => remove_path(&dir.join(hidden))?,
                None => tracing::warn!(path = %relative.display(), "Ignoring whiteout below a symlink"),
            }
            continue;
        }

        match entry.header().entry_type() {
            EntryType::Char | EntryType::Block | EntryType::Fifo => {
                tracing::debug!(path = %relative.display(), "Skipping special file");
                continue;
            }
            _ => {}
        }

        let unpacked = entry.unpack_in(target_dir).map_err(|e| {
            PackError::Archive(format!(
                "Failed to extract {} to {}: {}",
                relative.display(),
                target_dir.display(),
                e
            ))
        })?;
        if !unpacked {
            tracing::warn!(path = %relative.display(), "Layer entry was not unpacked");
            continue;
        }
        for ancestor in relative.ancestors() {
            if ancestor.as_os_str().is_empty() || !written.insert(ancestor.to_path_buf()) {
                break;
            }
        }
    }

    // Drain trailing padding so the digest covers the whole stream
    let mut hashing = archive.into_inner();
    std::io::copy(&mut hashing, &mut std::io::sink())?;

    if let (Some(expected), Some(hasher)) = (diff_id, hashing.hasher) {
        let actual = hasher.finalize();
        if &actual != expected {
            return Err(PackError::DigestMismatch {
                expected: expected.to_string(),
                actual: actual.to_string(),
            });
        }
    }

    Ok(())
}

/// Strip root and current-dir components; reject `..`.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            Component::ParentDir => return None,
        }
    }
    Some(out)
}

fn remove_path(path: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A whiteout name must name exactly one entry of its directory.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}

/// Join `relative` onto `root`, refusing to pass through a symlink. `None`
/// when a component is a symlink or is missing.
fn resolve_dir(root: &Path, relative: &Path) -> Result<Option<PathBuf>> {
    let mut dir = root.to_path_buf();
    for component in relative.components() {
        dir.push(component);
        match std::fs::symlink_metadata(&dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(dir))
}

/// Empty `dir` (at `relative` inside the layer) of everything not in `keep`.
/// Kept directories are descended into so lower-layer children still go.
fn clear_directory(dir: &Path, relative: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let child = relative.join(entry.file_name());
        if !keep.contains(&child) {
            remove_path(&entry.path())?;
        } else if entry.file_type()?.is_dir() {
            clear_directory(&entry.path(), &child, keep)?;
        }
    }
    Ok(())
}

/// Reader that hashes everything passing through it.
struct HashingReader<R> {
    inner: R,
    hasher: Option<Hasher>,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(&buf[..n]);
        }
        Ok(n)
    }
}
