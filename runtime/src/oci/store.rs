//! Content-addressed blob store.
//!
//! Blobs are partitioned by kind and digest algorithm:
//!
//! ```text
//! <root>/manifests/<algorithm>/<hex>
//! <root>/configs/<algorithm>/<hex>
//! <root>/layers/<algorithm>/<hex>
//! ```
//!
//! A digest only ever resolves to bytes that hash to it: every write is
//! verified and lands through a temporary file that is renamed into place.
//! Writes are idempotent, so concurrent writers racing on the same digest
//! are harmless.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use ukpack_core::digest::Digest;
use ukpack_core::error::{PackError, Result};

/// The kind of blob, which selects its partition directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    Manifest,
    Config,
    Layer,
}

impl BlobKind {
    /// Partition directory name under the store root.
    pub fn dir_name(&self) -> &'static str {
        match self {
            BlobKind::Manifest => "manifests",
            BlobKind::Config => "configs",
            BlobKind::Layer => "layers",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            BlobKind::Manifest => "manifest",
            BlobKind::Config => "config",
            BlobKind::Layer => "layer",
        }
    }
}

/// Filesystem-backed content store.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            PackError::Other(format!(
                "Failed to create content store directory {}: {}",
                root.display(),
                e
            ))
        })?;
        Ok(Self { root })
    }

    /// Root directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a blob, whether or not it exists.
    pub fn path(&self, kind: BlobKind, digest: &Digest) -> PathBuf {
        self.root
            .join(kind.dir_name())
            .join(digest.algorithm.as_str())
            .join(&digest.hex)
    }

    /// Whether a blob is present.
    pub fn exists(&self, kind: BlobKind, digest: &Digest) -> bool {
        self.path(kind, digest).is_file()
    }

    /// Store `data` under `digest`.
    ///
    /// A no-op when the digest is already present. Fails with
    /// `DigestMismatch` if `data` does not hash to `digest`.
    pub fn put(&self, kind: BlobKind, digest: &Digest, data: &[u8]) -> Result<()> {
        if self.exists(kind, digest) {
            tracing::trace!(kind = kind.label(), digest = %digest, "Blob already present");
            return Ok(());
        }

        digest.verify(data)?;

        let dir = self.partition_dir(kind, digest)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        self.persist(tmp, kind, digest)?;

        tracing::debug!(kind = kind.label(), digest = %digest, size = data.len(), "Stored blob");
        Ok(())
    }

    /// Move an already-downloaded file into the store under `digest`.
    ///
    /// The file is hashed first; on mismatch it is removed and
    /// `DigestMismatch` is returned. If the digest is already present the
    /// file is simply discarded.
    pub fn ingest_file(&self, kind: BlobKind, digest: &Digest, file: &Path) -> Result<()> {
        if self.exists(kind, digest) {
            let _ = std::fs::remove_file(file);
            return Ok(());
        }

        let actual = Digest::of_reader(digest.algorithm, File::open(file)?)?;
        if &actual != digest {
            let _ = std::fs::remove_file(file);
            return Err(PackError::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        let target = self.path(kind, digest);
        self.partition_dir(kind, digest)?;
        if std::fs::rename(file, &target).is_err() {
            // Cross-device: copy through a temporary file in the partition.
            let dir = self.partition_dir(kind, digest)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            std::io::copy(&mut File::open(file)?, tmp.as_file_mut())?;
            self.persist(tmp, kind, digest)?;
            let _ = std::fs::remove_file(file);
        }

        tracing::debug!(kind = kind.label(), digest = %digest, "Ingested blob");
        Ok(())
    }

    /// Open a blob for reading.
    pub fn get(&self, kind: BlobKind, digest: &Digest) -> Result<File> {
        let path = self.path(kind, digest);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PackError::not_found(kind.label(), digest.to_string())
            } else {
                PackError::Io(e)
            }
        })
    }

    /// Read a whole blob into memory.
    pub fn read(&self, kind: BlobKind, digest: &Digest) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        std::io::Read::read_to_end(&mut self.get(kind, digest)?, &mut data)?;
        Ok(data)
    }

    /// Remove a blob. Removing an absent blob is not an error.
    pub fn delete(&self, kind: BlobKind, digest: &Digest) -> Result<()> {
        match std::fs::remove_file(self.path(kind, digest)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List all digests stored under a kind.
    pub fn list(&self, kind: BlobKind) -> Result<Vec<Digest>> {
        let kind_dir = self.root.join(kind.dir_name());
        let mut digests = Vec::new();
        if !kind_dir.is_dir() {
            return Ok(digests);
        }

        for algo_entry in std::fs::read_dir(&kind_dir)? {
            let algo_entry = algo_entry?;
            if !algo_entry.file_type()?.is_dir() {
                continue;
            }
            let algo = algo_entry.file_name().to_string_lossy().into_owned();
            for blob in std::fs::read_dir(algo_entry.path())? {
                let blob = blob?;
                let name = blob.file_name().to_string_lossy().into_owned();
                // Skip in-flight temporaries and anything not shaped like a digest
                if let Ok(digest) = format!("{}:{}", algo, name).parse::<Digest>() {
                    digests.push(digest);
                }
            }
        }

        digests.sort_by(|a, b| a.hex.cmp(&b.hex));
        Ok(digests)
    }

    /// Create the partition directory for a digest. Concurrent creation is fine.
    fn partition_dir(&self, kind: BlobKind, digest: &Digest) -> Result<PathBuf> {
        let dir = self
            .root
            .join(kind.dir_name())
            .join(digest.algorithm.as_str());
        match std::fs::create_dir_all(&dir) {
            Ok(()) => Ok(dir),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(dir),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, tmp: tempfile::NamedTempFile, kind: BlobKind, digest: &Digest) -> Result<()> {
        let target = self.path(kind, digest);
        tmp.persist(&target).map_err(|e| {
            PackError::Other(format!(
                "Failed to persist blob {}: {}",
                target.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}
