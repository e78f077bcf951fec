//! ukpack Runtime - Unikraft package engine.
//!
//! This crate holds everything between a catalog query and a bootable
//! rootfs: the manifest index, the package backends, the OCI content store
//! and image handler, and initrd construction.

#![allow(clippy::result_large_err)]

pub mod initrd;
pub mod manifest;
pub mod oci;
pub mod pack;

// Re-export common types
pub use initrd::{new_from_path, DirectoryInitrd, DockerfileInitrd, Initrd, InitrdOptions, TarballInitrd};
pub use manifest::{Manifest, ManifestIndex, ManifestManager, ManifestPackage};
pub use oci::{ContentStore, DirectoryHandler, ImageReference, OciManager, OciPackage, RemoteRegistry};
pub use pack::{pull_all, CatalogQuery, Package, PackageFormat, PackageManager, PackageManagers, PullOptions};

/// ukpack Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
