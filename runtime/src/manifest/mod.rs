//! Unikraft component manifests.
//!
//! Discovers manifests from configured sources, caches them locally and
//! resolves catalog queries into [`ManifestPackage`]s.

mod manager;
mod package;
pub mod source;
pub mod types;

pub use manager::{ManifestManager, INDEX_FILE};
pub use package::ManifestPackage;
pub use source::find_manifests_from_source;
pub use types::{Manifest, ManifestChannel, ManifestIndex, ManifestVersion, Selection};
