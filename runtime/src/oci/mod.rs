//! OCI image support.
//!
//! Images are kept in a content-addressed directory store and unpacked into
//! plain directory trees:
//!
//! ```text
//! ImageReference ──resolve──▶ DirectoryHandler ◀──fetch missing── RemoteRegistry
//!                                    │
//!                                    ▼
//!                              ContentStore ──extract, DiffID order──▶ rootfs/
//! ```

pub mod handler;
pub mod layers;
mod manager;
pub mod reference;
pub mod registry;
pub mod store;

pub use handler::{DirectoryHandler, ResolvedImage, StoredManifest};
pub use layers::extract_layer;
pub use manager::{OciManager, OciPackage};
pub use reference::ImageReference;
pub use registry::{BlobDescriptor, OciDistributionRegistry, RegistryAuth, RemoteImage, RemoteRegistry};
pub use store::{BlobKind, ContentStore};
