//! ukpack Core - Foundational Types
//!
//! Errors, configuration, component types and content digests shared by the
//! ukpack runtime and CLI.

pub mod component;
pub mod config;
pub mod digest;
pub mod error;

// Re-export commonly used types
pub use component::ComponentType;
pub use config::{ConfigManager, KitConfig, LogLevel, PathsConfig};
pub use digest::{Digest, DigestAlgorithm};
pub use error::{PackError, Result};

/// ukpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
