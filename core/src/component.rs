//! Unikraft component types.

use serde::{Deserialize, Serialize};

use crate::error::PackError;

/// The kind of Unikraft component a manifest describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Core,
    Lib,
    Plat,
    App,
    Arch,
}

impl ComponentType {
    /// All component types, in canonical order.
    pub const ALL: [ComponentType; 5] = [
        ComponentType::Core,
        ComponentType::Lib,
        ComponentType::Plat,
        ComponentType::App,
        ComponentType::Arch,
    ];

    /// Singular name, as used in manifests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Lib => "lib",
            Self::Plat => "plat",
            Self::App => "app",
            Self::Arch => "arch",
        }
    }

    /// Plural name, used for on-disk partition directories.
    pub fn plural(&self) -> &'static str {
        match self {
            Self::Core => "cores",
            Self::Lib => "libs",
            Self::Plat => "plats",
            Self::App => "apps",
            Self::Arch => "archs",
        }
    }
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ComponentType {
    type Err = PackError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ComponentType::ALL
            .into_iter()
            .find(|t| t.as_str() == lower || t.plural() == lower)
            .ok_or_else(|| {
                PackError::InvalidReference(format!(
                    "unknown component type: '{}' (supported: core, lib, plat, app, arch)",
                    s
                ))
            })
    }
}
