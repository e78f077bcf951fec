//! Manifest documents and the on-disk manifest index.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ukpack_core::component::ComponentType;
use ukpack_core::error::{PackError, Result};

/// One released version of a component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestVersion {
    pub version: String,
    /// Tarball URL or local path
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    /// Unikraft core version this release targets
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unikraft: String,
}

/// A named pointer such as "stable" or "staging".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestChannel {
    pub name: String,
    /// Version this channel currently points at, if it tracks one
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sha256: String,
}

/// Description of a single component and where to get it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub component_type: Option<ComponentType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Source this manifest was read from
    #[serde(skip_serializing_if = "String::is_empty")]
    pub origin: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<ManifestVersion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<ManifestChannel>,
    /// Relative path (or URL) of the full manifest when this entry is a pointer
    #[serde(skip_serializing_if = "String::is_empty")]
    pub manifest: String,
}

/// A resolved version selection: either an explicit version or a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Version(ManifestVersion),
    Channel(ManifestChannel),
}

impl Selection {
    /// The user-facing version string: the version, or the channel name.
    pub fn label(&self) -> &str {
        match self {
            Selection::Version(v) => &v.version,
            Selection::Channel(c) => &c.name,
        }
    }

    /// Where to download this selection from.
    pub fn resource(&self) -> &str {
        match self {
            Selection::Version(v) => &v.resource,
            Selection::Channel(c) => &c.resource,
        }
    }

    /// Expected SHA-256 of the resource, empty when unknown.
    pub fn sha256(&self) -> &str {
        match self {
            Selection::Version(v) => &v.sha256,
            Selection::Channel(c) => &c.sha256,
        }
    }
}

impl Manifest {
    /// Whether `name` is usable as a single path component: non-empty, not
    /// `.` or `..`, and free of separators and NUL.
    pub fn has_safe_name(&self) -> bool {
        let name = self.name.as_str();
        !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0'])
    }

    /// Whether this entry only points at another manifest file.
    pub fn is_pointer(&self) -> bool {
        !self.manifest.is_empty()
    }

    /// Look up `wanted` as an explicit version first, then as a channel name.
    pub fn select(&self, wanted: &str) -> Option<Selection> {
        if let Some(version) = self.versions.iter().find(|v| v.version == wanted) {
            return Some(Selection::Version(version.clone()));
        }
        self.channels
            .iter()
            .find(|c| c.name == wanted)
            .map(|c| Selection::Channel(c.clone()))
    }

    /// Selection used when no version is requested: the default channel,
    /// else the first version, else the first channel.
    pub fn default_selection(&self) -> Option<Selection> {
        if let Some(channel) = self.channels.iter().find(|c| c.default) {
            return Some(Selection::Channel(channel.clone()));
        }
        if let Some(version) = self.versions.first() {
            return Some(Selection::Version(version.clone()));
        }
        self.channels
            .first()
            .map(|c| Selection::Channel(c.clone()))
    }

    /// Path of this manifest relative to the manifests directory.
    pub fn relative_path(&self) -> String {
        match self.component_type {
            Some(t) => format!("{}/{}.yaml", t.plural(), self.name),
            None => format!("{}.yaml", self.name),
        }
    }

    /// Read a manifest from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        read_yaml(path)
    }

    /// Write this manifest to a YAML file, creating parent directories.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        write_yaml(path, self)
    }
}

/// The local manifest cache: a list of manifests or pointers to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIndex {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub manifests: Vec<Manifest>,
}

impl ManifestIndex {
    /// An empty index stamped with the current time.
    pub fn new() -> Self {
        Self {
            last_updated: Utc::now(),
            manifests: Vec::new(),
        }
    }

    /// Read an index file. A missing file is `NotFound`.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PackError::not_found(
                "manifest index",
                path.display().to_string(),
            ));
        }
        read_yaml(path)
    }

    /// Write the index, replacing any previous file.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        write_yaml(path, self)
    }
}

impl Default for ManifestIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let data = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            PackError::not_found("manifest", path.display().to_string())
        } else {
            PackError::Io(e)
        }
    })?;
    Ok(serde_yaml::from_str(&data)?)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| PackError::Other(format!("No parent directory for {}", path.display())))?;
    std::fs::create_dir_all(dir)?;

    let data = serde_yaml::to_string(value)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmp, data.as_bytes())?;
    tmp.persist(path).map_err(|e| {
        PackError::Other(format!("Failed to write {}: {}", path.display(), e.error))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn lib_foo() -> Manifest {
        Manifest {
            name: "foo".to_string(),
            component_type: Some(ComponentType::Lib),
            versions: vec![
                ManifestVersion {
                    version: "1.0".to_string(),
                    ..Default::default()
                },
                ManifestVersion {
                    version: "2.0".to_string(),
                    ..Default::default()
                },
            ],
            channels: vec![ManifestChannel {
                name: "staging".to_string(),
                version: "2.0".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_select_prefers_version_then_channel() {
        let m = lib_foo();
        assert_eq!(m.select("1.0").unwrap().label(), "1.0");
        assert!(matches!(m.select("staging"), Some(Selection::Channel(_))));
        assert!(m.select("3.0").is_none());
    }

    #[test]
    fn test_default_selection() {
        let mut m = lib_foo();
        assert_eq!(m.default_selection().unwrap().label(), "1.0");

        m.channels.push(ManifestChannel {
            name: "stable".to_string(),
            default: true,
            ..Default::default()
        });
        assert_eq!(m.default_selection().unwrap().label(), "stable");

        let empty = Manifest {
            name: "bare".to_string(),
            ..Default::default()
        };
        assert!(empty.default_selection().is_none());
    }

    #[test]
    fn test_relative_path_uses_plural_type() {
        assert_eq!(lib_foo().relative_path(), "libs/foo.yaml");
        let core = Manifest {
            name: "unikraft".to_string(),
            component_type: Some(ComponentType::Core),
            ..Default::default()
        };
        assert_eq!(core.relative_path(), "cores/unikraft.yaml");
    }

    #[test]
    fn test_safe_name() {
        let named = |name: &str| Manifest {
            name: name.to_string(),
            ..Default::default()
        };
        assert!(named("musl").has_safe_name());
        assert!(named("app-elfloader.v2").has_safe_name());
        for bad in ["", ".", "..", "../../escaped", "a/b", "a\\b", "nul\0"] {
            assert!(!named(bad).has_safe_name(), "{:?} accepted", bad);
        }
    }

    #[test]
    fn test_parse_manifest_yaml() {
        let yaml = r#"
name: nginx
type: app
description: NGINX web server
origin: https://example.com/index.yaml
versions:
  - version: "1.25"
    resource: https://example.com/nginx-1.25.tar.gz
    sha256: abc
channels:
  - name: stable
    default: true
    resource: https://example.com/nginx-stable.tar.gz
"#;
        let m: Manifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(m.component_type, Some(ComponentType::App));
        assert_eq!(m.versions[0].version, "1.25");
        assert!(m.channels[0].default);
        assert!(!m.is_pointer());
    }

    #[test]
    fn test_index_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.yaml");
        let mut index = ManifestIndex::new();
        index.manifests.push(Manifest {
            name: "foo".to_string(),
            component_type: Some(ComponentType::Lib),
            manifest: "./libs/foo.yaml".to_string(),
            ..Default::default()
        });

        index.write_to_file(&path).unwrap();
        let loaded = ManifestIndex::from_file(&path).unwrap();

        assert_eq!(loaded, index);
        assert!(loaded.manifests[0].is_pointer());
    }

    #[test]
    fn test_missing_index_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = ManifestIndex::from_file(&tmp.path().join("index.yaml")).unwrap_err();
        assert!(err.is_not_found());
    }
}
