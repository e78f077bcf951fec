use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

/// Upstream Unikraft manifest index.
pub const DEFAULT_MANIFEST_SOURCE: &str =
    "https://manifests.kraftkit.sh/index.yaml";

/// Default BuildKit daemon address.
pub const DEFAULT_BUILDKIT_HOST: &str = "unix:///run/buildkit/buildkitd.sock";

/// Environment variable pointing at an alternative config file.
pub const CONFIG_ENV: &str = "UKPACK_CONFIG";

/// ukpack configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    /// On-disk locations
    pub paths: PathsConfig,

    /// Configured manifest sources (URLs or local paths), in precedence order
    pub manifests: Vec<String>,

    /// BuildKit daemon address used for Dockerfile initrds
    pub buildkit_host: String,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            manifests: vec![DEFAULT_MANIFEST_SOURCE.to_string()],
            buildkit_host: DEFAULT_BUILDKIT_HOST.to_string(),
            log_level: LogLevel::Warn,
        }
    }
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Local manifest cache (index.yaml + per-type manifest files)
    pub manifests: PathBuf,

    /// Where pulled component sources are extracted
    pub sources: PathBuf,

    /// OCI content store root
    pub oci: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let data = data_dir();
        Self {
            manifests: data.join("manifests"),
            sources: data.join("sources"),
            oci: data.join("oci"),
        }
    }
}

/// Return the ukpack data directory (~/.local/share/ukpack on Linux).
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ukpack")
}

/// Return the default config file path (~/.config/ukpack/config.yaml on Linux).
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ukpack")
        .join("config.yaml")
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Owns the config file and the in-memory configuration.
///
/// The configuration is shared behind a lock so that source mutations can be
/// persisted in place by whoever holds the manager.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    config: RwLock<KitConfig>,
}

impl ConfigManager {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist. `BUILDKIT_HOST` overrides the configured address.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| {
                PackError::Config(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_yaml::from_str::<KitConfig>(&data)?
        } else {
            KitConfig::default()
        };

        if let Ok(host) = std::env::var("BUILDKIT_HOST") {
            if !host.is_empty() {
                config.buildkit_host = host;
            }
        }

        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    /// Load from the default location.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Wrap an in-memory configuration that persists to `path`.
    pub fn with_config(path: impl Into<PathBuf>, config: KitConfig) -> Self {
        Self {
            path: path.into(),
            config: RwLock::new(config),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> KitConfig {
        self.config.read().clone()
    }

    /// Path of the backing config file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mutate the configuration and persist it.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut KitConfig),
    {
        let mut config = self.config.write();
        f(&mut config);
        write_config(&self.path, &config)
    }

    /// Persist the current configuration.
    pub fn save(&self) -> Result<()> {
        let config = self.config.read();
        write_config(&self.path, &config)
    }
}

fn write_config(path: &Path, config: &KitConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_yaml::to_string(config)?;
    std::fs::write(path, data).map_err(|e| {
        PackError::Config(format!("Failed to write {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = KitConfig::default();
        assert_eq!(config.manifests, vec![DEFAULT_MANIFEST_SOURCE.to_string()]);
        assert_eq!(config.log_level, LogLevel::Warn);
        assert!(config.paths.manifests.ends_with("manifests"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = TempDir::new().unwrap();
        let manager = ConfigManager::load(tmp.path().join("nope.yaml")).unwrap();
        assert_eq!(manager.config().manifests.len(), 1);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.yaml");
        std::fs::write(&path, "manifests:\n  - /srv/index.yaml\nlog_level: debug\n").unwrap();

        let config = ConfigManager::load(&path).unwrap().config();
        assert_eq!(config.manifests, vec!["/srv/index.yaml".to_string()]);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(!config.buildkit_host.is_empty());
    }

    #[test]
    fn test_update_persists() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.yaml");
        let manager = ConfigManager::with_config(&path, KitConfig::default());

        manager
            .update(|c| c.manifests.push("/local/index.yaml".to_string()))
            .unwrap();

        let reloaded = ConfigManager::load(&path).unwrap().config();
        assert_eq!(reloaded.manifests.len(), 2);
        assert_eq!(reloaded.manifests[1], "/local/index.yaml");
    }

    #[test]
    fn test_log_level_filter() {
        assert_eq!(LogLevel::Info.as_filter(), "info");
        assert_eq!(tracing::Level::from(LogLevel::Error), tracing::Level::ERROR);
    }
}
