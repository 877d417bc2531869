use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BundleError, Result};

/// Default in-memory staging limit before spilling to a temp file: 64 MiB.
pub const DEFAULT_SPOOL_THRESHOLD_BYTES: usize = 64 * 1024 * 1024;

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Bytes kept in memory when staging archives and images
    #[serde(default = "default_spool_threshold")]
    pub spool_threshold_bytes: usize,

    /// Image registry used when processing bundles
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Catalog content store
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Manifest validation strictness
    #[serde(default)]
    pub validation: ValidationFlags,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_spool_threshold() -> usize {
    DEFAULT_SPOOL_THRESHOLD_BYTES
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            spool_threshold_bytes: DEFAULT_SPOOL_THRESHOLD_BYTES,
            registry: RegistryConfig::default(),
            catalog: CatalogConfig::default(),
            validation: ValidationFlags::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl ToolConfig {
    /// `~/.assetbundle/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".assetbundle").join("config.yaml"))
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            BundleError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_yaml::from_str(&data).map_err(|e| {
            BundleError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the default path if it exists, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(default) if default.is_file() => Self::load(&default),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.spool_threshold_bytes == 0 {
            return Err(BundleError::ConfigError(
                "spool_threshold_bytes must be greater than zero".to_string(),
            ));
        }
        if let Some(address) = &self.registry.address {
            if address.trim().is_empty() || address.ends_with('/') {
                return Err(BundleError::ConfigError(format!(
                    "invalid registry address '{}'",
                    address
                )));
            }
        }
        Ok(())
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Registry host plus optional repository prefix (e.g. "gcr.io/my-project")
    #[serde(default)]
    pub address: Option<String>,

    /// Use plain HTTP
    #[serde(default)]
    pub insecure: bool,
}

impl RegistryConfig {
    /// Registry host: the first path segment of the address.
    pub fn host(&self) -> Option<&str> {
        self.address
            .as_deref()
            .map(|a| a.split_once('/').map_or(a, |(host, _)| host))
    }

    /// Repository prefix: everything after the host, possibly empty.
    pub fn repository_prefix(&self) -> &str {
        self.address
            .as_deref()
            .and_then(|a| a.split_once('/'))
            .map_or("", |(_, prefix)| prefix)
    }
}

/// Catalog configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Content store directory (default: ~/.assetbundle/catalog)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl CatalogConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".assetbundle"))
                .unwrap_or_else(|| PathBuf::from(".assetbundle"))
                .join("catalog")
        })
    }
}

/// Opt-in strictness toggles for manifest validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFlags {
    /// Reject `required_equipment` in manifests
    #[serde(default)]
    pub disallow_manifest_dependencies: bool,

    /// Reject resolved-dependency fields in parameter/config messages
    #[serde(default)]
    pub disallow_payload_dependencies: bool,
}

/// Log level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
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
