//! Registry credential store.
//!
//! Credentials live in `~/.assetbundle/auth/credentials.json`, keyed by
//! registry host. Writes go to a temp file that is renamed into place.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use assetbundle_core::error::{BundleError, Result};
use assetbundle_core::processed::RegistryCredentials;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialEntry {
    username: String,
    password: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    registries: BTreeMap<String, CredentialEntry>,
}

pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at `~/.assetbundle/auth/credentials.json`.
    pub fn default_path() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            BundleError::ConfigError("Cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self::new(
            home.join(".assetbundle").join("auth").join("credentials.json"),
        ))
    }

    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, registry: &str) -> Result<Option<RegistryCredentials>> {
        let file = self.load()?;
        Ok(file
            .registries
            .get(&normalize_registry(registry))
            .map(|e| RegistryCredentials {
                username: e.username.clone(),
                password: e.password.clone(),
            }))
    }

    /// Store credentials for a registry, replacing any existing entry.
    pub fn store(&self, registry: &str, credentials: &RegistryCredentials) -> Result<()> {
        let mut file = self.load()?;
        file.registries.insert(
            normalize_registry(registry),
            CredentialEntry {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
            },
        );
        self.save(&file)
    }

    /// Returns true if an entry was removed.
    pub fn remove(&self, registry: &str) -> Result<bool> {
        let mut file = self.load()?;
        let removed = file
            .registries
            .remove(&normalize_registry(registry))
            .is_some();
        if removed {
            self.save(&file)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<CredentialFile> {
        if !self.path.exists() {
            return Ok(CredentialFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            BundleError::ConfigError(format!(
                "Failed to read credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            BundleError::ConfigError(format!(
                "Failed to parse credential store {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    fn save(&self, file: &CredentialFile) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            BundleError::ConfigError(format!(
                "Credential store path {} has no parent directory",
                self.path.display()
            ))
        })?;
        std::fs::create_dir_all(parent).map_err(|e| {
            BundleError::ConfigError(format!(
                "Failed to create credential store directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let data = serde_json::to_vec_pretty(file)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(&data)?;
        tmp.persist(&self.path).map_err(|e| {
            BundleError::ConfigError(format!(
                "Failed to write credential store {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

/// Registry key: lowercase host, scheme and trailing slashes dropped.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(&r);
    r.split('/').next().unwrap_or(r).to_string()
}
