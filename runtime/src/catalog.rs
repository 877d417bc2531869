//! Catalog content store.
//!
//! The catalog resolver talks to a [`CatalogClient`]. [`LocalCatalog`] is a
//! content-addressed directory implementation: each blob is stored once by
//! its SHA256 digest and addressed by a `catalog://sha256:<hex>` handle.

use std::io::Write;
use std::path::{Path, PathBuf};

use assetbundle_core::digest::{parse_sha256, sha256_bytes, verify_digest, SHA256_PREFIX};
use assetbundle_core::error::{BundleError, Result};

/// Scheme prefix of catalog handles.
pub const CATALOG_HANDLE_PREFIX: &str = "catalog://";

/// Remote content store interface.
pub trait CatalogClient {
    /// Store `data` and return the handle that addresses it.
    fn upload(&self, data: &[u8]) -> Result<String>;
}

impl<C: CatalogClient + ?Sized> CatalogClient for &C {
    fn upload(&self, data: &[u8]) -> Result<String> {
        (**self).upload(data)
    }
}

/// One stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub handle: String,
    pub digest: String,
    pub size_bytes: u64,
}

/// Content-addressed blob store on the local filesystem.
///
/// Blobs live at `<dir>/sha256/<hex>`.
#[derive(Debug, Clone)]
pub struct LocalCatalog {
    dir: PathBuf,
}

impl LocalCatalog {
    /// Open (creating if needed) a catalog at `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        let blobs = dir.join("sha256");
        std::fs::create_dir_all(&blobs).map_err(|e| {
            BundleError::CatalogError(format!(
                "Failed to create catalog directory {}: {}",
                blobs.display(),
                e
            ))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Handle for content with digest `digest`.
    pub fn handle_for(digest: &str) -> String {
        format!("{}{}", CATALOG_HANDLE_PREFIX, digest)
    }

    /// Digest addressed by `handle`.
    pub fn digest_of(handle: &str) -> Result<&str> {
        handle
            .strip_prefix(CATALOG_HANDLE_PREFIX)
            .filter(|d| parse_sha256(d).is_some())
            .ok_or_else(|| BundleError::CatalogError(format!("Invalid catalog handle: {}", handle)))
    }

    fn blob_path(&self, digest: &str) -> PathBuf {
        let hex = digest.strip_prefix(SHA256_PREFIX).unwrap_or(digest);
        self.dir.join("sha256").join(hex)
    }

    pub fn contains(&self, handle: &str) -> bool {
        Self::digest_of(handle)
            .map(|d| self.blob_path(d).is_file())
            .unwrap_or(false)
    }

    /// Fetch and verify the blob behind `handle`.
    pub fn get(&self, handle: &str) -> Result<Vec<u8>> {
        let digest = Self::digest_of(handle)?;
        let path = self.blob_path(digest);
        let data = std::fs::read(&path).map_err(|e| {
            BundleError::CatalogError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        verify_digest(handle, digest, &sha256_bytes(&data))?;
        Ok(data)
    }

    /// List stored blobs, ordered by digest.
    pub fn list(&self) -> Result<Vec<CatalogEntry>> {
        let blobs = self.dir.join("sha256");
        let read_dir = std::fs::read_dir(&blobs).map_err(|e| {
            BundleError::CatalogError(format!(
                "Failed to read catalog directory {}: {}",
                blobs.display(),
                e
            ))
        })?;

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            // In-flight uploads
            if name.starts_with('.') {
                continue;
            }
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let digest = format!("{}{}", SHA256_PREFIX, name);
            entries.push(CatalogEntry {
                handle: Self::handle_for(&digest),
                digest,
                size_bytes,
            });
        }
        entries.sort_by(|a, b| a.digest.cmp(&b.digest));
        Ok(entries)
    }
}

impl CatalogClient for LocalCatalog {
    fn upload(&self, data: &[u8]) -> Result<String> {
        let digest = sha256_bytes(data);
        let handle = Self::handle_for(&digest);
        let path = self.blob_path(&digest);

        if path.is_file() {
            tracing::debug!(digest = %digest, "Catalog blob already present");
            return Ok(handle);
        }

        let parent = self.dir.join("sha256");
        let mut tmp = tempfile::Builder::new()
            .prefix(".upload-")
            .tempfile_in(&parent)
            .map_err(|e| BundleError::CatalogError(format!("Failed to stage upload: {}", e)))?;
        tmp.write_all(data)
            .map_err(|e| BundleError::CatalogError(format!("Failed to stage upload: {}", e)))?;
        tmp.persist(&path).map_err(|e| {
            BundleError::CatalogError(format!("Failed to store {}: {}", path.display(), e))
        })?;

        tracing::debug!(digest = %digest, size = data.len(), "Uploaded blob to catalog");
        Ok(handle)
    }
}
