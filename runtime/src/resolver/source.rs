//! Where file references are read from.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use assetbundle_core::error::{BundleError, Result};

use crate::archive::normalize_entry_name;

/// Opens the bytes behind a file reference.
pub trait ReferencedFileSource {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>>;

    /// One spelling for every path naming the same file, or `None` when the
    /// path cannot be opened through this source.
    fn canonical_path(&self, path: &str) -> Option<String> {
        normalize_entry_name(path)
    }
}

/// File references resolved against a base directory (author time).
#[derive(Debug, Clone)]
pub struct DirectorySource {
    base_dir: PathBuf,
}

impl DirectorySource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Normalized path of `path` relative to the base directory.
    ///
    /// Absolute paths must lie inside the base directory; relative paths
    /// must not climb out of it.
    pub fn relative_path(&self, path: &str) -> Result<String> {
        let candidate = Path::new(path);
        let relative = if candidate.is_absolute() {
            let stripped = candidate.strip_prefix(&self.base_dir).map_err(|_| {
                BundleError::MalformedReference(format!(
                    "file reference {} is outside base directory {}",
                    path,
                    self.base_dir.display()
                ))
            })?;
            stripped.to_string_lossy().replace('\\', "/")
        } else {
            path.to_string()
        };

        normalize_entry_name(&relative).ok_or_else(|| {
            BundleError::MalformedReference(format!(
                "file reference {} escapes base directory {}",
                path,
                self.base_dir.display()
            ))
        })
    }

    /// Filesystem location of a file reference.
    pub fn full_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.base_dir.join(self.relative_path(path)?))
    }
}

impl ReferencedFileSource for DirectorySource {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let full_path = self.full_path(path)?;
        let file = std::fs::File::open(&full_path).map_err(|e| {
            BundleError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to open referenced file {}: {}", full_path.display(), e),
            ))
        })?;
        Ok(Box::new(file))
    }

    fn canonical_path(&self, path: &str) -> Option<String> {
        self.relative_path(path).ok()
    }
}

/// File references resolved against entries captured from a bundle
/// (process time), optionally falling back to a directory for references
/// that were excluded from the bundle.
#[derive(Debug, Default)]
pub struct BundleEntrySource {
    entries: BTreeMap<String, Vec<u8>>,
    fallback: Option<DirectorySource>,
}

impl BundleEntrySource {
    pub fn new(entries: BTreeMap<String, Vec<u8>>) -> Self {
        Self {
            entries,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, fallback: DirectorySource) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ReferencedFileSource for BundleEntrySource {
    fn open(&self, path: &str) -> Result<Box<dyn Read + '_>> {
        let name = normalize_entry_name(path).ok_or_else(|| {
            BundleError::MalformedReference(format!("invalid bundle file reference {}", path))
        })?;
        if let Some(data) = self.entries.get(&name) {
            return Ok(Box::new(Cursor::new(data.as_slice())));
        }
        match &self.fallback {
            Some(dir) => dir.open(path),
            None => Err(BundleError::MissingEntry { entry: name }),
        }
    }

    fn canonical_path(&self, path: &str) -> Option<String> {
        match &self.fallback {
            Some(dir) => dir.relative_path(path).ok(),
            None => normalize_entry_name(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read_all(mut r: Box<dyn Read + '_>) -> Vec<u8> {
        let mut data = Vec::new();
        r.read_to_end(&mut data).unwrap();
        data
    }

    #[test]
    fn test_relative_path_normalization() {
        let source = DirectorySource::new("/build/out");
        assert_eq!(source.relative_path("./photos/a.png").unwrap(), "photos/a.png");
        assert_eq!(
            source.relative_path("/build/out/photos/a.png").unwrap(),
            "photos/a.png"
        );
        assert!(source.relative_path("/elsewhere/a.png").is_err());
        assert!(source.relative_path("../a.png").is_err());
    }

    #[test]
    fn test_directory_source_reads_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("photos")).unwrap();
        std::fs::write(tmp.path().join("photos/a.png"), b"png").unwrap();
        let source = DirectorySource::new(tmp.path());
        assert_eq!(read_all(source.open("./photos/a.png").unwrap()), b"png");
    }

    #[test]
    fn test_directory_source_missing_file_is_io() {
        let tmp = TempDir::new().unwrap();
        let source = DirectorySource::new(tmp.path());
        let err = source.open("nope.bin").err().unwrap();
        assert_eq!(err.kind(), assetbundle_core::ErrorKind::Io);
    }

    #[test]
    fn test_bundle_entry_source() {
        let mut entries = BTreeMap::new();
        entries.insert("photos/a.png".to_string(), b"png".to_vec());
        let source = BundleEntrySource::new(entries);
        assert_eq!(read_all(source.open("./photos/a.png").unwrap()), b"png");
        let err = source.open("photos/b.png").err().unwrap();
        assert!(matches!(err, BundleError::MissingEntry { .. }));
    }

    #[test]
    fn test_bundle_entry_source_fallback() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("big.bin"), b"external").unwrap();
        let source =
            BundleEntrySource::new(BTreeMap::new()).with_fallback(DirectorySource::new(tmp.path()));
        assert_eq!(read_all(source.open("big.bin").unwrap()), b"external");
    }

    #[test]
    fn test_canonical_path_merges_spellings() {
        let source = DirectorySource::new("/build/out");
        assert_eq!(source.canonical_path("./photos/a.png").as_deref(), Some("photos/a.png"));
        assert_eq!(
            source.canonical_path("/build/out/photos//a.png").as_deref(),
            Some("photos/a.png")
        );
        assert_eq!(source.canonical_path("/elsewhere/a.png"), None);

        let entries = BundleEntrySource::new(BTreeMap::new());
        assert_eq!(entries.canonical_path("photos/./a.png").as_deref(), Some("photos/a.png"));
        assert_eq!(entries.canonical_path("/photos/a.png"), None);
    }
}
