//! Tar plumbing shared by the writer and reader.
//!
//! Bundles are plain tar streams. Every header is normalized (GNU format,
//! mode 0644, uid/gid 0, mtime 0) so that writing the same logical input
//! twice yields byte-identical archives.

use std::collections::BTreeSet;
use std::io::{Read, Seek, SeekFrom, Write};

use assetbundle_core::error::{BundleError, Result};
use sha2::{Digest, Sha256};
use tempfile::SpooledTempFile;

/// Normalize a relative entry name: `./` and empty segments are dropped,
/// `..` is folded. Returns `None` for absolute names, names that escape
/// their root, and names that normalize to nothing.
pub fn normalize_entry_name(name: &str) -> Option<String> {
    if name.starts_with('/') {
        return None;
    }
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// Deterministic tar writer.
pub struct ArchiveBuilder<W: Write> {
    builder: tar::Builder<W>,
    names: BTreeSet<String>,
    entries: Vec<(String, u64)>,
}

impl<W: Write> ArchiveBuilder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            builder: tar::Builder::new(writer),
            names: BTreeSet::new(),
            entries: Vec::new(),
        }
    }

    /// Append an in-memory entry.
    pub fn append_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.append_reader(name, data.len() as u64, &mut &data[..])
    }

    /// Append `size` bytes read from `reader` as one entry.
    pub fn append_reader(&mut self, name: &str, size: u64, reader: &mut dyn Read) -> Result<()> {
        if !self.names.insert(name.to_string()) {
            return Err(BundleError::DuplicateEntry {
                entry: name.to_string(),
            });
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(size);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);

        self.builder
            .append_data(&mut header, name, reader.take(size))
            .map_err(|e| {
                BundleError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("Failed to append entry {}: {}", name, e),
                ))
            })?;

        tracing::debug!(entry = %name, size, "Appended bundle entry");
        self.entries.push((name.to_string(), size));
        Ok(())
    }

    /// Write the end-of-archive marker and return the writer together with
    /// the entries in the order they were appended.
    pub fn finish(self) -> Result<(W, Vec<(String, u64)>)> {
        let writer = self.builder.into_inner()?;
        Ok((writer, self.entries))
    }
}

/// A byte stream staged behind a rewindable buffer.
///
/// Content stays in memory up to the spool threshold and spills to an
/// anonymous temp file beyond it. The digest and size are computed while
/// staging, so the content can be identified without a second read.
pub struct StagedBlob {
    file: SpooledTempFile,
    size: u64,
    digest: String,
}

impl StagedBlob {
    pub fn stage(reader: &mut dyn Read, threshold: usize) -> Result<Self> {
        let mut file = SpooledTempFile::new(threshold);
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n])?;
            size += n as u64;
        }
        file.seek(SeekFrom::Start(0))?;

        Ok(Self {
            file,
            size,
            digest: format!("sha256:{}", hex::encode(hasher.finalize())),
        })
    }

    pub fn from_bytes(data: &[u8], threshold: usize) -> Result<Self> {
        Self::stage(&mut &data[..], threshold)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// `sha256:<hex>` of the staged content.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Whether the content spilled to disk.
    pub fn is_spilled(&self) -> bool {
        self.file.is_rolled()
    }

    pub fn rewind(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Read the whole content from the start.
    pub fn to_vec(&mut self) -> Result<Vec<u8>> {
        self.rewind()?;
        let mut data = Vec::with_capacity(self.size as usize);
        self.file.read_to_end(&mut data)?;
        self.rewind()?;
        Ok(data)
    }
}

impl Read for StagedBlob {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for StagedBlob {
    fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
        self.file.seek(pos)
    }
}
