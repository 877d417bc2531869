//! Archive walker.
//!
//! Visits the entries of a tar stream in archive order and dispatches each
//! one by name to a registered handler. Entries without a handler go to the
//! walker's [`Fallback`]. The first failing handler aborts the walk; its
//! error is wrapped with the entry name.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;

use assetbundle_core::error::{BundleError, Result};

use crate::archive::normalize_entry_name;

/// Consumes one archive entry: `(entry_name, content)`.
pub type EntryHandler<'a> = Box<dyn FnMut(&str, &mut dyn Read) -> Result<()> + 'a>;

/// Policy for entries that have no registered handler.
pub enum Fallback<'a> {
    /// Skip the entry.
    Ignore,
    /// Read the entry into memory; returned in [`WalkOutcome::collected`].
    Collect,
    /// Fail with [`BundleError::UnexpectedEntry`].
    Unexpected,
    /// Hand the entry to a caller-supplied handler.
    Custom(EntryHandler<'a>),
}

impl std::fmt::Debug for Fallback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ignore => write!(f, "Ignore"),
            Self::Collect => write!(f, "Collect"),
            Self::Unexpected => write!(f, "Unexpected"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// What a completed walk saw.
#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Every entry name, in archive order.
    pub visited: Vec<String>,
    /// Directory entries, in archive order. They never reach a handler.
    pub directories: Vec<String>,
    /// Contents of entries taken by [`Fallback::Collect`].
    pub collected: BTreeMap<String, Vec<u8>>,
}

pub struct Walker<'a> {
    handlers: BTreeMap<String, EntryHandler<'a>>,
    fallback: Fallback<'a>,
}

impl<'a> Walker<'a> {
    pub fn new(fallback: Fallback<'a>) -> Self {
        Self {
            handlers: BTreeMap::new(),
            fallback,
        }
    }

    /// Register `handler` for entry `name`, replacing any earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&str, &mut dyn Read) -> Result<()> + 'a,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Walk the archive once, front to back.
    ///
    /// Directory entries are recorded in [`WalkOutcome::directories`] and
    /// otherwise skipped. Entry names are normalized before dispatch and
    /// must be unique within the archive.
    pub fn walk(&mut self, reader: &mut dyn Read) -> Result<WalkOutcome> {
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .map_err(|e| BundleError::MalformedBundle(format!("Failed to read archive: {}", e)))?;

        let mut outcome = WalkOutcome::default();
        let mut seen = BTreeSet::new();

        for entry in entries {
            let mut entry = entry.map_err(|e| {
                BundleError::MalformedBundle(format!("Failed to read archive entry: {}", e))
            })?;

            let entry_type = entry.header().entry_type();
            let raw_name = entry
                .path()
                .map_err(|e| {
                    BundleError::MalformedBundle(format!("Invalid archive entry path: {}", e))
                })?
                .to_string_lossy()
                .into_owned();
            if entry_type.is_dir() {
                // "./" and friends name the archive root
                if let Some(name) = normalize_entry_name(&raw_name) {
                    tracing::debug!(entry = %name, "Skipping directory entry");
                    outcome.directories.push(name);
                }
                continue;
            }
            let name = normalize_entry_name(&raw_name).ok_or_else(|| {
                BundleError::MalformedBundle(format!("Invalid archive entry name: {}", raw_name))
            })?;

            if !entry_type.is_file() {
                return Err(BundleError::MalformedBundle(format!(
                    "Entry {} is not a regular file",
                    name
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(BundleError::DuplicateEntry { entry: name });
            }

            tracing::debug!(entry = %name, size = entry.size(), "Visiting bundle entry");

            if let Some(handler) = self.handlers.get_mut(&name) {
                handler(&name, &mut entry).map_err(|e| e.in_entry(&name))?;
            } else {
                match &mut self.fallback {
                    Fallback::Ignore => {}
                    Fallback::Collect => {
                        let mut data = Vec::new();
                        entry
                            .read_to_end(&mut data)
                            .map_err(|e| BundleError::IoError(e).in_entry(&name))?;
                        outcome.collected.insert(name.clone(), data);
                    }
                    Fallback::Unexpected => {
                        return Err(BundleError::UnexpectedEntry { entry: name });
                    }
                    Fallback::Custom(handler) => {
                        handler(&name, &mut entry).map_err(|e| e.in_entry(&name))?;
                    }
                }
            }

            outcome.visited.push(name);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use assetbundle_core::ErrorKind;

    fn archive(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = ArchiveBuilder::new(Vec::new());
        for (name, data) in entries {
            builder.append_bytes(name, data).unwrap();
        }
        builder.finish().unwrap().0
    }

    fn read_string(reader: &mut dyn Read) -> String {
        let mut s = String::new();
        reader.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn test_dispatch_by_name_in_archive_order() {
        let data = archive(&[("b.txt", b"B"), ("a.txt", b"A")]);
        let mut order = Vec::new();
        {
            let order = std::cell::RefCell::new(&mut order);
            let mut walker = Walker::new(Fallback::Ignore);
            walker.register("a.txt", |name, r| {
                order.borrow_mut().push(format!("{}={}", name, read_string(r)));
                Ok(())
            });
            walker.register("b.txt", |name, r| {
                order.borrow_mut().push(format!("{}={}", name, read_string(r)));
                Ok(())
            });
            walker.walk(&mut &data[..]).unwrap();
        }
        assert_eq!(order, vec!["b.txt=B", "a.txt=A"]);
    }

    #[test]
    fn test_fallback_ignore() {
        let data = archive(&[("a.txt", b"A"), ("extra.bin", b"x")]);
        let mut walker = Walker::new(Fallback::Ignore);
        walker.register("a.txt", |_, _| Ok(()));
        let outcome = walker.walk(&mut &data[..]).unwrap();
        assert_eq!(outcome.visited, vec!["a.txt", "extra.bin"]);
        assert!(outcome.collected.is_empty());
    }

    #[test]
    fn test_fallback_collect() {
        let data = archive(&[("a.txt", b"A"), ("extra.bin", b"x")]);
        let mut walker = Walker::new(Fallback::Collect);
        walker.register("a.txt", |_, _| Ok(()));
        let outcome = walker.walk(&mut &data[..]).unwrap();
        assert_eq!(outcome.collected.len(), 1);
        assert_eq!(outcome.collected["extra.bin"], b"x");
    }

    #[test]
    fn test_fallback_unexpected() {
        let data = archive(&[("a.txt", b"A"), ("extra.bin", b"x")]);
        let mut walker = Walker::new(Fallback::Unexpected);
        walker.register("a.txt", |_, _| Ok(()));
        let err = walker.walk(&mut &data[..]).unwrap_err();
        assert!(matches!(err, BundleError::UnexpectedEntry { ref entry } if entry == "extra.bin"));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_fallback_custom() {
        let data = archive(&[("x", b"1"), ("y", b"22")]);
        let mut total = 0usize;
        {
            let mut walker = Walker::new(Fallback::Custom(Box::new(|_: &str, r: &mut dyn Read| {
                total += read_string(r).len();
                Ok(())
            })));
            walker.walk(&mut &data[..]).unwrap();
        }
        assert_eq!(total, 3);
    }

    #[test]
    fn test_handler_error_is_wrapped_and_stops_walk() {
        let data = archive(&[("a.txt", b"A"), ("b.txt", b"B")]);
        let mut b_seen = false;
        let err = {
            let mut walker = Walker::new(Fallback::Ignore);
            walker.register("a.txt", |_, _| {
                Err(BundleError::MalformedBundle("bad".to_string()))
            });
            walker.register("b.txt", |_, _| {
                b_seen = true;
                Ok(())
            });
            walker.walk(&mut &data[..]).unwrap_err()
        };
        assert!(!b_seen);
        assert!(matches!(err, BundleError::Entry { ref entry, .. } if entry == "a.txt"));
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_garbage_input_is_structural() {
        let garbage = vec![0xffu8; 1024];
        let mut walker = Walker::new(Fallback::Ignore);
        let err = walker.walk(&mut &garbage[..]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_dot_slash_names_are_normalized() {
        let data = archive(&[("./photos/a.png", b"png")]);
        let mut hit = false;
        {
            let mut walker = Walker::new(Fallback::Unexpected);
            walker.register("photos/a.png", |_, _| {
                hit = true;
                Ok(())
            });
            walker.walk(&mut &data[..]).unwrap();
        }
        assert!(hit);
    }

    #[test]
    fn test_directory_entries_are_recorded_not_dispatched() {
        let mut builder = tar::Builder::new(Vec::new());
        for dir in ["./", "photos/"] {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, dir, &[][..]).unwrap();
        }
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(3);
        builder.append_data(&mut header, "photos/a.png", &b"png"[..]).unwrap();
        let data = builder.into_inner().unwrap();

        let mut walker = Walker::new(Fallback::Unexpected);
        walker.register("photos/a.png", |_, _| Ok(()));
        let outcome = walker.walk(&mut &data[..]).unwrap();
        assert_eq!(outcome.visited, vec!["photos/a.png"]);
        assert_eq!(outcome.directories, vec!["photos"]);
    }
}
