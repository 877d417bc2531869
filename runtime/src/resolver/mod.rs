//! Referenced-data resolution.
//!
//! A resolver turns one [`ReferencedData`] into its replacement. Resolution
//! of a whole payload is done by [`resolve_referenced_data`], which
//! discovers every node generically, resolves each distinct
//! `(kind, locator)` exactly once, and only then rewrites the payload.
//! File locators are compared in their canonical spelling, so
//! `./photos/a.png` and `photos/a.png` are one reference.

mod source;

pub use source::{BundleEntrySource, DirectorySource, ReferencedFileSource};

use std::collections::{BTreeMap, BTreeSet};

use assetbundle_core::digest::{read_all_with_digest, verify_digest};
use assetbundle_core::error::{BundleError, Result};
use assetbundle_core::referenced::{ReferenceKey, ReferencedData, ReferencedDataHost};

use crate::catalog::CatalogClient;

/// Rewrites one reference.
pub trait ReferencedDataResolver {
    fn resolve(
        &mut self,
        reference: &ReferencedData,
        files: &dyn ReferencedFileSource,
    ) -> Result<ReferencedData>;
}

/// Leaves every reference untouched. Used for dry runs and previews.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpResolver;

impl ReferencedDataResolver for NoOpResolver {
    fn resolve(
        &mut self,
        reference: &ReferencedData,
        _files: &dyn ReferencedFileSource,
    ) -> Result<ReferencedData> {
        Ok(reference.clone())
    }
}

/// Inlines file references; inline and catalog references pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct PortableResolver;

impl ReferencedDataResolver for PortableResolver {
    fn resolve(
        &mut self,
        reference: &ReferencedData,
        files: &dyn ReferencedFileSource,
    ) -> Result<ReferencedData> {
        match reference {
            ReferencedData::File { path, digest } => {
                let (data, _) = read_file_reference(path, digest.as_deref(), files)?;
                Ok(ReferencedData::inline(data))
            }
            ReferencedData::Inline { .. } | ReferencedData::Catalog { .. } => Ok(reference.clone()),
        }
    }
}

/// Uploads file and inline content to a catalog and rewrites to catalog
/// handles. Existing catalog references are never re-uploaded.
#[derive(Debug)]
pub struct CatalogResolver<C: CatalogClient> {
    client: C,
}

impl<C: CatalogClient> CatalogResolver<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn into_inner(self) -> C {
        self.client
    }
}

impl<C: CatalogClient> ReferencedDataResolver for CatalogResolver<C> {
    fn resolve(
        &mut self,
        reference: &ReferencedData,
        files: &dyn ReferencedFileSource,
    ) -> Result<ReferencedData> {
        let (data, digest) = match reference {
            ReferencedData::File { path, digest } => {
                read_file_reference(path, digest.as_deref(), files)?
            }
            ReferencedData::Inline { data, digest } => (data.clone(), digest.clone()),
            ReferencedData::Catalog { .. } => return Ok(reference.clone()),
        };
        let handle = self.client.upload(&data)?;
        Ok(ReferencedData::catalog(handle, Some(digest)))
    }
}

/// Read the full content of a file reference and check its digest.
fn read_file_reference(
    path: &str,
    expected: Option<&str>,
    files: &dyn ReferencedFileSource,
) -> Result<(Vec<u8>, String)> {
    let mut reader = files.open(path)?;
    let (data, actual) = read_all_with_digest(&mut reader)?;
    if let Some(expected) = expected {
        verify_digest(path, expected, &actual)?;
    }
    tracing::debug!(path = %path, digest = %actual, size = data.len(), "Read referenced file");
    Ok((data, actual))
}

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSummary {
    /// Nodes found, duplicates included.
    pub references: usize,
    /// Distinct `(kind, locator)` pairs resolved.
    pub distinct: usize,
}

/// Resolve every referenced-data node inside `host`.
///
/// Nothing is rewritten unless every distinct reference resolved.
pub fn resolve_referenced_data(
    host: &mut dyn ReferencedDataHost,
    resolver: &mut dyn ReferencedDataResolver,
    files: &dyn ReferencedFileSource,
) -> Result<ResolveSummary> {
    resolve_referenced_data_in(&mut [host], resolver, files)
}

/// All nodes sharing one locator, and every digest recorded for it.
struct ReferenceGroup {
    reference: ReferencedData,
    digests: BTreeSet<String>,
}

/// File references take the source's canonical path; others are unchanged.
fn canonical_reference(reference: &ReferencedData, files: &dyn ReferencedFileSource) -> ReferencedData {
    match reference {
        ReferencedData::File { path, digest } => match files.canonical_path(path) {
            Some(canonical) => ReferencedData::file(canonical, digest.clone()),
            None => reference.clone(),
        },
        _ => reference.clone(),
    }
}

/// Resolve the nodes of several hosts as one set: a locator shared between
/// hosts is resolved once, and every digest recorded for it anywhere must
/// match.
pub fn resolve_referenced_data_in(
    hosts: &mut [&mut dyn ReferencedDataHost],
    resolver: &mut dyn ReferencedDataResolver,
    files: &dyn ReferencedFileSource,
) -> Result<ResolveSummary> {
    let mut references = 0;
    let mut groups: BTreeMap<ReferenceKey, ReferenceGroup> = BTreeMap::new();
    for host in hosts.iter() {
        host.visit_referenced_data(&mut |r| {
            references += 1;
            let canonical = canonical_reference(r, files);
            let group = groups.entry(canonical.key()).or_insert_with(|| ReferenceGroup {
                reference: canonical.clone(),
                digests: BTreeSet::new(),
            });
            if let Some(digest) = canonical.digest() {
                // Resolve against a pinned node so the resolver checks its digest
                if group.reference.digest().is_none() {
                    group.reference = canonical.clone();
                }
                group.digests.insert(digest.to_string());
            }
            Ok(())
        })?;
    }

    let mut resolved = BTreeMap::new();
    for (key, group) in &groups {
        let replacement = resolver.resolve(&group.reference, files)?;
        match replacement.digest() {
            Some(actual) => {
                for recorded in &group.digests {
                    verify_digest(&key.to_string(), recorded, actual)?;
                }
            }
            None if group.digests.len() > 1 => {
                return Err(BundleError::MalformedReference(format!(
                    "conflicting digests recorded for {}",
                    key
                )));
            }
            None => {}
        }
        tracing::debug!(reference = %key, resolved = %replacement.key(), "Resolved referenced data");
        if replacement != group.reference {
            resolved.insert(key.clone(), replacement);
        }
    }

    if !resolved.is_empty() {
        for host in hosts.iter_mut() {
            host.visit_referenced_data_mut(&mut |r| {
                if let Some(replacement) = resolved.get(&canonical_reference(r, files).key()) {
                    *r = replacement.clone();
                }
                Ok(())
            })?;
        }
    }

    Ok(ResolveSummary {
        references,
        distinct: groups.len(),
    })
}
