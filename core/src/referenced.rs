//! Referenced data embedded in payloads.
//!
//! A referenced-data node stands in for a blob that is too large or too
//! shared to live inline. It is always exactly one of:
//!
//! ```text
//! {"@type": REFERENCED_DATA_TYPE_URL, "file":    {"path": "photos/a.png", "digest": "sha256:..."}}
//! {"@type": REFERENCED_DATA_TYPE_URL, "inlined": {"data": "<base64>",     "digest": "sha256:..."}}
//! {"@type": REFERENCED_DATA_TYPE_URL, "catalog": {"handle": "catalog://...", "digest": "sha256:..."}}
//! ```
//!
//! Nodes are discovered anywhere in a payload tree, so any message can carry
//! them without per-type code.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::digest::{sha256_bytes, verify_digest};
use crate::error::{BundleError, Result};

/// Fully-qualified message name of referenced-data nodes.
pub const REFERENCED_DATA_TYPE: &str = "assetbundle.v1.ReferencedData";

/// Type URL carried in the `@type` field of referenced-data nodes.
pub const REFERENCED_DATA_TYPE_URL: &str = "type.assetbundle.dev/assetbundle.v1.ReferencedData";

/// One referenced blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferencedData {
    /// Path relative to a base directory (or a bundle entry).
    File {
        path: String,
        digest: Option<String>,
    },
    /// The bytes themselves.
    Inline { data: Vec<u8>, digest: String },
    /// Handle issued by a catalog content store.
    Catalog {
        handle: String,
        digest: Option<String>,
    },
}

/// De-duplication key: representation kind plus locator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReferenceKey {
    File(String),
    Inline(String),
    Catalog(String),
}

impl std::fmt::Display for ReferenceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "file:{}", path),
            Self::Inline(digest) => write!(f, "inline:{}", digest),
            Self::Catalog(handle) => write!(f, "catalog:{}", handle),
        }
    }
}

impl ReferencedData {
    pub fn file(path: impl Into<String>, digest: Option<String>) -> Self {
        Self::File {
            path: path.into(),
            digest,
        }
    }

    /// Inline reference; the digest is computed from `data`.
    pub fn inline(data: Vec<u8>) -> Self {
        let digest = sha256_bytes(&data);
        Self::Inline { data, digest }
    }

    pub fn catalog(handle: impl Into<String>, digest: Option<String>) -> Self {
        Self::Catalog {
            handle: handle.into(),
            digest,
        }
    }

    pub fn key(&self) -> ReferenceKey {
        match self {
            Self::File { path, .. } => ReferenceKey::File(path.clone()),
            Self::Inline { digest, .. } => ReferenceKey::Inline(digest.clone()),
            Self::Catalog { handle, .. } => ReferenceKey::Catalog(handle.clone()),
        }
    }

    /// Digest of the referenced content, if known.
    pub fn digest(&self) -> Option<&str> {
        match self {
            Self::File { digest, .. } | Self::Catalog { digest, .. } => digest.as_deref(),
            Self::Inline { digest, .. } => Some(digest),
        }
    }

    /// Whether `value` is tagged as a referenced-data node.
    pub fn is_node(value: &Value) -> bool {
        value
            .as_object()
            .and_then(|m| m.get("@type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == REFERENCED_DATA_TYPE_URL)
    }

    /// Decode a node. Returns `Ok(None)` for values that are not
    /// referenced-data nodes.
    pub fn from_value(value: &Value) -> Result<Option<Self>> {
        if !Self::is_node(value) {
            return Ok(None);
        }
        let Some(map) = value.as_object() else {
            return Ok(None);
        };

        let present: Vec<&str> = ["file", "inlined", "catalog"]
            .into_iter()
            .filter(|k| map.contains_key(*k))
            .collect();
        if present.len() != 1 {
            return Err(BundleError::MalformedReference(format!(
                "expected exactly one of file, inlined, catalog; found {}",
                if present.is_empty() {
                    "none".to_string()
                } else {
                    present.join(", ")
                }
            )));
        }

        let body = map[present[0]].as_object().ok_or_else(|| {
            BundleError::MalformedReference(format!("'{}' must be an object", present[0]))
        })?;

        let parsed = match present[0] {
            "file" => Self::File {
                path: required_str(body, "file", "path")?,
                digest: optional_str(body, "file", "digest")?,
            },
            "catalog" => Self::Catalog {
                handle: required_str(body, "catalog", "handle")?,
                digest: optional_str(body, "catalog", "digest")?,
            },
            _ => {
                let encoded = required_str(body, "inlined", "data")?;
                let data = BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    BundleError::MalformedReference(format!("inlined data is not base64: {}", e))
                })?;
                let actual = sha256_bytes(&data);
                if let Some(expected) = optional_str(body, "inlined", "digest")? {
                    verify_digest("inlined data", &expected, &actual)?;
                }
                Self::Inline {
                    data,
                    digest: actual,
                }
            }
        };
        Ok(Some(parsed))
    }

    /// Encode as a tagged JSON node.
    pub fn to_value(&self) -> Value {
        match self {
            Self::File { path, digest } => {
                let mut body = Map::new();
                body.insert("path".to_string(), json!(path));
                if let Some(d) = digest {
                    body.insert("digest".to_string(), json!(d));
                }
                json!({ "@type": REFERENCED_DATA_TYPE_URL, "file": body })
            }
            Self::Inline { data, digest } => json!({
                "@type": REFERENCED_DATA_TYPE_URL,
                "inlined": { "data": BASE64.encode(data), "digest": digest },
            }),
            Self::Catalog { handle, digest } => {
                let mut body = Map::new();
                body.insert("handle".to_string(), json!(handle));
                if let Some(d) = digest {
                    body.insert("digest".to_string(), json!(d));
                }
                json!({ "@type": REFERENCED_DATA_TYPE_URL, "catalog": body })
            }
        }
    }
}

fn required_str(body: &Map<String, Value>, kind: &str, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            BundleError::MalformedReference(format!("{} reference is missing '{}'", kind, field))
        })
}

fn optional_str(body: &Map<String, Value>, kind: &str, field: &str) -> Result<Option<String>> {
    match body.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(BundleError::MalformedReference(format!(
            "{} reference field '{}' must be a string",
            kind, field
        ))),
    }
}

/// Capability of holding referenced-data nodes somewhere inside.
///
/// Visit order is deterministic (depth-first, map keys sorted), and a node
/// reachable through several paths is visited once per path.
pub trait ReferencedDataHost {
    fn visit_referenced_data(
        &self,
        visitor: &mut dyn FnMut(&ReferencedData) -> Result<()>,
    ) -> Result<()>;

    /// Visit every node mutably; a modified node is written back in place.
    fn visit_referenced_data_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ReferencedData) -> Result<()>,
    ) -> Result<()>;
}

impl ReferencedDataHost for Value {
    fn visit_referenced_data(
        &self,
        visitor: &mut dyn FnMut(&ReferencedData) -> Result<()>,
    ) -> Result<()> {
        if let Some(reference) = ReferencedData::from_value(self)? {
            return visitor(&reference);
        }
        match self {
            Value::Object(map) => {
                for child in map.values() {
                    child.visit_referenced_data(visitor)?;
                }
            }
            Value::Array(items) => {
                for child in items {
                    child.visit_referenced_data(visitor)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn visit_referenced_data_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ReferencedData) -> Result<()>,
    ) -> Result<()> {
        if let Some(mut reference) = ReferencedData::from_value(self)? {
            visitor(&mut reference)?;
            *self = reference.to_value();
            return Ok(());
        }
        match self {
            Value::Object(map) => {
                for child in map.values_mut() {
                    child.visit_referenced_data_mut(visitor)?;
                }
            }
            Value::Array(items) => {
                for child in items.iter_mut() {
                    child.visit_referenced_data_mut(visitor)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl<T: ReferencedDataHost> ReferencedDataHost for Option<T> {
    fn visit_referenced_data(
        &self,
        visitor: &mut dyn FnMut(&ReferencedData) -> Result<()>,
    ) -> Result<()> {
        match self {
            Some(inner) => inner.visit_referenced_data(visitor),
            None => Ok(()),
        }
    }

    fn visit_referenced_data_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ReferencedData) -> Result<()>,
    ) -> Result<()> {
        match self {
            Some(inner) => inner.visit_referenced_data_mut(visitor),
            None => Ok(()),
        }
    }
}

/// Collect every node in visit order, duplicates included.
pub fn collect_referenced_data(host: &dyn ReferencedDataHost) -> Result<Vec<ReferencedData>> {
    let mut found = Vec::new();
    host.visit_referenced_data(&mut |r| {
        found.push(r.clone());
        Ok(())
    })?;
    Ok(found)
}
