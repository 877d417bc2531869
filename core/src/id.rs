//! Asset identifiers.
//!
//! An asset is identified by a dotted package plus a name, e.g.
//! `ai.example.pick_and_place`. A release additionally carries a semantic
//! version: `ai.example.pick_and_place.1.2.0`.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

const NAME_PATTERN: &str = r"^[a-z]([a-z0-9_]*[a-z0-9])?$";
const PACKAGE_PATTERN: &str = r"^([a-z]([a-z0-9_]*[a-z0-9])?\.)*[a-z]([a-z0-9_]*[a-z0-9])?$";
const VERSION_PATTERN: &str = r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(-[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?(\+[0-9A-Za-z-]+(\.[0-9A-Za-z-]+)*)?$";

static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(NAME_PATTERN).expect("valid regex"));
static PACKAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PACKAGE_PATTERN).expect("valid regex"));
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(VERSION_PATTERN).expect("valid regex"));

/// Check that `name` is a valid asset name.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(BundleError::InvalidId {
            field: "name",
            value: name.to_string(),
            reason: format!("must match {}", NAME_PATTERN),
        })
    }
}

/// Check that `package` is a valid dotted package.
pub fn validate_package(package: &str) -> Result<()> {
    if PACKAGE_RE.is_match(package) {
        Ok(())
    } else {
        Err(BundleError::InvalidId {
            field: "package",
            value: package.to_string(),
            reason: "must be dot-separated segments matching [a-z]([a-z0-9_]*[a-z0-9])?"
                .to_string(),
        })
    }
}

/// Check that `version` is a semantic version.
pub fn validate_version(version: &str) -> Result<()> {
    if VERSION_RE.is_match(version) {
        Ok(())
    } else {
        Err(BundleError::InvalidId {
            field: "version",
            value: version.to_string(),
            reason: "must be a semantic version (MAJOR.MINOR.PATCH[-pre][+build])".to_string(),
        })
    }
}

/// Asset id: package + name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id {
    pub package: String,
    pub name: String,
}

impl Id {
    /// Build an id, validating both parts.
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let id = Self {
            package: package.into(),
            name: name.into(),
        };
        id.validate()?;
        Ok(id)
    }

    /// Parse `package.name`. The name is the last dot-separated segment.
    pub fn parse(s: &str) -> Result<Self> {
        let (package, name) = s.rsplit_once('.').ok_or_else(|| BundleError::InvalidId {
            field: "id",
            value: s.to_string(),
            reason: "expected <package>.<name>".to_string(),
        })?;
        Self::new(package, name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_package(&self.package)?;
        validate_name(&self.name)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.package, self.name)
    }
}

/// Asset id with an optional version.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdVersion {
    pub id: Id,
    pub version: Option<String>,
}

impl IdVersion {
    pub fn new(id: Id, version: Option<String>) -> Result<Self> {
        if let Some(v) = &version {
            validate_version(v)?;
        }
        Ok(Self { id, version })
    }

    /// Parse `package.name` or `package.name.MAJOR.MINOR.PATCH[...]`.
    ///
    /// Package and name segments cannot start with a digit, so the version
    /// begins at the first segment that does.
    pub fn parse(s: &str) -> Result<Self> {
        let mut boundary = None;
        let mut offset = 0;
        for segment in s.split('.') {
            if segment.starts_with(|c: char| c.is_ascii_digit()) {
                boundary = Some(offset);
                break;
            }
            offset += segment.len() + 1;
        }

        match boundary {
            Some(0) => Err(BundleError::InvalidId {
                field: "id_version",
                value: s.to_string(),
                reason: "missing package and name".to_string(),
            }),
            Some(at) => {
                let id = Id::parse(&s[..at - 1])?;
                Self::new(id, Some(s[at..].to_string()))
            }
            None => Ok(Self {
                id: Id::parse(s)?,
                version: None,
            }),
        }
    }
}

impl std::fmt::Display for IdVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}.{}", self.id, v),
            None => write!(f, "{}", self.id),
        }
    }
}
