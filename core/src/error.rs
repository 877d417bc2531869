use thiserror::Error;

/// Broad category of a [`BundleError`], stable across context wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Archive layout is wrong (missing manifest, undeclared entry, ...)
    Structural,
    /// Content does not match what it claims to be
    Integrity,
    /// Manifest violates an asset-type rule
    Validation,
    /// Registry or catalog collaborator failed
    Transport,
    Io,
    Serialization,
    Config,
}

/// Stage of a bundle operation, attached to errors for localization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Resolve,
    Write,
    ManifestDiscovery,
    AssetMaterialization,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Resolve => write!(f, "resolve referenced data"),
            Self::Write => write!(f, "write"),
            Self::ManifestDiscovery => write!(f, "manifest discovery"),
            Self::AssetMaterialization => write!(f, "asset materialization"),
        }
    }
}

/// Asset bundle error types
#[derive(Error, Debug)]
pub enum BundleError {
    /// The archive has no manifest entry for any known asset type
    #[error("Missing manifest entry: {entry}")]
    MissingManifest { entry: String },

    /// An entry the manifest does not declare
    #[error("Unexpected entry in bundle: {entry}")]
    UnexpectedEntry { entry: String },

    /// The same entry name appears twice in one archive
    #[error("Duplicate entry in bundle: {entry}")]
    DuplicateEntry { entry: String },

    /// The manifest declares an entry the archive does not contain
    #[error("Declared entry missing from bundle: {entry}")]
    MissingEntry { entry: String },

    /// Any other structural defect
    #[error("Malformed bundle: {0}")]
    MalformedBundle(String),

    /// Bytes read do not match the recorded digest
    #[error("Digest mismatch for {locator}: expected {expected}, got {actual}")]
    DigestMismatch {
        locator: String,
        expected: String,
        actual: String,
    },

    /// A message type name is not in the type registry
    #[error("Unresolved message type: {type_name}")]
    UnresolvedType { type_name: String },

    /// A referenced-data node that is not exactly one representation
    #[error("Malformed referenced data: {0}")]
    MalformedReference(String),

    /// Asset id, name or version is not well-formed
    #[error("Invalid {field} '{value}': {reason}")]
    InvalidId {
        field: &'static str,
        value: String,
        reason: String,
    },

    /// Asset-type rule violation
    #[error("Validation failed for {asset}: {message}")]
    Validation { asset: String, message: String },

    /// Dependencies declared through two exclusive mechanisms
    #[error("Conflicting dependency declarations for {asset}: {message}")]
    ConflictingDependencies { asset: String, message: String },

    /// A dependency mechanism forbidden by a compatibility flag
    #[error("Disallowed dependency mechanism for {asset}: {message}")]
    DisallowedMechanism { asset: String, message: String },

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// Catalog content store error
    #[error("Catalog error: {0}")]
    CatalogError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Failure while handling one archive entry
    #[error("entry '{entry}': {source}")]
    Entry {
        entry: String,
        #[source]
        source: Box<BundleError>,
    },

    /// Failure during one phase of a bundle operation
    #[error("{phase} of {asset}: {source}")]
    Phase {
        phase: Phase,
        asset: String,
        #[source]
        source: Box<BundleError>,
    },
}

impl BundleError {
    /// Wrap this error with the name of the archive entry being handled.
    pub fn in_entry(self, entry: impl Into<String>) -> Self {
        BundleError::Entry {
            entry: entry.into(),
            source: Box::new(self),
        }
    }

    /// Wrap this error with the operation phase and asset it occurred in.
    pub fn in_phase(self, phase: Phase, asset: impl Into<String>) -> Self {
        BundleError::Phase {
            phase,
            asset: asset.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers.
    pub fn root(&self) -> &BundleError {
        match self {
            BundleError::Entry { source, .. } | BundleError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BundleError::Entry { source, .. } | BundleError::Phase { source, .. } => source.kind(),
            BundleError::MissingManifest { .. }
            | BundleError::UnexpectedEntry { .. }
            | BundleError::DuplicateEntry { .. }
            | BundleError::MissingEntry { .. }
            | BundleError::MalformedBundle(_) => ErrorKind::Structural,
            BundleError::DigestMismatch { .. }
            | BundleError::UnresolvedType { .. }
            | BundleError::MalformedReference(_) => ErrorKind::Integrity,
            BundleError::InvalidId { .. }
            | BundleError::Validation { .. }
            | BundleError::ConflictingDependencies { .. }
            | BundleError::DisallowedMechanism { .. } => ErrorKind::Validation,
            BundleError::RegistryError { .. } | BundleError::CatalogError(_) => {
                ErrorKind::Transport
            }
            BundleError::IoError(_) => ErrorKind::Io,
            BundleError::SerializationError(_) => ErrorKind::Serialization,
            BundleError::ConfigError(_) => ErrorKind::Config,
        }
    }
}

impl From<serde_json::Error> for BundleError {
    fn from(err: serde_json::Error) -> Self {
        BundleError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for BundleError {
    fn from(err: serde_yaml::Error) -> Self {
        BundleError::SerializationError(err.to_string())
    }
}

impl From<prost::DecodeError> for BundleError {
    fn from(err: prost::DecodeError) -> Self {
        BundleError::SerializationError(format!("invalid descriptor set: {}", err))
    }
}

/// Result type alias for asset bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;
