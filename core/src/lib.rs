//! Asset Bundle Core - Data Model and Error Taxonomy
//!
//! This crate provides the types shared by the bundle writer, reader and
//! processor: asset ids, the manifest sum type, typed payloads with
//! embedded referenced data, processed manifests and configuration.

pub mod config;
pub mod digest;
pub mod error;
pub mod id;
pub mod manifest;
pub mod payload;
pub mod processed;
pub mod referenced;

// Re-export commonly used types
pub use config::{LogLevel, RegistryConfig, ToolConfig, ValidationFlags};
pub use error::{BundleError, ErrorKind, Phase, Result};
pub use id::{Id, IdVersion};
pub use manifest::{AssetType, Manifest, Metadata};
pub use payload::Payload;
pub use processed::{ImageDescriptor, ProcessedAsset, ProcessedManifest, RegistryCredentials};
pub use referenced::{ReferenceKey, ReferencedData, ReferencedDataHost};

/// Asset Bundle version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
