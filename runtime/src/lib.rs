//! Asset Bundle Runtime - bundle writing, reading and processing.
//!
//! This crate provides the archive machinery behind asset bundles: the
//! archive walker, referenced-data resolvers, the type registry and manifest
//! validator, image processors with their registry transport, a local
//! catalog store, and the bundle writer and reader/processor.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod catalog;
pub mod image;
pub mod reader;
pub mod resolver;
pub mod types;
pub mod validator;
pub mod walker;
pub mod writer;

// Re-export common types
pub use archive::{normalize_entry_name, ArchiveBuilder, StagedBlob};
pub use catalog::{CatalogClient, LocalCatalog};
pub use image::{
    DigestImageProcessor, ImageProcessor, ImageTarget, ImageTransport, OciRegistryTransport,
    PushedImage, RegistryAuth, RegistryImageProcessor,
};
pub use reader::{
    process, process_path, process_stream, read, read_path, BundleContents, ProcessOptions,
    ReadOptions,
};
pub use resolver::{
    resolve_referenced_data, resolve_referenced_data_in, BundleEntrySource, CatalogResolver, DirectorySource, NoOpResolver,
    PortableResolver, ReferencedDataResolver, ReferencedFileSource,
};
pub use types::TypeRegistry;
pub use validator::ManifestValidator;
pub use walker::{Fallback, WalkOutcome, Walker};
pub use writer::{write, write_to, AuxiliaryInputs, WriteOptions, WriteSummary};

/// Asset Bundle Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
