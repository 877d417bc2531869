//! Image processing.
//!
//! Image entries in a bundle are tar archives of an OCI image layout. During
//! processing each one is staged behind a rewindable buffer and handed to an
//! [`ImageProcessor`], which turns it into a digest-pinned
//! [`ImageDescriptor`].

mod credentials;
mod registry;

pub use credentials::CredentialStore;
pub use registry::{OciRegistryTransport, RegistryAuth};

use assetbundle_core::error::Result;
use assetbundle_core::id::Id;
use assetbundle_core::processed::{ImageDescriptor, RegistryCredentials};

use crate::archive::StagedBlob;

/// Turns a staged image archive into a registry descriptor.
pub trait ImageProcessor {
    fn process(&mut self, asset: &Id, filename: &str, image: &mut StagedBlob)
        -> Result<ImageDescriptor>;
}

/// Where an image is pushed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTarget {
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageTarget {
    /// `<registry>/<prefix>/<package>.<name>:<tag>`, the tag derived from
    /// the image filename.
    pub fn for_asset(registry: &str, repository_prefix: &str, asset: &Id, filename: &str) -> Self {
        let prefix = repository_prefix.trim_matches('/');
        let repository = if prefix.is_empty() {
            asset.to_string()
        } else {
            format!("{}/{}", prefix, asset)
        };
        Self {
            registry: registry.to_string(),
            repository,
            tag: tag_from_filename(filename),
        }
    }

    pub fn reference(&self) -> String {
        format!("{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

impl std::fmt::Display for ImageTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.reference())
    }
}

/// Image tag from a filename: extension stripped, characters outside
/// `[A-Za-z0-9_.-]` replaced, at most 128 characters.
fn tag_from_filename(filename: &str) -> String {
    let basename = filename.rsplit('/').next().unwrap_or(filename);
    let stem = [".tar.gz", ".tgz", ".tar"]
        .iter()
        .find_map(|ext| basename.strip_suffix(ext))
        .unwrap_or(basename);

    let mut tag: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if tag.starts_with('.') || tag.starts_with('-') {
        tag.insert(0, '_');
    }
    tag.truncate(128);
    if tag.is_empty() {
        "latest".to_string()
    } else {
        tag
    }
}

/// Result of pushing one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushedImage {
    pub registry: String,
    pub repository: String,
    /// Manifest digest as reported by the registry.
    pub digest: String,
}

/// Pushes staged image archives to a registry.
pub trait ImageTransport {
    fn push(&mut self, image: &mut StagedBlob, target: &ImageTarget) -> Result<PushedImage>;
}

/// Describes images by the digest of their staged archive without pushing
/// anything.
#[derive(Debug, Clone)]
pub struct DigestImageProcessor {
    registry: String,
    repository_prefix: String,
}

impl DigestImageProcessor {
    pub fn new(registry: impl Into<String>, repository_prefix: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository_prefix: repository_prefix.into(),
        }
    }
}

impl ImageProcessor for DigestImageProcessor {
    fn process(
        &mut self,
        asset: &Id,
        filename: &str,
        image: &mut StagedBlob,
    ) -> Result<ImageDescriptor> {
        let target = ImageTarget::for_asset(&self.registry, &self.repository_prefix, asset, filename);
        tracing::debug!(
            asset = %asset,
            entry = %filename,
            digest = %image.digest(),
            size = image.size(),
            "Described image without pushing"
        );
        Ok(ImageDescriptor {
            registry: target.registry,
            name: target.repository,
            tag: Some(target.tag),
            digest: image.digest().to_string(),
            auth: None,
        })
    }
}

/// Pushes images through an [`ImageTransport`] and describes them by the
/// manifest digest the registry reports.
pub struct RegistryImageProcessor<T: ImageTransport> {
    transport: T,
    registry: String,
    repository_prefix: String,
    credentials: Option<RegistryCredentials>,
}

impl<T: ImageTransport> RegistryImageProcessor<T> {
    pub fn new(transport: T, registry: impl Into<String>, repository_prefix: impl Into<String>) -> Self {
        Self {
            transport,
            registry: registry.into(),
            repository_prefix: repository_prefix.into(),
            credentials: None,
        }
    }

    /// Credentials copied into every descriptor this processor returns.
    pub fn with_credentials(mut self, credentials: Option<RegistryCredentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: ImageTransport> ImageProcessor for RegistryImageProcessor<T> {
    fn process(
        &mut self,
        asset: &Id,
        filename: &str,
        image: &mut StagedBlob,
    ) -> Result<ImageDescriptor> {
        let target = ImageTarget::for_asset(&self.registry, &self.repository_prefix, asset, filename);
        image.rewind()?;
        let pushed = self.transport.push(image, &target)?;

        tracing::info!(
            asset = %asset,
            entry = %filename,
            target = %target,
            digest = %pushed.digest,
            "Image pushed"
        );

        Ok(ImageDescriptor {
            registry: pushed.registry,
            name: pushed.repository,
            tag: Some(target.tag),
            digest: pushed.digest,
            auth: self.credentials.clone(),
        })
    }
}
