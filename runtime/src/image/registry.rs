//! OCI registry transport.
//!
//! Uses the `oci-distribution` crate to push staged image archives to a
//! container registry. The bundle pipeline is synchronous, so pushes run on
//! a caller-provided tokio runtime handle and block until the registry
//! answers.

use std::io::Read;
use std::path::Path;

use assetbundle_core::digest::{parse_sha256, sha256_bytes, verify_digest};
use assetbundle_core::error::{BundleError, Result};
use assetbundle_core::processed::RegistryCredentials;
use flate2::read::GzDecoder;
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_distribution::manifest::OciImageManifest;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};
use tokio::runtime::Handle;

use super::credentials::CredentialStore;
use super::{ImageTarget, ImageTransport, PushedImage};
use crate::archive::StagedBlob;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone, Default)]
pub struct RegistryAuth {
    credentials: Option<RegistryCredentials>,
}

impl RegistryAuth {
    pub fn anonymous() -> Self {
        Self { credentials: None }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            credentials: Some(RegistryCredentials {
                username: username.into(),
                password: password.into(),
            }),
        }
    }

    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`; anonymous if
    /// either is unset.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    /// Credential store first, then environment variables, then anonymous.
    pub fn from_credential_store(registry: &str) -> Self {
        if let Ok(store) = CredentialStore::default_path() {
            if let Ok(Some(credentials)) = store.get(registry) {
                return Self {
                    credentials: Some(credentials),
                };
            }
        }
        Self::from_env()
    }

    pub fn credentials(&self) -> Option<&RegistryCredentials> {
        self.credentials.as_ref()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match &self.credentials {
            Some(c) => OciRegistryAuth::Basic(c.username.clone(), c.password.clone()),
            None => OciRegistryAuth::Anonymous,
        }
    }
}

/// An image read from an OCI layout, ready to push.
struct LayoutImage {
    manifest: OciImageManifest,
    config: Config,
    layers: Vec<ImageLayer>,
}

/// Pushes images to an OCI registry.
pub struct OciRegistryTransport {
    client: Client,
    auth: RegistryAuth,
    handle: Handle,
}

impl OciRegistryTransport {
    pub fn new(handle: Handle, auth: RegistryAuth, insecure: bool) -> Self {
        let config = ClientConfig {
            protocol: if insecure {
                ClientProtocol::Http
            } else {
                ClientProtocol::Https
            },
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
            handle,
        }
    }

    fn to_oci_reference(target: &ImageTarget) -> Result<Reference> {
        let reference = target.reference();
        reference.parse::<Reference>().map_err(|e| BundleError::RegistryError {
            registry: target.registry.clone(),
            message: format!("Invalid image reference '{}': {}", reference, e),
        })
    }
}

impl ImageTransport for OciRegistryTransport {
    fn push(&mut self, image: &mut StagedBlob, target: &ImageTarget) -> Result<PushedImage> {
        let oci_ref = Self::to_oci_reference(target)?;

        let layout_dir = tempfile::TempDir::new()?;
        unpack_image_archive(image, layout_dir.path())?;
        let layout = read_layout(layout_dir.path())?;

        tracing::info!(
            target = %target,
            layers = layout.layers.len(),
            "Pushing image to registry"
        );

        let auth = self.auth.to_oci_auth();
        let client = &self.client;
        let digest = self.handle.block_on(async {
            client
                .push(
                    &oci_ref,
                    &layout.layers,
                    layout.config,
                    &auth,
                    Some(layout.manifest),
                )
                .await
                .map_err(|e| BundleError::RegistryError {
                    registry: target.registry.clone(),
                    message: format!("Failed to push image: {}", e),
                })?;

            let digest = client
                .fetch_manifest_digest(&oci_ref, &auth)
                .await
                .map_err(|e| BundleError::RegistryError {
                    registry: target.registry.clone(),
                    message: format!("Failed to fetch pushed manifest digest: {}", e),
                })?;
            Ok::<String, BundleError>(digest)
        })?;

        Ok(PushedImage {
            registry: target.registry.clone(),
            repository: target.repository.clone(),
            digest,
        })
    }
}

/// Unpack a tar (gzip detected by magic bytes) into `dir`.
fn unpack_image_archive(image: &mut StagedBlob, dir: &Path) -> Result<()> {
    image.rewind()?;
    let mut magic = Vec::with_capacity(2);
    (&mut *image).take(2).read_to_end(&mut magic)?;
    image.rewind()?;

    let result = if magic == [0x1f, 0x8b] {
        tar::Archive::new(GzDecoder::new(&mut *image)).unpack(dir)
    } else {
        tar::Archive::new(&mut *image).unpack(dir)
    };
    result.map_err(|e| BundleError::MalformedBundle(format!("Invalid image archive: {}", e)))?;
    image.rewind()?;
    Ok(())
}

/// Read a layout blob by digest and check its content against the digest.
fn read_blob(blobs_dir: &Path, digest: &str, what: &str) -> Result<Vec<u8>> {
    let hex = parse_sha256(digest).ok_or_else(|| {
        BundleError::MalformedBundle(format!("Invalid {} digest in image layout: {}", what, digest))
    })?;
    let data = std::fs::read(blobs_dir.join(hex)).map_err(|e| {
        BundleError::MalformedBundle(format!("Failed to read {} blob {}: {}", what, digest, e))
    })?;
    verify_digest(digest, digest, &sha256_bytes(&data))?;
    Ok(data)
}

/// Read `index.json` → manifest → config + layers from an OCI layout.
fn read_layout(dir: &Path) -> Result<LayoutImage> {
    let index_data = std::fs::read_to_string(dir.join("index.json")).map_err(|e| {
        BundleError::MalformedBundle(format!("Image archive has no index.json: {}", e))
    })?;
    let index: serde_json::Value = serde_json::from_str(&index_data)?;
    let manifest_digest = index["manifests"][0]["digest"].as_str().ok_or_else(|| {
        BundleError::MalformedBundle("No manifest digest in image index.json".to_string())
    })?;

    let blobs_dir = dir.join("blobs").join("sha256");
    let manifest_data = read_blob(&blobs_dir, manifest_digest, "manifest")?;
    let manifest: OciImageManifest = serde_json::from_slice(&manifest_data)?;

    let config_data = read_blob(&blobs_dir, &manifest.config.digest, "config")?;
    let config = Config::new(config_data, manifest.config.media_type.clone(), None);

    let mut layers = Vec::with_capacity(manifest.layers.len());
    for layer in &manifest.layers {
        let data = read_blob(&blobs_dir, &layer.digest, "layer")?;
        tracing::debug!(digest = %layer.digest, size = data.len(), "Read layer for push");
        layers.push(ImageLayer::new(data, layer.media_type.clone(), None));
    }

    Ok(LayoutImage {
        manifest,
        config,
        layers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn layout_tar() -> Vec<u8> {
        let config = br#"{"architecture":"amd64","os":"linux"}"#;
        let layer = b"layer-bytes";
        let config_digest = assetbundle_core::digest::sha256_bytes(config);
        let layer_digest = assetbundle_core::digest::sha256_bytes(layer);
        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest,
                "size": config.len(),
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": layer_digest,
                "size": layer.len(),
            }],
        }))
        .unwrap();
        let manifest_digest = assetbundle_core::digest::sha256_bytes(&manifest);
        let index = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest.len(),
            }],
        }))
        .unwrap();

        let blob = |d: &str| format!("blobs/sha256/{}", d.trim_start_matches("sha256:"));
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder.append_bytes("oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
        builder.append_bytes("index.json", &index).unwrap();
        builder.append_bytes(&blob(&manifest_digest), &manifest).unwrap();
        builder.append_bytes(&blob(&config_digest), config).unwrap();
        builder.append_bytes(&blob(&layer_digest), layer).unwrap();
        builder.finish().unwrap().0
    }

    #[test]
    fn test_registry_auth_to_oci() {
        assert!(matches!(
            RegistryAuth::anonymous().to_oci_auth(),
            OciRegistryAuth::Anonymous
        ));
        assert!(matches!(
            RegistryAuth::basic("user", "pass").to_oci_auth(),
            OciRegistryAuth::Basic(_, _)
        ));
    }

    #[test]
    fn test_read_plain_layout() {
        let mut blob = StagedBlob::from_bytes(&layout_tar(), 1 << 20).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        unpack_image_archive(&mut blob, dir.path()).unwrap();
        let layout = read_layout(dir.path()).unwrap();
        assert_eq!(layout.layers.len(), 1);
        assert_eq!(layout.layers[0].data, b"layer-bytes");
    }

    #[test]
    fn test_read_gzipped_layout() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&layout_tar()).unwrap();
        let gz = encoder.finish().unwrap();

        let mut blob = StagedBlob::from_bytes(&gz, 1 << 20).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        unpack_image_archive(&mut blob, dir.path()).unwrap();
        assert_eq!(read_layout(dir.path()).unwrap().layers.len(), 1);
    }

    #[test]
    fn test_missing_index_is_structural() {
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder.append_bytes("oci-layout", b"{}").unwrap();
        let data = builder.finish().unwrap().0;

        let mut blob = StagedBlob::from_bytes(&data, 1 << 20).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        unpack_image_archive(&mut blob, dir.path()).unwrap();
        let err = read_layout(dir.path()).err().unwrap();
        assert_eq!(err.kind(), assetbundle_core::ErrorKind::Structural);
    }

    #[test]
    fn test_target_reference_parses() {
        let target = ImageTarget {
            registry: "localhost:5000".to_string(),
            repository: "robots/ai.example.grasp".to_string(),
            tag: "grasp".to_string(),
        };
        let reference = OciRegistryTransport::to_oci_reference(&target).unwrap();
        assert_eq!(reference.repository(), "robots/ai.example.grasp");
        assert_eq!(reference.tag(), Some("grasp"));
    }

    /// Layout whose single layer is declared with `layer_digest`, plus the
    /// bytes stored at `layer_path`.
    fn layout_with_layer(layer_digest: &str, layer_path: &str, layer: &[u8]) -> Vec<u8> {
        let config = br#"{"architecture":"amd64","os":"linux"}"#;
        let config_digest = assetbundle_core::digest::sha256_bytes(config);
        let manifest = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.manifest.v1+json",
            "config": {
                "mediaType": "application/vnd.oci.image.config.v1+json",
                "digest": config_digest,
                "size": config.len(),
            },
            "layers": [{
                "mediaType": "application/vnd.oci.image.layer.v1.tar+gzip",
                "digest": layer_digest,
                "size": layer.len(),
            }],
        }))
        .unwrap();
        let manifest_digest = assetbundle_core::digest::sha256_bytes(&manifest);
        let index = serde_json::to_vec(&serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest.len(),
            }],
        }))
        .unwrap();

        let blob = |d: &str| format!("blobs/sha256/{}", d.trim_start_matches("sha256:"));
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder.append_bytes("index.json", &index).unwrap();
        builder.append_bytes(&blob(&manifest_digest), &manifest).unwrap();
        builder.append_bytes(&blob(&config_digest), config).unwrap();
        builder.append_bytes(layer_path, layer).unwrap();
        builder.finish().unwrap().0
    }

    fn unpacked(data: &[u8]) -> tempfile::TempDir {
        let mut blob = StagedBlob::from_bytes(data, 1 << 20).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        unpack_image_archive(&mut blob, dir.path()).unwrap();
        dir
    }

    #[test]
    fn test_layer_digest_outside_blob_store_rejected() {
        let outside = tempfile::TempDir::new().unwrap();
        let secret = outside.path().join("secret.txt");
        std::fs::write(&secret, b"host-secret").unwrap();
        let escaping = format!("sha256:../../../../../../../..{}", secret.display());

        let dir = unpacked(&layout_with_layer(&escaping, "layer.bin", b"layer-bytes"));
        let err = read_layout(dir.path()).err().unwrap();
        assert!(matches!(err, BundleError::MalformedBundle(_)));
    }

    #[test]
    fn test_layer_digest_must_be_sha256_hex() {
        for digest in ["sha256:abc", "md5:0123", "0123456789abcdef"] {
            let dir = unpacked(&layout_with_layer(digest, "layer.bin", b"layer-bytes"));
            let err = read_layout(dir.path()).err().unwrap();
            assert_eq!(err.kind(), assetbundle_core::ErrorKind::Structural, "{digest}");
        }
    }

    #[test]
    fn test_layer_content_must_match_digest() {
        let declared = assetbundle_core::digest::sha256_bytes(b"layer-bytes");
        let path = format!("blobs/sha256/{}", declared.trim_start_matches("sha256:"));
        let dir = unpacked(&layout_with_layer(&declared, &path, b"tampered"));
        let err = read_layout(dir.path()).err().unwrap();
        assert!(matches!(err, BundleError::DigestMismatch { .. }));
    }
}
