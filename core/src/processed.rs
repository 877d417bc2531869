//! Processed (self-contained) manifests.
//!
//! A processed manifest is derived from a bundle on every `process` call:
//! images are replaced by registry descriptors, descriptor sets are
//! captured, and referenced data is rewritten by the caller's resolver.
//! It is never written back into a bundle.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::digest::sha256_bytes;
use crate::manifest::{Dependencies, Metadata, ParameterSpec, ReturnSpec};
use crate::payload::Payload;

/// Registry credentials attached to an image descriptor.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct RegistryCredentials {
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A registry-addressable container image, always pinned by digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageDescriptor {
    pub registry: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryCredentials>,
}

impl ImageDescriptor {
    /// `registry/name@digest`
    pub fn pinned_reference(&self) -> String {
        format!("{}/{}@{}", self.registry, self.name, self.digest)
    }
}

/// Raw bytes captured from a bundle entry, reported by digest and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedBlob {
    pub entry: String,
    pub digest: String,
    pub size: u64,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl CapturedBlob {
    pub fn new(entry: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            entry: entry.into(),
            digest: sha256_bytes(&data),
            size: data.len() as u64,
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedData {
    pub data: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set: Option<CapturedBlob>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessedSkillAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set: Option<CapturedBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedSkill {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<ParameterSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ReturnSpec>,
    #[serde(skip_serializing_if = "Dependencies::is_empty")]
    pub dependencies: Dependencies,
    /// `None` when the bundle carried neither image nor descriptor set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<ProcessedSkillAssets>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessedServiceAssets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_descriptor: Option<CapturedBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_configuration: Option<Payload>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedService {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_message_full_name: Option<String>,
    #[serde(skip_serializing_if = "Dependencies::is_empty")]
    pub dependencies: Dependencies,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<ProcessedServiceAssets>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedHardwareDevice {
    /// Local name -> processed nested asset
    pub assets: BTreeMap<String, ProcessedManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedProcess {
    pub process: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set: Option<CapturedBlob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedSceneObject {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set: Option<CapturedBlob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<CapturedBlob>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedAsset {
    Data(ProcessedData),
    Skill(ProcessedSkill),
    Service(ProcessedService),
    HardwareDevice(ProcessedHardwareDevice),
    Process(ProcessedProcess),
    SceneObject(ProcessedSceneObject),
}

/// Metadata (empty sub-messages stripped) plus the processed asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedManifest {
    pub metadata: Metadata,
    pub asset: ProcessedAsset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pinned_reference() {
        let image = ImageDescriptor {
            registry: "gcr.io".to_string(),
            name: "robots/ai.example.grasp".to_string(),
            tag: None,
            digest: "sha256:abc".to_string(),
            auth: None,
        };
        assert_eq!(image.pinned_reference(), "gcr.io/robots/ai.example.grasp@sha256:abc");
    }

    #[test]
    fn test_credentials_never_print_password() {
        let creds = RegistryCredentials {
            username: "robot".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
        assert!(!serde_json::to_string(&creds).unwrap().contains("hunter2"));
    }

    #[test]
    fn test_captured_blob_skips_bytes_in_json() {
        let blob = CapturedBlob::new("file_descriptor_set.binpb", b"hello".to_vec());
        assert_eq!(blob.size, 5);
        let json = serde_json::to_value(&blob).unwrap();
        assert!(json.get("data").is_none());
        assert_eq!(json["entry"], "file_descriptor_set.binpb");
    }
}
