//! Asset manifests.
//!
//! A [`Manifest`] is a closed sum type with one variant per asset type. Each
//! variant carries shared [`Metadata`], its own payload fields, and an
//! `assets` sub-message naming the archive entries it owns. The bundle
//! writer fills every `*_filename` field; callers never choose entry names.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::id::{Id, IdVersion};
use crate::payload::Payload;
use crate::referenced::{ReferencedData, ReferencedDataHost};

/// Entry name of a bundled descriptor set.
pub const FILE_DESCRIPTOR_SET_ENTRY: &str = "file_descriptor_set.binpb";

/// Entry name of a service's default configuration.
pub const DEFAULT_CONFIGURATION_ENTRY: &str = "default_config.json";

/// Directory for scene files inside a scene-object bundle.
pub const SCENE_ENTRY_PREFIX: &str = "scene/";

/// Directory for nested bundles inside a hardware-device bundle.
pub const NESTED_BUNDLE_PREFIX: &str = "assets/";

/// Suffix of nested bundle entries.
pub const NESTED_BUNDLE_SUFFIX: &str = ".bundle.tar";

/// Asset type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Data,
    Skill,
    Service,
    HardwareDevice,
    Process,
    SceneObject,
}

impl AssetType {
    pub const ALL: [AssetType; 6] = [
        AssetType::Data,
        AssetType::Skill,
        AssetType::Service,
        AssetType::HardwareDevice,
        AssetType::Process,
        AssetType::SceneObject,
    ];

    /// Fixed archive entry holding the manifest of this asset type.
    pub fn manifest_entry_name(self) -> &'static str {
        match self {
            Self::Data => "data_manifest.json",
            Self::Skill => "skill_manifest.json",
            Self::Service => "service_manifest.json",
            Self::HardwareDevice => "hardware_device_manifest.json",
            Self::Process => "process_manifest.json",
            Self::SceneObject => "scene_object_manifest.json",
        }
    }

    /// Asset type whose manifest lives at `entry`, if any.
    pub fn from_manifest_entry_name(entry: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.manifest_entry_name() == entry)
    }
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data => write!(f, "data"),
            Self::Skill => write!(f, "skill"),
            Self::Service => write!(f, "service"),
            Self::HardwareDevice => write!(f, "hardware_device"),
            Self::Process => write!(f, "process"),
            Self::SceneObject => write!(f, "scene_object"),
        }
    }
}

impl std::str::FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_string() == s)
            .ok_or_else(|| format!("unknown asset type: '{}'", s))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vendor {
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Documentation {
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Identity and display metadata shared by every asset type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Vendor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation: Option<Documentation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl Metadata {
    pub fn new(id: Id) -> Self {
        Self {
            id,
            version: None,
            display_name: String::new(),
            vendor: None,
            documentation: None,
            release_notes: None,
            tags: Vec::new(),
        }
    }

    pub fn id_version(&self) -> Result<IdVersion> {
        IdVersion::new(self.id.clone(), self.version.clone())
    }

    /// Drop optional sub-messages that are present but empty, so that an
    /// unset field and an explicitly-empty one compare equal.
    pub fn strip_empty(&mut self) {
        if self.vendor.as_ref().is_some_and(|v| v.display_name.is_empty()) {
            self.vendor = None;
        }
        if self
            .documentation
            .as_ref()
            .is_some_and(|d| d.description.is_empty() && d.url.is_none())
        {
            self.documentation = None;
        }
        if self.release_notes.as_ref().is_some_and(String::is_empty) {
            self.release_notes = None;
        }
    }
}

/// Equipment a skill or service needs, keyed by slot name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependencies {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub required_equipment: BTreeMap<String, EquipmentSelector>,
}

impl Dependencies {
    pub fn is_empty(&self) -> bool {
        self.required_equipment.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentSelector {
    #[serde(default)]
    pub capability_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub message_full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Payload>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSpec {
    pub message_full_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataManifest {
    pub metadata: Metadata,
    pub data: Payload,
    #[serde(default)]
    pub assets: DataAssets,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillManifest {
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter: Option<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ReturnSpec>,
    #[serde(default, skip_serializing_if = "Dependencies::is_empty")]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub assets: SkillAssets,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_descriptor_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_configuration_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_filenames: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceManifest {
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_message_full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Dependencies::is_empty")]
    pub dependencies: Dependencies,
    #[serde(default)]
    pub assets: ServiceAssets,
}

/// A device definition bundling other assets, keyed by local name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDeviceManifest {
    pub metadata: Metadata,
    /// Local name -> nested bundle entry
    #[serde(default)]
    pub assets: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessManifest {
    pub metadata: Metadata,
    pub process: Payload,
    #[serde(default)]
    pub assets: ProcessAssets,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneObjectAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_descriptor_set_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneObjectManifest {
    pub metadata: Metadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<Payload>,
    #[serde(default)]
    pub assets: SceneObjectAssets,
}

/// Manifest of one asset, tagged by asset type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Manifest {
    Data(DataManifest),
    Skill(SkillManifest),
    Service(ServiceManifest),
    HardwareDevice(HardwareDeviceManifest),
    Process(ProcessManifest),
    SceneObject(SceneObjectManifest),
}

impl Manifest {
    pub fn asset_type(&self) -> AssetType {
        match self {
            Self::Data(_) => AssetType::Data,
            Self::Skill(_) => AssetType::Skill,
            Self::Service(_) => AssetType::Service,
            Self::HardwareDevice(_) => AssetType::HardwareDevice,
            Self::Process(_) => AssetType::Process,
            Self::SceneObject(_) => AssetType::SceneObject,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Self::Data(m) => &m.metadata,
            Self::Skill(m) => &m.metadata,
            Self::Service(m) => &m.metadata,
            Self::HardwareDevice(m) => &m.metadata,
            Self::Process(m) => &m.metadata,
            Self::SceneObject(m) => &m.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        match self {
            Self::Data(m) => &mut m.metadata,
            Self::Skill(m) => &mut m.metadata,
            Self::Service(m) => &mut m.metadata,
            Self::HardwareDevice(m) => &mut m.metadata,
            Self::Process(m) => &mut m.metadata,
            Self::SceneObject(m) => &mut m.metadata,
        }
    }

    pub fn id(&self) -> &Id {
        &self.metadata().id
    }

    pub fn manifest_entry_name(&self) -> &'static str {
        self.asset_type().manifest_entry_name()
    }

    /// Entry holding the descriptor set this manifest's types resolve against.
    pub fn file_descriptor_set_filename(&self) -> Option<&str> {
        match self {
            Self::Data(m) => m.assets.file_descriptor_set_filename.as_deref(),
            Self::Skill(m) => m.assets.file_descriptor_set_filename.as_deref(),
            Self::Service(m) => m.assets.parameter_descriptor_filename.as_deref(),
            Self::HardwareDevice(_) => None,
            Self::Process(m) => m.assets.file_descriptor_set_filename.as_deref(),
            Self::SceneObject(m) => m.assets.file_descriptor_set_filename.as_deref(),
        }
    }

    pub fn image_filenames(&self) -> Vec<&str> {
        match self {
            Self::Skill(m) => m.assets.image_filename.iter().map(String::as_str).collect(),
            Self::Service(m) => m.assets.image_filenames.iter().map(String::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Every entry besides the manifest that a bundle of this manifest owns.
    ///
    /// For data assets this includes the file references in the payload.
    pub fn declared_entries(&self) -> Result<BTreeSet<String>> {
        let mut entries = BTreeSet::new();
        if let Some(fds) = self.file_descriptor_set_filename() {
            entries.insert(fds.to_string());
        }
        for image in self.image_filenames() {
            entries.insert(image.to_string());
        }
        match self {
            Self::Data(m) => {
                m.data.visit_referenced_data(&mut |r| {
                    if let ReferencedData::File { path, .. } = r {
                        entries.insert(path.clone());
                    }
                    Ok(())
                })?;
            }
            Self::Service(m) => {
                if let Some(config) = &m.assets.default_configuration_filename {
                    entries.insert(config.clone());
                }
            }
            Self::HardwareDevice(m) => {
                entries.extend(m.assets.values().cloned());
            }
            Self::SceneObject(m) => {
                if let Some(scene) = &m.assets.scene_filename {
                    entries.insert(scene.clone());
                }
            }
            Self::Skill(_) | Self::Process(_) => {}
        }
        Ok(entries)
    }

    /// Clear every writer-owned filename field.
    pub fn clear_asset_filenames(&mut self) {
        match self {
            Self::Data(m) => m.assets = DataAssets::default(),
            Self::Skill(m) => m.assets = SkillAssets::default(),
            Self::Service(m) => m.assets = ServiceAssets::default(),
            Self::HardwareDevice(m) => m.assets.clear(),
            Self::Process(m) => m.assets = ProcessAssets::default(),
            Self::SceneObject(m) => m.assets = SceneObjectAssets::default(),
        }
    }
}

impl ReferencedDataHost for Manifest {
    fn visit_referenced_data(
        &self,
        visitor: &mut dyn FnMut(&ReferencedData) -> Result<()>,
    ) -> Result<()> {
        match self {
            Self::Data(m) => m.data.visit_referenced_data(visitor),
            Self::Skill(m) => match m.parameter.as_ref().and_then(|p| p.default_value.as_ref()) {
                Some(default_value) => default_value.visit_referenced_data(visitor),
                None => Ok(()),
            },
            Self::Process(m) => m.process.visit_referenced_data(visitor),
            Self::SceneObject(m) => m.user_data.visit_referenced_data(visitor),
            Self::Service(_) | Self::HardwareDevice(_) => Ok(()),
        }
    }

    fn visit_referenced_data_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut ReferencedData) -> Result<()>,
    ) -> Result<()> {
        match self {
            Self::Data(m) => m.data.visit_referenced_data_mut(visitor),
            Self::Skill(m) => match m.parameter.as_mut() {
                Some(p) => p.default_value.visit_referenced_data_mut(visitor),
                None => Ok(()),
            },
            Self::Process(m) => m.process.visit_referenced_data_mut(visitor),
            Self::SceneObject(m) => m.user_data.visit_referenced_data_mut(visitor),
            Self::Service(_) | Self::HardwareDevice(_) => Ok(()),
        }
    }
}
