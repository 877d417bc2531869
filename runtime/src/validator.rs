//! Per-asset-type manifest validation.

use assetbundle_core::config::ValidationFlags;
use assetbundle_core::error::{BundleError, Result};
use assetbundle_core::id::validate_name;
use assetbundle_core::manifest::{AssetType, Dependencies, Manifest};
use assetbundle_core::payload::Payload;

use crate::types::{TypeRegistry, RESOLVED_DEPENDENCY_TYPE};

/// Checks a manifest against its asset-type rules.
///
/// Message names resolve against the registry built from the bundle's
/// descriptor set. Without one, only the built-in types resolve.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestValidator {
    flags: ValidationFlags,
}

impl ManifestValidator {
    pub fn new(flags: ValidationFlags) -> Self {
        Self { flags }
    }

    pub fn flags(&self) -> ValidationFlags {
        self.flags
    }

    pub fn validate(&self, manifest: &Manifest, registry: Option<&TypeRegistry>) -> Result<()> {
        let metadata = manifest.metadata();
        metadata.id.validate()?;
        metadata.id_version()?;
        let asset = metadata.id.to_string();

        let builtin;
        let (registry, has_descriptors) = match registry {
            Some(r) => (r, true),
            None => {
                builtin = TypeRegistry::builtin();
                (&builtin, false)
            }
        };

        let names = declared_message_names(manifest);
        self.check_message_names(&asset, &names, registry, has_descriptors)?;

        match manifest {
            Manifest::Skill(m) => {
                let parameter = m.parameter.as_ref().map(|p| p.message_full_name.as_str());
                self.check_dependencies(&asset, &m.dependencies, parameter, registry)?;
            }
            Manifest::Service(m) => {
                self.check_dependencies(
                    &asset,
                    &m.dependencies,
                    m.config_message_full_name.as_deref(),
                    registry,
                )?;
            }
            Manifest::HardwareDevice(m) => {
                for local_name in m.assets.keys() {
                    validate_name(local_name).map_err(|e| BundleError::Validation {
                        asset: asset.clone(),
                        message: format!("invalid local asset name: {}", e),
                    })?;
                }
            }
            Manifest::Data(_) | Manifest::Process(_) | Manifest::SceneObject(_) => {}
        }

        tracing::debug!(asset = %asset, asset_type = %manifest.asset_type(), "Manifest validated");
        Ok(())
    }

    /// Check a payload that travels beside the manifest (e.g. a service's
    /// default configuration) against the same registry.
    pub fn validate_payload(
        &self,
        asset: &str,
        payload: &Payload,
        registry: Option<&TypeRegistry>,
    ) -> Result<()> {
        let names = payload.message_type_names();
        match registry {
            Some(r) => self.check_message_names(asset, &names, r, true),
            None => self.check_message_names(asset, &names, &TypeRegistry::builtin(), false),
        }
    }

    /// A hardware device may bundle any asset type except another device.
    pub fn validate_nested(&self, asset: &str, local_name: &str, nested: &Manifest) -> Result<()> {
        if nested.asset_type() == AssetType::HardwareDevice {
            return Err(BundleError::Validation {
                asset: asset.to_string(),
                message: format!(
                    "nested asset '{}' ({}) is a hardware device; devices cannot nest devices",
                    local_name,
                    nested.id()
                ),
            });
        }
        Ok(())
    }

    fn check_message_names(
        &self,
        asset: &str,
        names: &[String],
        registry: &TypeRegistry,
        has_descriptors: bool,
    ) -> Result<()> {
        for name in names {
            if registry.contains(name) {
                continue;
            }
            if !has_descriptors {
                return Err(BundleError::Validation {
                    asset: asset.to_string(),
                    message: format!(
                        "message type '{}' is declared but no descriptor set was provided",
                        name
                    ),
                });
            }
            registry.resolve(name)?;
        }
        Ok(())
    }

    fn check_dependencies(
        &self,
        asset: &str,
        dependencies: &Dependencies,
        message: Option<&str>,
        registry: &TypeRegistry,
    ) -> Result<()> {
        let in_manifest = !dependencies.is_empty();
        let in_payload = match message {
            Some(name) => registry.contains_field_of_type(name, RESOLVED_DEPENDENCY_TYPE)?,
            None => false,
        };

        if in_manifest && self.flags.disallow_manifest_dependencies {
            return Err(BundleError::DisallowedMechanism {
                asset: asset.to_string(),
                message: "required_equipment is not allowed; declare dependencies in the parameter message".to_string(),
            });
        }
        if in_payload && self.flags.disallow_payload_dependencies {
            return Err(BundleError::DisallowedMechanism {
                asset: asset.to_string(),
                message: format!(
                    "{} fields are not allowed; declare dependencies as required_equipment",
                    RESOLVED_DEPENDENCY_TYPE
                ),
            });
        }
        if in_manifest && in_payload {
            return Err(BundleError::ConflictingDependencies {
                asset: asset.to_string(),
                message: format!(
                    "required_equipment is set and {} declares {} fields",
                    message.unwrap_or_default(),
                    RESOLVED_DEPENDENCY_TYPE
                ),
            });
        }
        Ok(())
    }
}

/// Every message name a manifest declares, payload `@type`s included.
fn declared_message_names(manifest: &Manifest) -> Vec<String> {
    let mut names = Vec::new();
    match manifest {
        Manifest::Data(m) => names.extend(m.data.message_type_names()),
        Manifest::Skill(m) => {
            if let Some(parameter) = &m.parameter {
                names.push(parameter.message_full_name.clone());
                if let Some(default_value) = &parameter.default_value {
                    names.extend(default_value.message_type_names());
                }
            }
            if let Some(return_type) = &m.return_type {
                names.push(return_type.message_full_name.clone());
            }
        }
        Manifest::Service(m) => names.extend(m.config_message_full_name.iter().cloned()),
        Manifest::Process(m) => names.extend(m.process.message_type_names()),
        Manifest::SceneObject(m) => {
            if let Some(user_data) = &m.user_data {
                names.extend(user_data.message_type_names());
            }
        }
        Manifest::HardwareDevice(_) => {}
    }
    names.sort();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::test_support::*;
    use assetbundle_core::manifest::{
        EquipmentSelector, HardwareDeviceManifest, Metadata, ParameterSpec, SkillAssets,
        SkillManifest,
    };
    use assetbundle_core::{ErrorKind, Id};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn registry() -> TypeRegistry {
        TypeRegistry::from_bytes(&descriptor_set(
            "ai.example",
            vec![
                message("GraspParams", vec![scalar_field("object")]),
                message("GraspResult", vec![scalar_field("ok")]),
                message(
                    "DepParams",
                    vec![message_field("gripper", RESOLVED_DEPENDENCY_TYPE)],
                ),
            ],
        ))
        .unwrap()
    }

    fn skill(parameter: Option<&str>) -> SkillManifest {
        SkillManifest {
            metadata: Metadata::new(Id::new("ai.example", "grasp").unwrap()),
            parameter: parameter.map(|name| ParameterSpec {
                message_full_name: name.to_string(),
                default_value: None,
            }),
            return_type: None,
            dependencies: Dependencies::default(),
            assets: SkillAssets::default(),
        }
    }

    fn with_equipment(mut m: SkillManifest) -> SkillManifest {
        m.dependencies.required_equipment.insert(
            "gripper".to_string(),
            EquipmentSelector {
                capability_names: vec!["ai.example.Gripper".to_string()],
            },
        );
        m
    }

    #[test]
    fn test_valid_skill() {
        let validator = ManifestValidator::default();
        let m = Manifest::Skill(skill(Some("ai.example.GraspParams")));
        validator.validate(&m, Some(&registry())).unwrap();
    }

    #[test]
    fn test_unresolved_parameter_type() {
        let validator = ManifestValidator::default();
        let m = Manifest::Skill(skill(Some("ai.example.Missing")));
        let err = validator.validate(&m, Some(&registry())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_declared_type_without_descriptor_set() {
        let validator = ManifestValidator::default();
        let m = Manifest::Skill(skill(Some("ai.example.GraspParams")));
        let err = validator.validate(&m, None).unwrap_err();
        assert!(matches!(err, BundleError::Validation { .. }));
    }

    #[test]
    fn test_builtin_types_need_no_descriptor_set() {
        let validator = ManifestValidator::default();
        let m = Manifest::Skill(skill(Some("google.protobuf.Empty")));
        validator.validate(&m, None).unwrap();
    }

    #[test]
    fn test_invalid_id() {
        let mut m = skill(None);
        m.metadata.id.name = "Bad-Name".to_string();
        let err = ManifestValidator::default()
            .validate(&Manifest::Skill(m), None)
            .unwrap_err();
        assert!(matches!(err, BundleError::InvalidId { field: "name", .. }));
    }

    #[test]
    fn test_invalid_version() {
        let mut m = skill(None);
        m.metadata.version = Some("one".to_string());
        let err = ManifestValidator::default()
            .validate(&Manifest::Skill(m), None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_conflicting_dependencies() {
        let m = Manifest::Skill(with_equipment(skill(Some("ai.example.DepParams"))));
        let err = ManifestValidator::default()
            .validate(&m, Some(&registry()))
            .unwrap_err();
        assert!(matches!(err, BundleError::ConflictingDependencies { .. }));
    }

    #[test]
    fn test_either_mechanism_alone_is_fine() {
        let validator = ManifestValidator::default();
        let registry = registry();
        validator
            .validate(
                &Manifest::Skill(with_equipment(skill(Some("ai.example.GraspParams")))),
                Some(&registry),
            )
            .unwrap();
        validator
            .validate(&Manifest::Skill(skill(Some("ai.example.DepParams"))), Some(&registry))
            .unwrap();
    }

    #[test]
    fn test_disallow_manifest_dependencies() {
        let validator = ManifestValidator::new(ValidationFlags {
            disallow_manifest_dependencies: true,
            disallow_payload_dependencies: false,
        });
        let m = Manifest::Skill(with_equipment(skill(None)));
        let err = validator.validate(&m, None).unwrap_err();
        assert!(matches!(err, BundleError::DisallowedMechanism { .. }));
    }

    #[test]
    fn test_disallow_payload_dependencies() {
        let validator = ManifestValidator::new(ValidationFlags {
            disallow_manifest_dependencies: false,
            disallow_payload_dependencies: true,
        });
        let m = Manifest::Skill(skill(Some("ai.example.DepParams")));
        let err = validator.validate(&m, Some(&registry())).unwrap_err();
        assert!(matches!(err, BundleError::DisallowedMechanism { .. }));
    }

    #[test]
    fn test_default_value_types_must_resolve() {
        let mut m = skill(Some("ai.example.GraspParams"));
        if let Some(p) = m.parameter.as_mut() {
            p.default_value =
                Some(Payload::new("ai.example.Other", json!({ "object": "cup" })).unwrap());
        }
        let err = ManifestValidator::default()
            .validate(&Manifest::Skill(m), Some(&registry()))
            .unwrap_err();
        assert!(matches!(err, BundleError::UnresolvedType { .. }));
    }

    #[test]
    fn test_hardware_device_local_names() {
        let mut assets = BTreeMap::new();
        assets.insert("Camera".to_string(), "assets/Camera.bundle.tar".to_string());
        let m = Manifest::HardwareDevice(HardwareDeviceManifest {
            metadata: Metadata::new(Id::new("ai.example", "cell").unwrap()),
            assets,
        });
        let err = ManifestValidator::default().validate(&m, None).unwrap_err();
        assert!(matches!(err, BundleError::Validation { .. }));
    }

    #[test]
    fn test_nested_hardware_device_rejected() {
        let nested = Manifest::HardwareDevice(HardwareDeviceManifest {
            metadata: Metadata::new(Id::new("ai.example", "inner").unwrap()),
            assets: BTreeMap::new(),
        });
        let err = ManifestValidator::default()
            .validate_nested("ai.example.cell", "inner", &nested)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        ManifestValidator::default()
            .validate_nested("ai.example.cell", "grasp", &Manifest::Skill(skill(None)))
            .unwrap();
    }
}
