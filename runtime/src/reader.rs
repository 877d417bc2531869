//! Bundle reader and processor.
//!
//! Reading is one lenient pass: find the manifest, optionally collect every
//! other entry, and report what the manifest does not account for.
//!
//! Processing is strict and runs in two phases over a rewindable stream:
//!
//! - **Manifest discovery**: walk once looking only for a manifest entry.
//! - **Asset materialization**: walk again with a handler per declared
//!   entry. Image entries are staged and handed to the image processor as
//!   they are visited; anything undeclared fails the walk.
//!
//! Referenced data is then resolved against the captured entries and the
//! result assembled into a [`ProcessedManifest`].

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use assetbundle_core::config::{ValidationFlags, DEFAULT_SPOOL_THRESHOLD_BYTES};
use assetbundle_core::error::{BundleError, Phase, Result};
use assetbundle_core::manifest::{AssetType, Manifest};
use assetbundle_core::payload::Payload;
use assetbundle_core::processed::{
    CapturedBlob, ImageDescriptor, ProcessedAsset, ProcessedData, ProcessedHardwareDevice,
    ProcessedManifest, ProcessedProcess, ProcessedSceneObject, ProcessedService,
    ProcessedServiceAssets, ProcessedSkill, ProcessedSkillAssets,
};
use assetbundle_core::referenced::{ReferencedData, ReferencedDataHost};

use crate::archive::{normalize_entry_name, StagedBlob};
use crate::image::ImageProcessor;
use crate::resolver::{
    resolve_referenced_data_in, BundleEntrySource, DirectorySource, ReferencedDataResolver,
};
use crate::types::TypeRegistry;
use crate::validator::ManifestValidator;
use crate::walker::{Fallback, WalkOutcome, Walker};

/// Result of a lenient read.
#[derive(Debug)]
pub struct BundleContents {
    pub manifest: Manifest,
    /// Every entry name in archive order, the manifest included.
    pub entries: Vec<String>,
    /// Non-manifest entry contents, when collected.
    pub auxiliary: BTreeMap<String, Vec<u8>>,
    /// Directory entries; they carry no content and are never declared.
    pub directories: Vec<String>,
}

impl BundleContents {
    /// Entries present in the archive that the manifest does not declare.
    pub fn undeclared_entries(&self) -> Result<Vec<String>> {
        let inventory = EntryInventory::of(&self.manifest)?;
        let manifest_entry = self.manifest.manifest_entry_name();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.as_str() != manifest_entry && !inventory.contains(e))
            .cloned()
            .collect())
    }

    /// Required entries the manifest declares but the archive lacks.
    pub fn missing_entries(&self) -> Result<Vec<String>> {
        let inventory = EntryInventory::of(&self.manifest)?;
        let present: BTreeSet<&str> = self.entries.iter().map(String::as_str).collect();
        Ok(inventory
            .required
            .into_iter()
            .filter(|e| !present.contains(e.as_str()))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    /// Keep the contents of every non-manifest entry.
    pub collect_auxiliary: bool,
    /// Only accept a manifest of this type.
    pub expected_type: Option<AssetType>,
}

/// Read a bundle's manifest (and optionally its other entries).
///
/// Undeclared entries are not an error here; see
/// [`BundleContents::undeclared_entries`].
pub fn read(reader: &mut dyn Read, options: ReadOptions) -> Result<BundleContents> {
    read_labeled(reader, options, "bundle")
}

pub fn read_path(path: &Path, options: ReadOptions) -> Result<BundleContents> {
    let label = path.display().to_string();
    let file = open_bundle(path).map_err(|e| e.in_phase(Phase::ManifestDiscovery, &label))?;
    read_labeled(&mut BufReader::new(file), options, &label)
}

fn read_labeled(reader: &mut dyn Read, options: ReadOptions, label: &str) -> Result<BundleContents> {
    let fallback = if options.collect_auxiliary {
        Fallback::Collect
    } else {
        Fallback::Ignore
    };
    let (manifest, outcome) = discover(reader, options.expected_type, fallback)
        .map_err(|e| e.in_phase(Phase::ManifestDiscovery, label))?;
    Ok(BundleContents {
        manifest,
        entries: outcome.visited,
        auxiliary: outcome.collected,
        directories: outcome.directories,
    })
}

fn open_bundle(path: &Path) -> Result<std::fs::File> {
    std::fs::File::open(path).map_err(|e| {
        BundleError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to open bundle {}: {}", path.display(), e),
        ))
    })
}

/// Walk the archive looking for exactly one manifest entry.
fn discover(
    reader: &mut dyn Read,
    expected: Option<AssetType>,
    fallback: Fallback<'_>,
) -> Result<(Manifest, WalkOutcome)> {
    let found = RefCell::new(Vec::new());
    let outcome = {
        let mut walker = Walker::new(fallback);
        let types = match expected {
            Some(t) => vec![t],
            None => AssetType::ALL.to_vec(),
        };
        for asset_type in types {
            let found = &found;
            walker.register(
                asset_type.manifest_entry_name(),
                move |entry: &str, r: &mut dyn Read| {
                    let manifest: Manifest = serde_json::from_reader(r)?;
                    if manifest.asset_type() != asset_type {
                        return Err(BundleError::MalformedBundle(format!(
                            "{} holds a {} manifest",
                            entry,
                            manifest.asset_type()
                        )));
                    }
                    found.borrow_mut().push((entry.to_string(), manifest));
                    Ok(())
                },
            );
        }
        walker.walk(reader)?
    };

    let mut found = found.into_inner();
    match found.len() {
        0 => Err(BundleError::MissingManifest {
            entry: match expected {
                Some(t) => t.manifest_entry_name().to_string(),
                None => "<asset_type>_manifest.json".to_string(),
            },
        }),
        1 => {
            let (entry, manifest) = found.remove(0);
            tracing::debug!(entry = %entry, asset = %manifest.id(), "Found manifest");
            Ok((manifest, outcome))
        }
        _ => Err(BundleError::MalformedBundle(format!(
            "bundle holds more than one manifest: {}",
            found
                .iter()
                .map(|(entry, _)| entry.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

/// Entries a manifest accounts for, split by how processing treats them.
#[derive(Debug, Default)]
struct EntryInventory {
    /// Must be present.
    required: BTreeSet<String>,
    /// Data file references; absent ones may resolve outside the bundle.
    optional: BTreeSet<String>,
    images: BTreeSet<String>,
    nested: BTreeSet<String>,
}

impl EntryInventory {
    fn of(manifest: &Manifest) -> Result<Self> {
        let mut references = BTreeSet::new();
        if let Manifest::Data(m) = manifest {
            m.data.visit_referenced_data(&mut |r| {
                if let ReferencedData::File { path, .. } = r {
                    if let Some(name) = normalize_entry_name(path) {
                        references.insert(name);
                    }
                }
                Ok(())
            })?;
        }

        let mut inventory = Self::default();
        for declared in manifest.declared_entries()? {
            let Some(name) = normalize_entry_name(&declared) else {
                continue;
            };
            if references.contains(&name) {
                inventory.optional.insert(name);
            } else {
                inventory.required.insert(name);
            }
        }
        inventory.images = manifest
            .image_filenames()
            .into_iter()
            .filter_map(normalize_entry_name)
            .collect();
        if let Manifest::HardwareDevice(m) = manifest {
            inventory.nested = m.assets.values().filter_map(|e| normalize_entry_name(e)).collect();
        }
        Ok(inventory)
    }

    fn contains(&self, name: &str) -> bool {
        self.required.contains(name) || self.optional.contains(name)
    }

    fn all(&self) -> impl Iterator<Item = &String> {
        self.required.iter().chain(self.optional.iter())
    }
}

pub struct ProcessOptions<'a> {
    pub resolver: &'a mut dyn ReferencedDataResolver,
    pub images: &'a mut dyn ImageProcessor,
    /// Directory for file references excluded from the bundle.
    pub base_dir: Option<PathBuf>,
    pub flags: ValidationFlags,
    pub spool_threshold_bytes: usize,
    /// Only accept a manifest of this type.
    pub expected_type: Option<AssetType>,
}

impl<'a> ProcessOptions<'a> {
    pub fn new(
        resolver: &'a mut dyn ReferencedDataResolver,
        images: &'a mut dyn ImageProcessor,
    ) -> Self {
        Self {
            resolver,
            images,
            base_dir: None,
            flags: ValidationFlags::default(),
            spool_threshold_bytes: DEFAULT_SPOOL_THRESHOLD_BYTES,
            expected_type: None,
        }
    }
}

/// Process a bundle from a rewindable stream.
pub fn process<R: Read + Seek>(
    reader: &mut R,
    options: &mut ProcessOptions<'_>,
) -> Result<ProcessedManifest> {
    process_labeled(reader, options, "bundle")
}

pub fn process_path(path: &Path, options: &mut ProcessOptions<'_>) -> Result<ProcessedManifest> {
    let label = path.display().to_string();
    let file = open_bundle(path).map_err(|e| e.in_phase(Phase::ManifestDiscovery, &label))?;
    process_labeled(&mut BufReader::new(file), options, &label)
}

/// Process a bundle from a forward-only stream.
///
/// The stream is staged first (in memory up to the spool threshold, then in
/// a temp file) so that it can be walked twice.
pub fn process_stream(
    reader: &mut dyn Read,
    options: &mut ProcessOptions<'_>,
) -> Result<ProcessedManifest> {
    let mut staged = StagedBlob::stage(reader, options.spool_threshold_bytes)
        .map_err(|e| e.in_phase(Phase::ManifestDiscovery, "stream"))?;
    tracing::debug!(
        size = staged.size(),
        spilled = staged.is_spilled(),
        "Staged bundle stream"
    );
    process_labeled(&mut staged, options, "stream")
}

fn process_labeled<R: Read + Seek>(
    reader: &mut R,
    options: &mut ProcessOptions<'_>,
    label: &str,
) -> Result<ProcessedManifest> {
    let (manifest, _) = discover(reader, options.expected_type, Fallback::Ignore)
        .map_err(|e| e.in_phase(Phase::ManifestDiscovery, label))?;
    let asset = manifest.id().to_string();

    let materialized = reader
        .seek(SeekFrom::Start(0))
        .map_err(BundleError::from)
        .and_then(|_| materialize(&manifest, reader, options))
        .map_err(|e| e.in_phase(Phase::AssetMaterialization, &asset))?;

    let asset_type = manifest.asset_type();
    let images = materialized.images.len();
    let processed = assemble(manifest, materialized, options)
        .map_err(|e| e.in_phase(Phase::Resolve, &asset))?;

    tracing::info!(
        asset = %asset,
        asset_type = %asset_type,
        images,
        "Bundle processed"
    );
    Ok(processed)
}

/// Everything phase two pulled out of the archive.
struct Materialized {
    /// Captured entries that are neither images nor nested bundles.
    blobs: BTreeMap<String, Vec<u8>>,
    images: BTreeMap<String, ImageDescriptor>,
    /// Local name -> processed nested asset
    nested: BTreeMap<String, ProcessedManifest>,
}

fn materialize<R: Read>(
    manifest: &Manifest,
    reader: &mut R,
    options: &mut ProcessOptions<'_>,
) -> Result<Materialized> {
    let inventory = EntryInventory::of(manifest)?;
    let threshold = options.spool_threshold_bytes;
    let id = manifest.id();

    let blobs = RefCell::new(BTreeMap::new());
    let images = RefCell::new(BTreeMap::new());
    let staged_nested = RefCell::new(BTreeMap::new());
    let outcome = {
        let processor = RefCell::new(&mut *options.images);
        let mut walker = Walker::new(Fallback::Unexpected);
        walker.register(manifest.manifest_entry_name(), |_: &str, _: &mut dyn Read| Ok(()));

        for name in inventory.all() {
            if inventory.images.contains(name) {
                walker.register(name.as_str(), |entry: &str, r: &mut dyn Read| {
                    let mut staged = StagedBlob::stage(r, threshold)?;
                    let descriptor = processor.borrow_mut().process(id, entry, &mut staged)?;
                    images.borrow_mut().insert(entry.to_string(), descriptor);
                    Ok(())
                });
            } else if inventory.nested.contains(name) {
                walker.register(name.as_str(), |entry: &str, r: &mut dyn Read| {
                    let staged = StagedBlob::stage(r, threshold)?;
                    staged_nested.borrow_mut().insert(entry.to_string(), staged);
                    Ok(())
                });
            } else {
                walker.register(name.as_str(), |entry: &str, r: &mut dyn Read| {
                    let mut data = Vec::new();
                    r.read_to_end(&mut data)?;
                    blobs.borrow_mut().insert(entry.to_string(), data);
                    Ok(())
                });
            }
        }
        walker.walk(reader)?
    };

    let visited: BTreeSet<&str> = outcome.visited.iter().map(String::as_str).collect();
    if let Some(missing) = inventory.required.iter().find(|e| !visited.contains(e.as_str())) {
        return Err(BundleError::MissingEntry {
            entry: missing.clone(),
        });
    }

    let blobs = blobs.into_inner();
    let validator = ManifestValidator::new(options.flags);
    if matches!(manifest, Manifest::Skill(_) | Manifest::Service(_)) {
        let registry = match manifest.file_descriptor_set_filename().and_then(|e| blobs.get(e)) {
            Some(bytes) => Some(TypeRegistry::from_bytes(bytes)?),
            None => None,
        };
        validator.validate(manifest, registry.as_ref())?;
    }

    let mut nested = BTreeMap::new();
    if let Manifest::HardwareDevice(m) = manifest {
        let asset = id.to_string();
        let mut staged = staged_nested.into_inner();
        for (local_name, entry) in &m.assets {
            let name = normalize_entry_name(entry).unwrap_or_else(|| entry.clone());
            let mut blob = staged
                .remove(&name)
                .ok_or_else(|| BundleError::MissingEntry { entry: name.clone() })?;
            let processed = process_nested(&asset, local_name, &name, &mut blob, options, &validator)
                .map_err(|e| e.in_entry(&name))?;
            nested.insert(local_name.clone(), processed);
        }
    }

    Ok(Materialized {
        blobs,
        images: images.into_inner(),
        nested,
    })
}

fn process_nested(
    asset: &str,
    local_name: &str,
    entry: &str,
    blob: &mut StagedBlob,
    options: &mut ProcessOptions<'_>,
    validator: &ManifestValidator,
) -> Result<ProcessedManifest> {
    let (nested_manifest, _) = discover(blob, None, Fallback::Ignore)?;
    validator.validate_nested(asset, local_name, &nested_manifest)?;
    blob.rewind()?;

    let mut nested_options = ProcessOptions {
        resolver: &mut *options.resolver,
        images: &mut *options.images,
        base_dir: options.base_dir.clone(),
        flags: options.flags,
        spool_threshold_bytes: options.spool_threshold_bytes,
        expected_type: Some(nested_manifest.asset_type()),
    };
    process_labeled(blob, &mut nested_options, entry)
}

fn take_blob(blobs: &mut BTreeMap<String, Vec<u8>>, entry: Option<&str>) -> Option<CapturedBlob> {
    let name = normalize_entry_name(entry?)?;
    let data = blobs.remove(&name)?;
    Some(CapturedBlob::new(name, data))
}

/// Resolve referenced data and build the processed manifest.
fn assemble(
    mut manifest: Manifest,
    materialized: Materialized,
    options: &mut ProcessOptions<'_>,
) -> Result<ProcessedManifest> {
    let Materialized {
        mut blobs,
        mut images,
        nested,
    } = materialized;

    let file_descriptor_set = take_blob(&mut blobs, manifest.file_descriptor_set_filename());
    let mut default_configuration = match &manifest {
        Manifest::Service(m) => {
            match take_blob(&mut blobs, m.assets.default_configuration_filename.as_deref()) {
                Some(blob) => Some(Payload::from_value(serde_json::from_slice(&blob.data)?)?),
                None => None,
            }
        }
        _ => None,
    };
    let scene = match &manifest {
        Manifest::SceneObject(m) => take_blob(&mut blobs, m.assets.scene_filename.as_deref()),
        _ => None,
    };

    // What is left are the data file references found in the bundle
    let mut source = BundleEntrySource::new(blobs);
    if let Some(base_dir) = &options.base_dir {
        source = source.with_fallback(DirectorySource::new(base_dir));
    }
    let summary = resolve_referenced_data_in(
        &mut [
            &mut manifest as &mut dyn ReferencedDataHost,
            &mut default_configuration as &mut dyn ReferencedDataHost,
        ],
        options.resolver,
        &source,
    )?;
    tracing::debug!(
        references = summary.references,
        distinct = summary.distinct,
        "Resolved manifest references"
    );

    let mut metadata = manifest.metadata().clone();
    metadata.strip_empty();

    let asset = match manifest {
        Manifest::Data(m) => ProcessedAsset::Data(ProcessedData {
            data: m.data,
            file_descriptor_set,
        }),
        Manifest::Skill(m) => {
            let image = m
                .assets
                .image_filename
                .as_deref()
                .and_then(normalize_entry_name)
                .and_then(|f| images.remove(&f));
            let assets = if file_descriptor_set.is_none() && image.is_none() {
                None
            } else {
                Some(ProcessedSkillAssets {
                    file_descriptor_set,
                    image,
                })
            };
            ProcessedAsset::Skill(ProcessedSkill {
                parameter: m.parameter,
                return_type: m.return_type,
                dependencies: m.dependencies,
                assets,
            })
        }
        Manifest::Service(m) => {
            let service_images: Vec<ImageDescriptor> = m
                .assets
                .image_filenames
                .iter()
                .filter_map(|f| normalize_entry_name(f))
                .filter_map(|f| images.remove(&f))
                .collect();
            let assets = if file_descriptor_set.is_none()
                && default_configuration.is_none()
                && service_images.is_empty()
            {
                None
            } else {
                Some(ProcessedServiceAssets {
                    parameter_descriptor: file_descriptor_set,
                    default_configuration,
                    images: service_images,
                })
            };
            ProcessedAsset::Service(ProcessedService {
                config_message_full_name: m.config_message_full_name,
                dependencies: m.dependencies,
                assets,
            })
        }
        Manifest::HardwareDevice(_) => {
            ProcessedAsset::HardwareDevice(ProcessedHardwareDevice { assets: nested })
        }
        Manifest::Process(m) => ProcessedAsset::Process(ProcessedProcess {
            process: m.process,
            file_descriptor_set,
        }),
        Manifest::SceneObject(m) => ProcessedAsset::SceneObject(ProcessedSceneObject {
            user_data: m.user_data,
            file_descriptor_set,
            scene,
        }),
    };

    Ok(ProcessedManifest { metadata, asset })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ArchiveBuilder;
    use crate::image::DigestImageProcessor;
    use crate::resolver::{NoOpResolver, PortableResolver};
    use assetbundle_core::manifest::{
        DataAssets, DataManifest, Dependencies, HardwareDeviceManifest, Metadata, SkillAssets,
        SkillManifest,
    };
    use assetbundle_core::{ErrorKind, Id};
    use serde_json::json;
    use std::io::Cursor;

    fn skill(image: Option<&str>) -> Manifest {
        Manifest::Skill(SkillManifest {
            metadata: Metadata::new(Id::new("ai.example", "grasp").unwrap()),
            parameter: None,
            return_type: None,
            dependencies: Dependencies::default(),
            assets: SkillAssets {
                file_descriptor_set_filename: None,
                image_filename: image.map(str::to_string),
            },
        })
    }

    fn bundle(manifest: &Manifest, extra: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder
            .append_bytes(
                manifest.manifest_entry_name(),
                &serde_json::to_vec(manifest).unwrap(),
            )
            .unwrap();
        for (name, data) in extra {
            builder.append_bytes(name, data).unwrap();
        }
        builder.finish().unwrap().0
    }

    fn process_bytes(data: Vec<u8>) -> Result<ProcessedManifest> {
        let mut resolver = NoOpResolver;
        let mut images = DigestImageProcessor::new("gcr.io", "robots");
        let mut options = ProcessOptions::new(&mut resolver, &mut images);
        process(&mut Cursor::new(data), &mut options)
    }

    #[test]
    fn test_read_reports_undeclared_entries() {
        let data = bundle(&skill(None), &[("notes.txt", b"hi")]);
        let contents = read(
            &mut data.as_slice(),
            ReadOptions {
                collect_auxiliary: true,
                expected_type: None,
            },
        )
        .unwrap();
        assert_eq!(contents.manifest.asset_type(), AssetType::Skill);
        assert_eq!(contents.undeclared_entries().unwrap(), vec!["notes.txt"]);
        assert_eq!(contents.auxiliary["notes.txt"], b"hi");
    }

    #[test]
    fn test_read_lists_directories_and_process_ignores_them() {
        let manifest = skill(None);
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        builder.append_data(&mut header, "scratch/", &[][..]).unwrap();
        let json = serde_json::to_vec(&manifest).unwrap();
        let mut header = tar::Header::new_gnu();
        header.set_mode(0o644);
        header.set_size(json.len() as u64);
        builder
            .append_data(&mut header, manifest.manifest_entry_name(), &json[..])
            .unwrap();
        let data = builder.into_inner().unwrap();

        let contents = read(&mut data.as_slice(), ReadOptions::default()).unwrap();
        assert_eq!(contents.directories, vec!["scratch"]);
        assert!(contents.undeclared_entries().unwrap().is_empty());
        assert!(process_bytes(data).is_ok());
    }

    #[test]
    fn test_read_missing_manifest() {
        let mut builder = ArchiveBuilder::new(Vec::new());
        builder.append_bytes("readme.md", b"x").unwrap();
        let data = builder.finish().unwrap().0;
        let err = read(&mut data.as_slice(), ReadOptions::default()).unwrap_err();
        assert!(matches!(err.root(), BundleError::MissingManifest { .. }));
        assert!(matches!(
            err,
            BundleError::Phase {
                phase: Phase::ManifestDiscovery,
                ..
            }
        ));
    }

    #[test]
    fn test_read_rejects_two_manifests() {
        let mut builder = ArchiveBuilder::new(Vec::new());
        let a = skill(None);
        let b = Manifest::HardwareDevice(HardwareDeviceManifest {
            metadata: Metadata::new(Id::new("ai.example", "cell").unwrap()),
            assets: BTreeMap::new(),
        });
        builder
            .append_bytes(a.manifest_entry_name(), &serde_json::to_vec(&a).unwrap())
            .unwrap();
        builder
            .append_bytes(b.manifest_entry_name(), &serde_json::to_vec(&b).unwrap())
            .unwrap();
        let data = builder.finish().unwrap().0;
        let err = read(&mut data.as_slice(), ReadOptions::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Structural);
    }

    #[test]
    fn test_expected_type_mismatch() {
        let data = bundle(&skill(None), &[]);
        let err = read(
            &mut data.as_slice(),
            ReadOptions {
                collect_auxiliary: false,
                expected_type: Some(AssetType::Service),
            },
        )
        .unwrap_err();
        assert!(matches!(err.root(), BundleError::MissingManifest { entry } if entry == "service_manifest.json"));
    }

    #[test]
    fn test_process_rejects_undeclared_entry() {
        let data = bundle(&skill(None), &[("notes.txt", b"hi")]);
        let err = process_bytes(data).unwrap_err();
        assert!(matches!(
            err,
            BundleError::Phase {
                phase: Phase::AssetMaterialization,
                ..
            }
        ));
        assert!(matches!(err.root(), BundleError::UnexpectedEntry { entry } if entry == "notes.txt"));
    }

    #[test]
    fn test_process_missing_declared_entry() {
        let data = bundle(&skill(Some("grasp.tar")), &[]);
        let err = process_bytes(data).unwrap_err();
        assert!(matches!(err.root(), BundleError::MissingEntry { entry } if entry == "grasp.tar"));
    }

    #[test]
    fn test_process_skill_image() {
        let data = bundle(&skill(Some("grasp.tar")), &[("grasp.tar", b"image")]);
        let processed = process_bytes(data).unwrap();
        let ProcessedAsset::Skill(s) = processed.asset else {
            panic!("expected a skill")
        };
        let image = s.assets.unwrap().image.unwrap();
        assert_eq!(image.name, "robots/ai.example.grasp");
        assert_eq!(image.digest, assetbundle_core::digest::sha256_bytes(b"image"));
    }

    #[test]
    fn test_process_skill_manifest_only_has_no_assets() {
        let processed = process_bytes(bundle(&skill(None), &[])).unwrap();
        let ProcessedAsset::Skill(s) = processed.asset else {
            panic!("expected a skill")
        };
        assert!(s.assets.is_none());
    }

    #[test]
    fn test_process_stream_stages_input() {
        let data = bundle(&skill(None), &[]);
        let mut resolver = NoOpResolver;
        let mut images = DigestImageProcessor::new("gcr.io", "");
        let mut options = ProcessOptions::new(&mut resolver, &mut images);
        options.spool_threshold_bytes = 16;
        let processed = process_stream(&mut data.as_slice(), &mut options).unwrap();
        assert_eq!(processed.metadata.id.to_string(), "ai.example.grasp");
    }

    #[test]
    fn test_process_data_reference_digest_mismatch() {
        let manifest = Manifest::Data(DataManifest {
            metadata: Metadata::new(Id::new("ai.example", "blobs").unwrap()),
            data: Payload::new(
                "google.protobuf.Struct",
                json!({
                    "x": ReferencedData::file(
                        "a.bin",
                        Some(assetbundle_core::digest::sha256_bytes(b"original")),
                    )
                    .to_value()
                }),
            )
            .unwrap(),
            assets: DataAssets::default(),
        });
        let data = bundle(&manifest, &[("a.bin", b"tampered")]);

        let mut resolver = PortableResolver;
        let mut images = DigestImageProcessor::new("gcr.io", "");
        let mut options = ProcessOptions::new(&mut resolver, &mut images);
        let err = process(&mut Cursor::new(data), &mut options).unwrap_err();
        assert!(matches!(err, BundleError::Phase { phase: Phase::Resolve, .. }));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn test_process_absent_data_reference_without_fallback() {
        let manifest = Manifest::Data(DataManifest {
            metadata: Metadata::new(Id::new("ai.example", "blobs").unwrap()),
            data: Payload::new(
                "google.protobuf.Struct",
                json!({ "x": ReferencedData::file("elsewhere.bin", None).to_value() }),
            )
            .unwrap(),
            assets: DataAssets::default(),
        });
        let data = bundle(&manifest, &[]);

        // NoOp leaves it alone
        assert!(process_bytes(data.clone()).is_ok());

        // Inlining needs the bytes
        let mut resolver = PortableResolver;
        let mut images = DigestImageProcessor::new("gcr.io", "");
        let mut options = ProcessOptions::new(&mut resolver, &mut images);
        let err = process(&mut Cursor::new(data), &mut options).unwrap_err();
        assert!(matches!(err.root(), BundleError::MissingEntry { .. }));
    }

    #[test]
    fn test_process_nested_hardware_device() {
        let inner = bundle(&skill(Some("grasp.tar")), &[("grasp.tar", b"image")]);
        let device = Manifest::HardwareDevice(HardwareDeviceManifest {
            metadata: Metadata::new(Id::new("ai.example", "cell").unwrap()),
            assets: BTreeMap::from([(
                "gripper".to_string(),
                "assets/gripper.bundle.tar".to_string(),
            )]),
        });
        let data = bundle(&device, &[("assets/gripper.bundle.tar", &inner)]);
        let processed = process_bytes(data).unwrap();
        let ProcessedAsset::HardwareDevice(d) = processed.asset else {
            panic!("expected a hardware device")
        };
        let ProcessedAsset::Skill(s) = &d.assets["gripper"].asset else {
            panic!("expected a nested skill")
        };
        assert!(s.assets.as_ref().unwrap().image.is_some());
    }

    #[test]
    fn test_nested_error_names_entry() {
        let inner = bundle(&skill(None), &[("junk", b"x")]);
        let device = Manifest::HardwareDevice(HardwareDeviceManifest {
            metadata: Metadata::new(Id::new("ai.example", "cell").unwrap()),
            assets: BTreeMap::from([(
                "gripper".to_string(),
                "assets/gripper.bundle.tar".to_string(),
            )]),
        });
        let data = bundle(&device, &[("assets/gripper.bundle.tar", &inner)]);
        let err = process_bytes(data).unwrap_err();
        assert!(err.to_string().contains("assets/gripper.bundle.tar"));
        assert!(matches!(err.root(), BundleError::UnexpectedEntry { entry } if entry == "junk"));
    }
}
