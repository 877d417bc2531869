//! Bundle writer.
//!
//! Assembles a manifest and its auxiliary inputs into one archive:
//!
//! 1. assign entry names (the writer owns every `*_filename` field)
//! 2. validate the manifest against its asset-type rules
//! 3. resolve referenced data with the caller's resolver
//! 4. for data assets, bundle the remaining file references
//! 5. serialize the manifest deterministically and emit the archive
//!
//! [`write`] goes through a temp file in the destination directory and
//! renames it into place, so a failed write never leaves a partial bundle
//! at the final path.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use assetbundle_core::config::ValidationFlags;
use assetbundle_core::digest::{read_all_with_digest, verify_digest};
use assetbundle_core::error::{BundleError, Phase, Result};
use assetbundle_core::manifest::{
    AssetType, Manifest, DEFAULT_CONFIGURATION_ENTRY, FILE_DESCRIPTOR_SET_ENTRY,
    NESTED_BUNDLE_PREFIX, NESTED_BUNDLE_SUFFIX, SCENE_ENTRY_PREFIX,
};
use assetbundle_core::payload::Payload;
use assetbundle_core::referenced::{ReferencedData, ReferencedDataHost};

use crate::archive::ArchiveBuilder;
use crate::reader::{self, ReadOptions};
use crate::resolver::{
    resolve_referenced_data_in, DirectorySource, ReferencedDataResolver, ReferencedFileSource,
    ResolveSummary,
};
use crate::types::TypeRegistry;
use crate::validator::ManifestValidator;

/// Side files handed to the writer by role.
#[derive(Debug, Clone, Default)]
pub struct AuxiliaryInputs {
    /// Binary `FileDescriptorSet` for the manifest's message types.
    pub file_descriptor_set: Option<PathBuf>,
    /// Image archives (skills take at most one).
    pub images: Vec<PathBuf>,
    /// Service default configuration (payload JSON).
    pub default_configuration: Option<PathBuf>,
    /// Scene file of a scene object.
    pub scene: Option<PathBuf>,
    /// Hardware device: local name -> nested bundle.
    pub nested_bundles: BTreeMap<String, PathBuf>,
}

pub struct WriteOptions<'a> {
    pub resolver: &'a mut dyn ReferencedDataResolver,
    /// Directory file references are resolved against.
    pub base_dir: PathBuf,
    /// File references left as-is and not bundled.
    pub excluded: Vec<String>,
    /// When set, every bundled file reference must be listed here.
    pub expected: Option<Vec<String>>,
    pub flags: ValidationFlags,
}

impl<'a> WriteOptions<'a> {
    pub fn new(resolver: &'a mut dyn ReferencedDataResolver, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            resolver,
            base_dir: base_dir.into(),
            excluded: Vec::new(),
            expected: None,
            flags: ValidationFlags::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteSummary {
    pub asset: String,
    pub asset_type: AssetType,
    /// Entries in archive order with their sizes.
    pub entries: Vec<(String, u64)>,
    pub references: ResolveSummary,
}

enum EntryContent {
    Bytes(Vec<u8>),
    File(PathBuf),
}

struct PreparedBundle {
    asset: String,
    asset_type: AssetType,
    manifest_entry: &'static str,
    manifest_json: Vec<u8>,
    entries: Vec<(String, EntryContent)>,
    references: ResolveSummary,
}

/// Write a bundle to `path` atomically.
pub fn write(
    manifest: &Manifest,
    aux: &AuxiliaryInputs,
    options: &mut WriteOptions<'_>,
    path: &Path,
) -> Result<WriteSummary> {
    let prepared = prepare(manifest, aux, options)?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".bundle-")
        .tempfile_in(parent)
        .map_err(|e| {
            BundleError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create temp file in {}: {}", parent.display(), e),
            ))
            .in_phase(Phase::Write, &prepared.asset)
        })?;

    let entries = {
        let mut out = BufWriter::new(tmp.as_file_mut());
        let entries = emit(&prepared, &mut out)?;
        out.flush()
            .map_err(|e| BundleError::IoError(e).in_phase(Phase::Write, &prepared.asset))?;
        entries
    };

    tmp.persist(path).map_err(|e| {
        BundleError::IoError(std::io::Error::new(
            e.error.kind(),
            format!("Failed to persist bundle {}: {}", path.display(), e.error),
        ))
        .in_phase(Phase::Write, &prepared.asset)
    })?;

    tracing::info!(
        asset = %prepared.asset,
        path = %path.display(),
        entries = entries.len(),
        "Bundle written"
    );

    Ok(summary(prepared, entries))
}

/// Write a bundle to an open stream.
///
/// Validation and resolution complete before the first byte is written,
/// but an I/O failure midway leaves whatever was already written in the
/// stream; use [`write`] for an atomic result.
pub fn write_to(
    manifest: &Manifest,
    aux: &AuxiliaryInputs,
    options: &mut WriteOptions<'_>,
    writer: &mut dyn Write,
) -> Result<WriteSummary> {
    let prepared = prepare(manifest, aux, options)?;
    let entries = emit(&prepared, writer)?;
    tracing::info!(asset = %prepared.asset, entries = entries.len(), "Bundle written");
    Ok(summary(prepared, entries))
}

fn summary(prepared: PreparedBundle, entries: Vec<(String, u64)>) -> WriteSummary {
    WriteSummary {
        asset: prepared.asset,
        asset_type: prepared.asset_type,
        entries,
        references: prepared.references,
    }
}

fn emit(prepared: &PreparedBundle, writer: &mut dyn Write) -> Result<Vec<(String, u64)>> {
    emit_entries(prepared, writer).map_err(|e| e.in_phase(Phase::Write, &prepared.asset))
}

fn emit_entries(prepared: &PreparedBundle, writer: &mut dyn Write) -> Result<Vec<(String, u64)>> {
    let mut builder = ArchiveBuilder::new(writer);
    builder.append_bytes(prepared.manifest_entry, &prepared.manifest_json)?;
    for (name, content) in &prepared.entries {
        match content {
            EntryContent::Bytes(data) => builder.append_bytes(name, data)?,
            EntryContent::File(path) => {
                let mut file = std::fs::File::open(path).map_err(|e| {
                    BundleError::IoError(std::io::Error::new(
                        e.kind(),
                        format!("Failed to open {}: {}", path.display(), e),
                    ))
                })?;
                let size = file.metadata()?.len();
                builder.append_reader(name, size, &mut file)?;
            }
        }
    }
    let (_, entries) = builder.finish()?;
    Ok(entries)
}

/// Entry assignments made from the auxiliary inputs.
#[derive(Default)]
struct Assigned {
    file_descriptor_set: Option<Vec<u8>>,
    images: Vec<(String, PathBuf)>,
    default_configuration: Option<Payload>,
    scene: Option<(String, PathBuf)>,
    nested: Vec<(String, String, PathBuf)>,
}

fn prepare(
    manifest: &Manifest,
    aux: &AuxiliaryInputs,
    options: &mut WriteOptions<'_>,
) -> Result<PreparedBundle> {
    let asset = manifest.id().to_string();
    let mut manifest = manifest.clone();

    // Validate
    let assigned = assign_entries(&mut manifest, aux)
        .and_then(|assigned| {
            let registry = match &assigned.file_descriptor_set {
                Some(bytes) => Some(TypeRegistry::from_bytes(bytes)?),
                None => None,
            };
            validate(&manifest, &assigned, registry.as_ref(), options.flags)?;
            Ok(assigned)
        })
        .map_err(|e| e.in_phase(Phase::Validate, &asset))?;
    let Assigned {
        file_descriptor_set,
        images,
        mut default_configuration,
        scene,
        nested,
    } = assigned;

    // Resolve
    let (references, data_files) = resolve(&mut manifest, &mut default_configuration, options)
        .map_err(|e| e.in_phase(Phase::Resolve, &asset))?;

    let manifest_json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| BundleError::from(e).in_phase(Phase::Write, &asset))?;

    let mut entries = Vec::new();
    if let Some(bytes) = file_descriptor_set {
        entries.push((FILE_DESCRIPTOR_SET_ENTRY.to_string(), EntryContent::Bytes(bytes)));
    }
    if let Some(config) = &default_configuration {
        let bytes = serde_json::to_vec_pretty(config)
            .map_err(|e| BundleError::from(e).in_phase(Phase::Write, &asset))?;
        entries.push((DEFAULT_CONFIGURATION_ENTRY.to_string(), EntryContent::Bytes(bytes)));
    }
    for (name, path) in images {
        entries.push((name, EntryContent::File(path)));
    }
    if let Some((name, path)) = scene {
        entries.push((name, EntryContent::File(path)));
    }
    for (_, name, path) in nested {
        entries.push((name, EntryContent::File(path)));
    }
    for (name, data) in data_files {
        entries.push((name, EntryContent::Bytes(data)));
    }

    Ok(PreparedBundle {
        asset,
        asset_type: manifest.asset_type(),
        manifest_entry: manifest.manifest_entry_name(),
        manifest_json,
        entries,
        references,
    })
}

fn resolve(
    manifest: &mut Manifest,
    default_configuration: &mut Option<Payload>,
    options: &mut WriteOptions<'_>,
) -> Result<(ResolveSummary, BTreeMap<String, Vec<u8>>)> {
    let source = DirectorySource::new(&options.base_dir);
    let summary = resolve_referenced_data_in(
        &mut [
            &mut *manifest as &mut dyn ReferencedDataHost,
            &mut *default_configuration as &mut dyn ReferencedDataHost,
        ],
        options.resolver,
        &source,
    )?;

    let data_files = match manifest {
        Manifest::Data(m) => bundle_file_references(
            &mut m.data,
            &source,
            &options.excluded,
            options.expected.as_deref(),
        )?,
        _ => BTreeMap::new(),
    };
    Ok((summary, data_files))
}

fn input_error(manifest: &Manifest, message: String) -> BundleError {
    BundleError::Validation {
        asset: manifest.id().to_string(),
        message,
    }
}

fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BundleError::ConfigError(format!("Input path {} has no file name", path.display()))
        })
}

fn require_file(path: &Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(BundleError::IoError(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Input file {} does not exist", path.display()),
        )))
    }
}

/// Fill the manifest's filename fields from the auxiliary inputs.
fn assign_entries(manifest: &mut Manifest, aux: &AuxiliaryInputs) -> Result<Assigned> {
    manifest.clear_asset_filenames();
    let mut assigned = Assigned::default();
    let asset_type = manifest.asset_type();

    if let Some(path) = &aux.file_descriptor_set {
        let fds_name = Some(FILE_DESCRIPTOR_SET_ENTRY.to_string());
        match manifest {
            Manifest::Data(m) => m.assets.file_descriptor_set_filename = fds_name,
            Manifest::Skill(m) => m.assets.file_descriptor_set_filename = fds_name,
            Manifest::Service(m) => m.assets.parameter_descriptor_filename = fds_name,
            Manifest::Process(m) => m.assets.file_descriptor_set_filename = fds_name,
            Manifest::SceneObject(m) => m.assets.file_descriptor_set_filename = fds_name,
            Manifest::HardwareDevice(_) => {
                return Err(input_error(
                    manifest,
                    "hardware devices do not take a descriptor set".to_string(),
                ))
            }
        }
        let data = std::fs::read(path).map_err(|e| {
            BundleError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read descriptor set {}: {}", path.display(), e),
            ))
        })?;
        assigned.file_descriptor_set = Some(data);
    }

    if !aux.images.is_empty() {
        let mut names = BTreeSet::new();
        for path in &aux.images {
            require_file(path)?;
            let name = basename(path)?;
            if !names.insert(name.clone()) {
                return Err(input_error(
                    manifest,
                    format!("two images share the file name {}", name),
                ));
            }
            assigned.images.push((name, path.clone()));
        }
        match manifest {
            Manifest::Skill(m) if assigned.images.len() == 1 => {
                m.assets.image_filename = Some(assigned.images[0].0.clone());
            }
            Manifest::Skill(_) => {
                return Err(input_error(
                    manifest,
                    format!("skills take one image, got {}", assigned.images.len()),
                ))
            }
            Manifest::Service(m) => {
                m.assets.image_filenames = assigned.images.iter().map(|(n, _)| n.clone()).collect();
            }
            _ => {
                return Err(input_error(
                    manifest,
                    format!("{} assets do not take images", asset_type),
                ))
            }
        }
    }

    if let Some(path) = &aux.default_configuration {
        let Manifest::Service(m) = manifest else {
            return Err(input_error(
                manifest,
                format!("{} assets do not take a default configuration", asset_type),
            ));
        };
        let data = std::fs::read(path).map_err(|e| {
            BundleError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to read default configuration {}: {}", path.display(), e),
            ))
        })?;
        let payload = Payload::from_value(serde_json::from_slice(&data)?)?;
        m.assets.default_configuration_filename = Some(DEFAULT_CONFIGURATION_ENTRY.to_string());
        assigned.default_configuration = Some(payload);
    }

    if let Some(path) = &aux.scene {
        let Manifest::SceneObject(m) = manifest else {
            return Err(input_error(
                manifest,
                format!("{} assets do not take a scene file", asset_type),
            ));
        };
        require_file(path)?;
        let name = format!("{}{}", SCENE_ENTRY_PREFIX, basename(path)?);
        m.assets.scene_filename = Some(name.clone());
        assigned.scene = Some((name, path.clone()));
    }

    if !aux.nested_bundles.is_empty() {
        let Manifest::HardwareDevice(m) = manifest else {
            return Err(input_error(
                manifest,
                format!("{} assets do not take nested bundles", asset_type),
            ));
        };
        for (local_name, path) in &aux.nested_bundles {
            require_file(path)?;
            let name = format!("{}{}{}", NESTED_BUNDLE_PREFIX, local_name, NESTED_BUNDLE_SUFFIX);
            m.assets.insert(local_name.clone(), name.clone());
            assigned.nested.push((local_name.clone(), name, path.clone()));
        }
    }

    Ok(assigned)
}

fn validate(
    manifest: &Manifest,
    assigned: &Assigned,
    registry: Option<&TypeRegistry>,
    flags: ValidationFlags,
) -> Result<()> {
    let validator = ManifestValidator::new(flags);
    validator.validate(manifest, registry)?;

    let asset = manifest.id().to_string();
    if let (Some(config), Manifest::Service(m)) = (&assigned.default_configuration, manifest) {
        validator.validate_payload(&asset, config, registry)?;
        if let Some(expected) = &m.config_message_full_name {
            if config.type_name() != Some(expected.as_str()) {
                return Err(input_error(
                    manifest,
                    format!(
                        "default configuration is a {}, expected {}",
                        config.type_name().unwrap_or("<untyped>"),
                        expected
                    ),
                ));
            }
        }
    }

    for (local_name, _, path) in &assigned.nested {
        let nested = reader::read_path(path, ReadOptions::default())?;
        validator.validate_nested(&asset, local_name, &nested.manifest)?;
    }
    Ok(())
}

/// Bundle the file references left in a data payload.
///
/// Bundled references are rewritten to their bundle-relative path and
/// pinned to the digest of the bytes read. Excluded references are left
/// untouched.
fn bundle_file_references(
    data: &mut Payload,
    source: &DirectorySource,
    excluded: &[String],
    expected: Option<&[String]>,
) -> Result<BTreeMap<String, Vec<u8>>> {
    let normalize = |paths: &[String]| -> Result<BTreeSet<String>> {
        paths.iter().map(|p| source.relative_path(p)).collect()
    };
    let excluded = normalize(excluded)?;
    let expected = expected.map(normalize).transpose()?;

    // Relative path -> every digest recorded for it
    let mut paths: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    data.visit_referenced_data(&mut |r| {
        if let ReferencedData::File { path, digest } = r {
            let digests = paths.entry(source.relative_path(path)?).or_default();
            digests.extend(digest.iter().cloned());
        }
        Ok(())
    })?;

    let mut files = BTreeMap::new();
    let mut rewrites = BTreeMap::new();
    for (relative, recorded) in paths {
        if excluded.contains(&relative) {
            continue;
        }
        if let Some(expected) = &expected {
            if !expected.contains(&relative) {
                return Err(BundleError::MalformedReference(format!(
                    "file reference {} is neither expected nor excluded",
                    relative
                )));
            }
        }

        let mut reader = source.open(&relative)?;
        let (bytes, digest) = read_all_with_digest(&mut reader)?;
        for expected_digest in &recorded {
            verify_digest(&relative, expected_digest, &digest)?;
        }
        tracing::debug!(path = %relative, digest = %digest, size = bytes.len(), "Bundling referenced file");

        rewrites.insert(relative.clone(), ReferencedData::file(relative.clone(), Some(digest)));
        files.insert(relative, bytes);
    }

    data.visit_referenced_data_mut(&mut |r| {
        if let ReferencedData::File { path, .. } = r {
            if let Some(rewritten) = rewrites.get(&source.relative_path(path)?) {
                *r = rewritten.clone();
            }
        }
        Ok(())
    })?;

    Ok(files)
}
