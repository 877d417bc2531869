//! `assetbundle write` command: assemble a bundle from a manifest and its files.

use std::path::{Path, PathBuf};

use assetbundle_core::{BundleError, Manifest, ToolConfig};
use assetbundle_runtime::{write, AuxiliaryInputs, WriteOptions, WriteSummary};
use clap::Args;
use serde::Serialize;

use super::ResolverKind;
use crate::output;

#[derive(Args)]
pub struct WriteArgs {
    /// Manifest JSON file
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Output bundle path
    #[arg(short, long)]
    pub output: PathBuf,

    /// Binary FileDescriptorSet for the manifest's message types
    #[arg(long)]
    pub file_descriptor_set: Option<PathBuf>,

    /// Image archive (repeatable; skills take one)
    #[arg(long = "image")]
    pub images: Vec<PathBuf>,

    /// Service default configuration (payload JSON)
    #[arg(long)]
    pub default_config: Option<PathBuf>,

    /// Scene file of a scene object
    #[arg(long)]
    pub scene: Option<PathBuf>,

    /// Nested bundle of a hardware device, as LOCAL_NAME=PATH (repeatable)
    #[arg(long = "nested", value_parser = parse_nested)]
    pub nested: Vec<(String, PathBuf)>,

    /// Directory file references resolve against (default: the manifest's directory)
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// File reference to leave out of the bundle (repeatable)
    #[arg(long = "exclude")]
    pub excluded: Vec<String>,

    /// File reference that may be bundled; any other fails (repeatable)
    #[arg(long = "expect")]
    pub expected: Vec<String>,

    /// How referenced data is rewritten before writing
    #[arg(long, value_enum, default_value = "noop")]
    pub resolver: ResolverKind,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Only print the bundle path
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_nested(s: &str) -> Result<(String, PathBuf), String> {
    let (name, path) = s
        .split_once('=')
        .ok_or_else(|| format!("expected LOCAL_NAME=PATH, got '{}'", s))?;
    if name.is_empty() || path.is_empty() {
        return Err(format!("expected LOCAL_NAME=PATH, got '{}'", s));
    }
    Ok((name.to_string(), PathBuf::from(path)))
}

#[derive(Serialize)]
struct SummaryJson<'a> {
    asset: &'a str,
    asset_type: String,
    path: String,
    entries: Vec<EntryJson<'a>>,
    references: usize,
}

#[derive(Serialize)]
struct EntryJson<'a> {
    name: &'a str,
    size: u64,
}

pub async fn execute(args: WriteArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let output_path = args.output.clone();
    let (json, quiet) = (args.json, args.quiet);
    let summary = super::run_blocking(move || write_bundle(args, &config)).await?;

    if quiet {
        println!("{}", output_path.display());
        return Ok(());
    }

    if json {
        let report = SummaryJson {
            asset: &summary.asset,
            asset_type: summary.asset_type.to_string(),
            path: output_path.display().to_string(),
            entries: summary
                .entries
                .iter()
                .map(|(name, size)| EntryJson { name, size: *size })
                .collect(),
            references: summary.references.distinct,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let mut table = output::new_table(&["ENTRY", "SIZE"]);
    for (name, size) in &summary.entries {
        table.add_row([name.clone(), output::format_bytes(*size)]);
    }
    println!("{table}");
    println!(
        "Wrote {} ({}) to {}",
        summary.asset,
        summary.asset_type,
        output_path.display()
    );
    Ok(())
}

pub(crate) fn load_manifest(path: &Path) -> Result<Manifest, BundleError> {
    let data = std::fs::read(path).map_err(|e| {
        BundleError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to read manifest {}: {}", path.display(), e),
        ))
    })?;
    Ok(serde_json::from_slice(&data)?)
}

fn write_bundle(args: WriteArgs, config: &ToolConfig) -> Result<WriteSummary, BundleError> {
    let manifest = load_manifest(&args.manifest)?;
    let base_dir = args
        .base_dir
        .clone()
        .or_else(|| args.manifest.parent().map(Path::to_path_buf))
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from("."));

    let aux = AuxiliaryInputs {
        file_descriptor_set: args.file_descriptor_set,
        images: args.images,
        default_configuration: args.default_config,
        scene: args.scene,
        nested_bundles: args.nested.into_iter().collect(),
    };

    let mut resolver = super::build_resolver(args.resolver, config)?;
    let mut options = WriteOptions::new(resolver.as_mut(), base_dir);
    options.excluded = args.excluded;
    options.expected = (!args.expected.is_empty()).then_some(args.expected);
    options.flags = config.validation;

    write(&manifest, &aux, &mut options, &args.output)
}
