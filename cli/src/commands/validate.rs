//! `assetbundle validate` command.

use std::path::PathBuf;

use assetbundle_core::{BundleError, Manifest, ToolConfig};
use assetbundle_runtime::{ManifestValidator, TypeRegistry};
use clap::Args;

use super::write::load_manifest;

#[derive(Args)]
pub struct ValidateArgs {
    /// Manifest JSON file
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Binary FileDescriptorSet for the manifest's message types
    #[arg(long)]
    pub file_descriptor_set: Option<PathBuf>,
}

pub async fn execute(args: ValidateArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let manifest = super::run_blocking(move || validate(&args, &config)).await?;
    println!("{} {} is valid", manifest.asset_type(), manifest.id());
    Ok(())
}

fn validate(args: &ValidateArgs, config: &ToolConfig) -> Result<Manifest, BundleError> {
    let manifest = load_manifest(&args.manifest)?;
    let registry = match &args.file_descriptor_set {
        Some(path) => {
            let data = std::fs::read(path).map_err(|e| {
                BundleError::IoError(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read descriptor set {}: {}", path.display(), e),
                ))
            })?;
            Some(TypeRegistry::from_bytes(&data)?)
        }
        None => None,
    };
    ManifestValidator::new(config.validation).validate(&manifest, registry.as_ref())?;
    Ok(manifest)
}
