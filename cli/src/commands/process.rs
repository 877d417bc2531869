//! `assetbundle process` command: turn a bundle into a self-contained manifest.

use std::path::PathBuf;

use assetbundle_core::{AssetType, BundleError, ProcessedManifest, ToolConfig};
use assetbundle_runtime::{
    process_path, DigestImageProcessor, ImageProcessor, OciRegistryTransport, ProcessOptions,
    RegistryAuth, RegistryImageProcessor,
};
use clap::Args;
use tokio::runtime::Handle;

use super::{ResolverKind, PREVIEW_REGISTRY};

#[derive(Args)]
pub struct ProcessArgs {
    /// Bundle file
    pub bundle: PathBuf,

    /// How referenced data is rewritten
    #[arg(long, value_enum, default_value = "noop")]
    pub resolver: ResolverKind,

    /// Push images to the configured registry instead of describing them by digest
    #[arg(long)]
    pub push: bool,

    /// Directory for file references that were left out of the bundle
    #[arg(long)]
    pub base_dir: Option<PathBuf>,

    /// Fail unless the bundle holds this asset type
    #[arg(long = "type")]
    pub asset_type: Option<AssetType>,

    /// Write the processed manifest here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: ProcessArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = Handle::current();
    let output_path = args.output.clone();
    let processed = super::run_blocking(move || process_bundle(args, &config, handle)).await?;

    let json = serde_json::to_string_pretty(&processed)?;
    match output_path {
        Some(path) => {
            std::fs::write(&path, json + "\n")?;
            eprintln!(
                "Processed {} into {}",
                processed.metadata.id,
                path.display()
            );
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn image_processor(
    push: bool,
    config: &ToolConfig,
    handle: Handle,
) -> Result<Box<dyn ImageProcessor>, BundleError> {
    let prefix = config.registry.repository_prefix();
    if !push {
        let registry = config.registry.host().unwrap_or(PREVIEW_REGISTRY);
        return Ok(Box::new(DigestImageProcessor::new(registry, prefix)));
    }

    let host = config.registry.host().ok_or_else(|| {
        BundleError::ConfigError("--push needs registry.address in the configuration".to_string())
    })?;
    let auth = RegistryAuth::from_credential_store(host);
    let credentials = auth.credentials().cloned();
    let transport = OciRegistryTransport::new(handle, auth, config.registry.insecure);
    Ok(Box::new(
        RegistryImageProcessor::new(transport, host, prefix).with_credentials(credentials),
    ))
}

fn process_bundle(
    args: ProcessArgs,
    config: &ToolConfig,
    handle: Handle,
) -> Result<ProcessedManifest, BundleError> {
    let mut resolver = super::build_resolver(args.resolver, config)?;
    let mut images = image_processor(args.push, config, handle)?;

    let mut options = ProcessOptions::new(resolver.as_mut(), images.as_mut());
    options.base_dir = args.base_dir;
    options.flags = config.validation;
    options.spool_threshold_bytes = config.spool_threshold_bytes;
    options.expected_type = args.asset_type;

    process_path(&args.bundle, &mut options)
}
