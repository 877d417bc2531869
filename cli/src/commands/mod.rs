//! CLI command definitions and dispatch.

mod catalog;
mod login;
mod logout;
mod process;
mod read;
mod validate;
mod version;
mod write;

use std::path::PathBuf;

use assetbundle_core::{BundleError, ToolConfig};
use assetbundle_runtime::{
    CatalogResolver, LocalCatalog, NoOpResolver, PortableResolver, ReferencedDataResolver,
};
use clap::{Parser, Subcommand, ValueEnum};

/// Registry recorded in image descriptors when images are only described.
const PREVIEW_REGISTRY: &str = "localhost";

/// Asset Bundle: write, inspect and process asset bundles.
#[derive(Parser)]
#[command(name = "assetbundle", version, about)]
pub struct Cli {
    /// Configuration file (default: ~/.assetbundle/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Write a manifest and its files into a bundle
    Write(write::WriteArgs),
    /// Show a bundle's manifest and entries
    Read(read::ReadArgs),
    /// Process a bundle into a self-contained manifest
    Process(process::ProcessArgs),
    /// Validate a manifest without writing a bundle
    Validate(validate::ValidateArgs),
    /// List blobs in the local catalog
    Catalog(catalog::CatalogArgs),
    /// Store registry credentials
    Login(login::LoginArgs),
    /// Remove stored registry credentials
    Logout(logout::LogoutArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// How referenced data is rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum ResolverKind {
    /// Leave references unchanged
    #[default]
    Noop,
    /// Inline file contents
    Portable,
    /// Upload contents to the local catalog
    Catalog,
}

/// Build the resolver selected on the command line.
pub(crate) fn build_resolver(
    kind: ResolverKind,
    config: &ToolConfig,
) -> Result<Box<dyn ReferencedDataResolver>, BundleError> {
    Ok(match kind {
        ResolverKind::Noop => Box::new(NoOpResolver),
        ResolverKind::Portable => Box::new(PortableResolver),
        ResolverKind::Catalog => {
            let dir = config.catalog.resolved_dir();
            tracing::debug!(dir = %dir.display(), "Using local catalog");
            Box::new(CatalogResolver::new(LocalCatalog::new(&dir)?))
        }
    })
}

/// Run bundle work on the blocking pool.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, Box<dyn std::error::Error>>
where
    F: FnOnce() -> Result<T, BundleError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await?;
    Ok(result?)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ToolConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Write(args) => write::execute(args, config).await,
        Command::Read(args) => read::execute(args).await,
        Command::Process(args) => process::execute(args, config).await,
        Command::Validate(args) => validate::execute(args, config).await,
        Command::Catalog(args) => catalog::execute(args, config).await,
        Command::Login(args) => login::execute(args, config).await,
        Command::Logout(args) => logout::execute(args, config).await,
        Command::Version(args) => version::execute(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_write_args() {
        let cli = Cli::try_parse_from([
            "assetbundle",
            "write",
            "--manifest",
            "skill.json",
            "--output",
            "out.bundle.tar",
            "--image",
            "a.tar",
            "--image",
            "b.tar",
            "--resolver",
            "portable",
        ])
        .unwrap();
        let Command::Write(args) = cli.command else {
            panic!("expected write");
        };
        assert_eq!(args.images.len(), 2);
        assert_eq!(args.resolver, ResolverKind::Portable);
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["assetbundle", "read", "x.tar", "--config", "c.yaml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
    }

    #[test]
    fn test_build_resolver_catalog_creates_store() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = ToolConfig::default();
        config.catalog.dir = Some(tmp.path().join("catalog"));
        build_resolver(ResolverKind::Catalog, &config).unwrap();
        assert!(tmp.path().join("catalog/sha256").is_dir());
    }
}
