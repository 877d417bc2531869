//! Asset bundle CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use assetbundle_cli::commands::{dispatch, Cli};
use assetbundle_core::ToolConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Config errors surface again from dispatch; here they only pick the default level
    let level = ToolConfig::load_or_default(cli.config.as_deref())
        .map(|c| c.log_level)
        .unwrap_or_default();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(tracing::Level::from(level).as_str().to_lowercase())
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
