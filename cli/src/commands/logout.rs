//! `assetbundle logout` command: remove stored registry credentials.

use assetbundle_core::ToolConfig;
use assetbundle_runtime::image::CredentialStore;
use clap::Args;

use super::login::resolve_server;

#[derive(Args)]
pub struct LogoutArgs {
    /// Registry server (default: the configured registry)
    pub server: Option<String>,
}

pub async fn execute(args: LogoutArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = resolve_server(args.server, &config)?;

    let store = CredentialStore::default_path()?;
    if store.remove(&server)? {
        println!("Removing login credentials for {}", server);
    } else {
        println!("Not logged in to {}", server);
    }
    Ok(())
}
