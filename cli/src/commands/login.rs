//! `assetbundle login` command: store registry credentials.

use assetbundle_core::{RegistryCredentials, ToolConfig};
use assetbundle_runtime::image::CredentialStore;
use clap::Args;

#[derive(Args)]
pub struct LoginArgs {
    /// Registry server (default: the configured registry)
    pub server: Option<String>,

    /// Username
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Read password from stdin
    #[arg(long)]
    pub password_stdin: bool,
}

/// Explicit server, else the configured registry host.
pub(crate) fn resolve_server(
    server: Option<String>,
    config: &ToolConfig,
) -> Result<String, Box<dyn std::error::Error>> {
    server
        .or_else(|| config.registry.host().map(str::to_string))
        .ok_or_else(|| "No registry given and none configured".into())
}

fn prompt(label: &str) -> std::io::Result<String> {
    eprint!("{label}: ");
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

pub async fn execute(args: LoginArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let server = resolve_server(args.server, &config)?;

    let username = match args.username {
        Some(u) => u,
        None => prompt("Username")?,
    };
    let password = if args.password_stdin {
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        input.trim().to_string()
    } else {
        match args.password {
            Some(p) => p,
            None => prompt("Password")?,
        }
    };

    if username.is_empty() || password.is_empty() {
        return Err("Username and password are required".into());
    }

    let store = CredentialStore::default_path()?;
    store.store(&server, &RegistryCredentials { username, password })?;

    println!("Login Succeeded");
    Ok(())
}
