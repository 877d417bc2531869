//! `assetbundle catalog` command: list blobs in the local catalog.

use assetbundle_core::ToolConfig;
use assetbundle_runtime::LocalCatalog;
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct CatalogArgs {
    /// Only show handles (one per line)
    #[arg(short, long)]
    pub quiet: bool,
}

pub async fn execute(args: CatalogArgs, config: ToolConfig) -> Result<(), Box<dyn std::error::Error>> {
    let dir = config.catalog.resolved_dir();
    if !dir.exists() {
        if !args.quiet {
            println!("{}", output::new_table(&["DIGEST", "SIZE", "HANDLE"]));
        }
        return Ok(());
    }

    let entries = LocalCatalog::new(&dir)?.list()?;
    if args.quiet {
        for entry in &entries {
            println!("{}", entry.handle);
        }
        return Ok(());
    }

    let mut table = output::new_table(&["DIGEST", "SIZE", "HANDLE"]);
    for entry in &entries {
        table.add_row(&[
            output::short_digest(&entry.digest),
            output::format_bytes(entry.size_bytes),
            entry.handle.clone(),
        ]);
    }
    println!("{table}");
    Ok(())
}
