//! `assetbundle read` command: show a bundle's manifest and entries.

use std::collections::BTreeSet;
use std::path::PathBuf;

use assetbundle_runtime::{read_path, ReadOptions};
use clap::Args;

use crate::output;

#[derive(Args)]
pub struct ReadArgs {
    /// Bundle file
    pub bundle: PathBuf,

    /// Print the manifest as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ReadArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle = args.bundle.clone();
    let contents = super::run_blocking(move || {
        read_path(
            &bundle,
            ReadOptions {
                collect_auxiliary: true,
                expected_type: None,
            },
        )
    })
    .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&contents.manifest)?);
        return Ok(());
    }

    let metadata = contents.manifest.metadata();
    println!(
        "{} {}{}",
        contents.manifest.asset_type(),
        metadata.id,
        metadata
            .version
            .as_deref()
            .map(|v| format!(" {}", v))
            .unwrap_or_default()
    );

    let undeclared: BTreeSet<String> = contents.undeclared_entries()?.into_iter().collect();
    let manifest_entry = contents.manifest.manifest_entry_name();
    let mut table = output::new_table(&["ENTRY", "SIZE", "STATUS"]);
    for entry in &contents.entries {
        let size = contents
            .auxiliary
            .get(entry)
            .map(|d| output::format_bytes(d.len() as u64))
            .unwrap_or_else(|| "-".to_string());
        let status = if entry == manifest_entry {
            "manifest"
        } else if undeclared.contains(entry) {
            "undeclared"
        } else {
            "declared"
        };
        table.add_row([entry.clone(), size, status.to_string()]);
    }
    for dir in &contents.directories {
        table.add_row([format!("{}/", dir), "-".to_string(), "directory".to_string()]);
    }
    println!("{table}");

    for missing in contents.missing_entries()? {
        eprintln!("warning: declared entry '{}' is missing", missing);
    }
    if !undeclared.is_empty() {
        eprintln!(
            "warning: {} undeclared entr{}; processing this bundle will fail",
            undeclared.len(),
            if undeclared.len() == 1 { "y" } else { "ies" }
        );
    }
    Ok(())
}
