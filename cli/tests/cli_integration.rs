//! Integration tests: drive the `assetbundle` binary end to end.
//!
//! Each test writes its inputs and a config file into a temp directory, so
//! nothing touches `~/.assetbundle`.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use assetbundle_core::manifest::{DataAssets, DataManifest, Metadata};
use assetbundle_core::referenced::ReferencedData;
use assetbundle_core::{Id, Manifest, Payload};
use serde_json::{json, Value};
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let catalog = dir.path().join("catalog");
        std::fs::write(
            dir.path().join("config.yaml"),
            format!("catalog:\n  dir: {}\nlog_level: warn\n", catalog.display()),
        )
        .unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn write(&self, name: &str, data: &[u8]) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, data).unwrap();
        path
    }

    /// Data manifest with one file reference, written as `manifest.json`.
    fn photos_manifest(&self) -> PathBuf {
        self.write("photos/a.png", b"\x89PNG-a");
        let mut metadata = Metadata::new(Id::new("ai.example", "photos").unwrap());
        metadata.display_name = "Photos".to_string();
        let manifest = Manifest::Data(DataManifest {
            metadata,
            data: Payload::new(
                "google.protobuf.Struct",
                json!({ "cover": ReferencedData::file("photos/a.png", None).to_value() }),
            )
            .unwrap(),
            assets: DataAssets::default(),
        });
        self.write("manifest.json", &serde_json::to_vec_pretty(&manifest).unwrap())
    }

    fn run(&self, args: &[&str]) -> Output {
        let config = self.path("config.yaml");
        Command::new(env!("CARGO_BIN_EXE_assetbundle"))
            .arg("--config")
            .arg(&config)
            .args(args)
            .env_remove("RUST_LOG")
            .output()
            .unwrap_or_else(|e| panic!("Failed to run `assetbundle {}`: {}", args.join(" "), e))
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn as_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn test_version() {
    let ws = Workspace::new();
    let output = ws.run(&["version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("assetbundle version "));
}

#[test]
fn test_write_read_process_data_bundle() {
    let ws = Workspace::new();
    let manifest = ws.photos_manifest();
    let bundle = ws.path("photos.bundle.tar");

    let output = ws.run(&[
        "write",
        "--manifest",
        as_str(&manifest),
        "--output",
        as_str(&bundle),
        "--quiet",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(bundle.exists());

    let output = ws.run(&["read", as_str(&bundle), "--json"]);
    assert!(output.status.success());
    let read: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(read["data"]["metadata"]["id"]["name"], "photos");

    let output = ws.run(&["process", as_str(&bundle), "--resolver", "portable"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let processed: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(processed["asset"]["data"].to_string().contains("inlined"));
}

#[test]
fn test_process_rejects_wrong_type() {
    let ws = Workspace::new();
    let manifest = ws.photos_manifest();
    let bundle = ws.path("photos.bundle.tar");
    assert!(ws
        .run(&["write", "-m", as_str(&manifest), "-o", as_str(&bundle), "-q"])
        .status
        .success());

    let output = ws.run(&["process", as_str(&bundle), "--type", "skill"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error:"));
}

#[test]
fn test_write_rejects_unexpected_reference() {
    let ws = Workspace::new();
    let manifest = ws.photos_manifest();
    let bundle = ws.path("photos.bundle.tar");

    let output = ws.run(&[
        "write",
        "-m",
        as_str(&manifest),
        "-o",
        as_str(&bundle),
        "--expect",
        "photos/b.png",
    ]);
    assert!(!output.status.success());
    assert!(!bundle.exists());
}

#[test]
fn test_catalog_resolver_then_list() {
    let ws = Workspace::new();
    let manifest = ws.photos_manifest();
    let bundle = ws.path("photos.bundle.tar");
    assert!(ws
        .run(&["write", "-m", as_str(&manifest), "-o", as_str(&bundle), "-q"])
        .status
        .success());

    let output = ws.run(&["process", as_str(&bundle), "--resolver", "catalog"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("catalog://"));

    let output = ws.run(&["catalog", "--quiet"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).lines().count(), 1);
}

#[test]
fn test_validate_manifest() {
    let ws = Workspace::new();
    let manifest = ws.photos_manifest();
    let output = ws.run(&["validate", "--manifest", as_str(&manifest)]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("is valid"));
}
