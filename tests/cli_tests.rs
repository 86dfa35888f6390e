//! CLI integration tests
//!
//! These tests run the `pxw` binary end to end: tile an image into a
//! template, analyze it and place it on an in-memory canvas.

use image::{Rgba, RgbaImage};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn pxw(args: &[&str], dir: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_pxw"))
        .args(args)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .env_remove("PXW_AUTH_TOKEN")
        .output()
        .expect("Failed to execute pxw")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Write a 4x3 source image (one transparent pixel) and a config file.
fn setup() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("should create temp dir");
    let source = RgbaImage::from_fn(4, 3, |x, y| match (x, y) {
        (0, 0) => Rgba([0, 0, 0, 0]),
        (x, _) if x < 2 => Rgba([0, 0, 0, 255]),
        _ => Rgba([237, 28, 36, 255]),
    });
    let image_path = dir.path().join("logo.png");
    source.save(&image_path).expect("should save source image");
    fs::write(
        dir.path().join("pxw.toml"),
        "[canvas]\ntile_size = 100\n\n[scheduler]\npoll_interval_secs = 1\n",
    )
    .unwrap();
    (dir, image_path)
}

#[test]
fn test_tile_writes_template_next_to_image() {
    let (dir, _) = setup();

    let output = pxw(&["tile", "logo.png", "--origin", "1,2,98,0", "--name", "logo"], dir.path());
    assert!(output.status.success(), "tile failed: {}", String::from_utf8_lossy(&output.stderr));

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("logo.template.json")).unwrap()).unwrap();
    assert_eq!(doc["displayName"], "logo");
    assert_eq!(doc["topLeft"], "0001,0002,098,000");
    assert_eq!(doc["tileSize"], 100);
    assert_eq!(doc["pixelCount"], 11);
    assert_eq!(doc["tiles"].as_object().map(|t| t.len()), Some(2));
}

#[test]
fn test_tile_exports_marker_pngs() {
    let (dir, _) = setup();

    let output = pxw(
        &["tile", "logo.png", "--origin", "0,0,0,0", "-o", "t.json", "--export-dir", "tiles", "--export-scale", "2"],
        dir.path(),
    );
    assert!(output.status.success(), "tile failed: {}", String::from_utf8_lossy(&output.stderr));

    let exported = dir.path().join("tiles").join("0000_0000_000_000.png");
    let img = image::open(&exported).expect("exported tile should exist");
    assert_eq!((img.width(), img.height()), (24, 18));
}

#[test]
fn test_tile_rejects_origin_outside_tile() {
    let (dir, _) = setup();

    let output = pxw(&["tile", "logo.png", "--origin", "0,0,100,0"], dir.path());
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("logo.template.json").exists());
}

#[test]
fn test_analyze_reports_counts() {
    let (dir, _) = setup();
    assert!(pxw(&["tile", "logo.png", "--origin", "0,0,0,0"], dir.path()).status.success());

    let output = pxw(&["analyze", "logo.template.json", "--owned", "1", "--json"], dir.path());
    assert!(output.status.success(), "analyze failed: {}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["pixels"], 11);
    assert_eq!(report["eligible"], 5);
    assert_eq!(report["chunks"].as_array().map(|c| c.len()), Some(1));
}

#[test]
fn test_palette_lists_all_colors() {
    let dir = TempDir::new().unwrap();
    let output = pxw(&["palette", "--json"], dir.path());
    assert!(output.status.success());

    let entries: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 64);
    assert_eq!(entries[0]["rgb"], serde_json::Value::Null);
    assert_eq!(entries[32]["premium"], true);
}

#[test]
fn test_dry_run_completes_template() {
    let (dir, _) = setup();
    assert!(pxw(&["tile", "logo.png", "--origin", "0,0,10,10"], dir.path()).status.success());

    let output = pxw(&["run", "logo.template.json", "--dry-run", "--charges", "20", "--json"], dir.path());
    assert!(output.status.success(), "run failed: {}", String::from_utf8_lossy(&output.stderr));

    let events: Vec<serde_json::Value> =
        stdout(&output).lines().filter_map(|l| serde_json::from_str(l).ok()).collect();
    let submitted: u64 = events
        .iter()
        .filter(|e| e["event"] == "submitted")
        .filter_map(|e| e["pixels"].as_u64())
        .sum();
    assert_eq!(submitted, 11);
    assert!(events.iter().any(|e| e["event"] == "completed"));
}

#[test]
fn test_run_rejects_invalid_config() {
    let (dir, _) = setup();
    assert!(pxw(&["tile", "logo.png", "--origin", "0,0,0,0"], dir.path()).status.success());
    fs::write(dir.path().join("bad.toml"), "[canvas]\ntile_size = 0\n").unwrap();

    let output = pxw(&["run", "logo.template.json", "--config", "bad.toml", "--dry-run"], dir.path());
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("tile_size"));
}

#[test]
fn test_dry_run_options_require_dry_run() {
    let dir = TempDir::new().unwrap();
    let output = pxw(&["run", "t.json", "--charges", "3"], dir.path());
    assert_eq!(output.status.code(), Some(2));
}
