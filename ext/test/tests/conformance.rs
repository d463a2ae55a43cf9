//! Conformance tests that run YAML fixtures against the reference store
//!
//! Run with: cargo test -p tailor-test --test conformance

use std::fs;
use std::path::{Path, PathBuf};

use tailor_test::fixture::Fixture;

/// The fixtures directory next to this crate's manifest
fn fixtures_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Load and run every fixture in one file
async fn run_fixture_file(file: &str) {
    let path = fixtures_dir().join(file);
    let yaml = fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read {}: {e}", path.display()));

    // Parse potentially multiple fixtures (separated by ---)
    let fixtures = Fixture::from_yaml_multi(&yaml).unwrap_or_else(|e| {
        panic!("Failed to parse {}: {}", path.display(), e);
    });
    assert!(!fixtures.is_empty(), "{} holds no fixtures", path.display());

    for fixture in fixtures {
        println!("  Running: {}", fixture.name);
        fixture.run_and_assert().await;
    }
}

#[tokio::test]
async fn test_resolution() {
    run_fixture_file("01_resolution.yaml").await;
}

#[tokio::test]
async fn test_normalization() {
    run_fixture_file("02_normalization.yaml").await;
}

#[tokio::test]
async fn test_dimensions() {
    run_fixture_file("03_dimensions.yaml").await;
}

#[tokio::test]
async fn test_errors() {
    run_fixture_file("04_errors.yaml").await;
}

#[test]
fn every_fixture_file_is_listed() {
    let mut files: Vec<String> = fs::read_dir(fixtures_dir())
        .expect("read fixtures dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".yaml") || name.ends_with(".yml"))
        .collect();
    files.sort();
    assert_eq!(
        files,
        [
            "01_resolution.yaml",
            "02_normalization.yaml",
            "03_dimensions.yaml",
            "04_errors.yaml"
        ]
    );
}
