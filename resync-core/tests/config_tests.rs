//! Config file discovery and error-message tests.

use std::fs;
use std::time::Duration;

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use resync_core::{config, ConfigError, PathCasing, ReconcileConfig};

#[test]
fn missing_config_file_yields_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded, ReconcileConfig::default());
    home.child(".config/resync/config.yaml")
        .assert(predicate::path::missing());
}

#[test]
fn config_file_overrides_fields() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".config/resync/config.yaml")
        .write_str("debounce_window_ms: 3500\npath_casing: insensitive\nclose_on_delete: false\n")
        .expect("write config");

    let loaded = config::load_at(home.path()).expect("load");
    assert_eq!(loaded.debounce_window(), Duration::from_millis(3500));
    assert_eq!(loaded.path_casing, PathCasing::Insensitive);
    assert!(!loaded.close_on_delete);
    assert_eq!(loaded.batch_window_ms, ReconcileConfig::default().batch_window_ms);
}

#[test]
fn corrupt_config_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".config").join("resync");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b"debounce_window_ms: [not, a, number]\n").expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn explicit_path_must_exist() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let err = ReconcileConfig::from_path(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
    assert!(err.to_string().contains("absent.yaml"));
}

#[test]
fn effective_config_prints_as_yaml() {
    let yaml = ReconcileConfig::default()
        .with_casing(PathCasing::Sensitive)
        .to_yaml()
        .expect("yaml");
    assert!(yaml.contains("debounce_window_ms: 2000"));
    assert!(yaml.contains("path_casing: sensitive"));
}
