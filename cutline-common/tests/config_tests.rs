//! Tests for config file resolution and graceful fallback
//!
//! Tests that touch CUTLINE_CONFIG are marked #[serial] so they never race on
//! the process environment.

use cutline_common::config::{
    load_or_default, load_toml_file, parse_toml, resolve_config_path, LoggingConfig,
    CONFIG_ENV_VAR,
};
use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

#[derive(Debug, Default, Deserialize, PartialEq)]
struct Sample {
    #[serde(default)]
    block: u32,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_logging_defaults_to_info() {
    let sample: Sample = parse_toml("block = 4").unwrap();
    assert_eq!(sample.block, 4);
    assert_eq!(sample.logging.level, "info");
}

#[test]
fn test_parse_error_is_config_error() {
    let err = parse_toml::<Sample>("block = \"not a number\"").unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"));
}

#[test]
#[serial]
fn test_explicit_path_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/nonexistent/from_env.toml");
    let explicit = std::path::Path::new("/tmp/explicit.toml");
    assert_eq!(resolve_config_path(Some(explicit)).unwrap(), explicit);
    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_var_path_is_loaded() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "block = 9\n[logging]\nlevel = \"debug\"").unwrap();

    env::set_var(CONFIG_ENV_VAR, file.path());
    let sample: Sample = load_or_default(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(sample.block, 9);
    assert_eq!(sample.logging.level, "debug");
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    env::set_var(CONFIG_ENV_VAR, "/nonexistent/cutline/audio.toml");
    let sample: Sample = load_or_default(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(sample, Sample::default());
}

#[test]
fn test_load_toml_file_reports_missing_file() {
    let result = load_toml_file::<Sample>(std::path::Path::new("/nonexistent/x.toml"));
    assert!(result.is_err());
}
