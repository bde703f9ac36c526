//! Config error-message, atomic-write-safety, and init integration tests.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use rstest::rstest;
use std::fs;
use streamwatch_core::{config, ConfigError};

// ---------------------------------------------------------------------------
// 1. Load error messages
// ---------------------------------------------------------------------------

#[test]
fn load_missing_config_mentions_init() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ConfigNotFound { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
    assert!(err.to_string().contains("streamwatch init"));
}

#[test]
fn load_corrupt_yaml_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = home.path().join(".streamwatch");
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("config.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn load_missing_required_field_is_parse_error() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".streamwatch/config.yaml")
        .write_str("discord_token: abc\n")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Init
// ---------------------------------------------------------------------------

#[test]
fn init_writes_template_once() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let (path, first) = config::init_at(home.path()).expect("init");
    home.child(".streamwatch/config.yaml")
        .assert(predicate::path::exists());
    assert!(path.ends_with("config.yaml"));

    // Hand edits survive a second init.
    let mut edited = first.clone();
    edited.game_id = "509658".to_string();
    config::save_at(home.path(), &edited).expect("save");
    let (_, second) = config::init_at(home.path()).expect("re-init");
    assert_eq!(second.game_id, "509658");
}

#[rstest]
#[case("stream_update_interval_minutes: 0\n", "stream_update_interval_minutes")]
#[case("streamer_channel_id: 'general'\n", "streamer_channel_id")]
#[case("history_limit: 0\n", "history_limit")]
fn validate_rejects_bad_fields(#[case] override_line: &str, #[case] field: &str) {
    let base = "discord_token: t\ntwitch_client_id: c\ntwitch_client_secret: s\n\
                game_id: g\nadmin_bot_channel_id: '2'\nlivestream_mention_role_id: '3'\n";
    let yaml = if override_line.starts_with("streamer_channel_id") {
        format!("{base}{override_line}")
    } else {
        format!("{base}streamer_channel_id: '1'\n{override_line}")
    };
    let config: config::Config = load_yaml(&yaml);
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains(field), "got: {err}");
}

fn load_yaml(yaml: &str) -> config::Config {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".streamwatch/config.yaml")
        .write_str(yaml)
        .expect("write");
    config::load_at(home.path()).expect("load")
}
