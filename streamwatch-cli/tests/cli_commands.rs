use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

use streamwatch_core::{config, types::ChannelId, Config};

fn streamwatch_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("streamwatch"));
    cmd.env("HOME", home).env("USERPROFILE", home).env_remove("RUST_LOG");
    cmd
}

fn usable_config() -> Config {
    let mut config = Config::template();
    config.discord_token = "discord-token".to_string();
    config.twitch_client_id = "client-id".to_string();
    config.twitch_client_secret = "client-secret".to_string();
    config.game_id = "509658".to_string();
    config.streamer_channel_id = ChannelId::from("111111111111111111");
    config.admin_bot_channel_id = ChannelId::from("222222222222222222");
    config.livestream_mention_role_id = "333333333333333333".to_string();
    config
}

#[test]
fn init_writes_private_template_once() {
    let home = TempDir::new().expect("home");

    streamwatch_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Wrote template config"));

    let path = config::config_path_at(home.path());
    assert!(path.exists());
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    streamwatch_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("already exists"));
}

#[test]
fn check_rejects_the_untouched_template() {
    let home = TempDir::new().expect("home");
    streamwatch_cmd(home.path()).arg("init").assert().success();

    streamwatch_cmd(home.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("discord_token"));
}

#[test]
fn check_accepts_a_filled_in_config() {
    let home = TempDir::new().expect("home");
    config::save_at(home.path(), &usable_config()).expect("save");

    streamwatch_cmd(home.path())
        .arg("check")
        .assert()
        .success()
        .stdout(contains("is valid"))
        .stdout(contains("509658"))
        .stdout(contains("everyone"));
}

#[test]
fn check_without_config_points_at_init() {
    let home = TempDir::new().expect("home");

    streamwatch_cmd(home.path())
        .arg("check")
        .assert()
        .failure()
        .stderr(contains("streamwatch init"));
}

#[test]
fn daemon_status_reports_not_running() {
    let home = TempDir::new().expect("home");

    let output = streamwatch_cmd(home.path())
        .args(["daemon", "status", "--json"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["running"], false);

    streamwatch_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}

#[test]
fn socket_commands_fail_cleanly_without_a_daemon() {
    let home = TempDir::new().expect("home");

    streamwatch_cmd(home.path())
        .args(["reconcile", "--user", "42"])
        .assert()
        .failure()
        .stderr(contains("daemon is not running"));

    streamwatch_cmd(home.path())
        .args(["resolve", "somebody"])
        .assert()
        .failure()
        .stderr(contains("could not resolve 'somebody'"));

    streamwatch_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("daemon is not running"));
}
