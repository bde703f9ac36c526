//! YAML configuration for the bot.
//!
//! # Storage layout
//!
//! ```text
//! ~/.streamwatch/
//!   config.yaml    (mode 0600, written by `streamwatch init`)
//!   run/           (daemon socket lives here)
//! ```
//!
//! # API pattern
//!
//! Every filesystem function has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::{ChannelId, LiveFilter, OwnerId};

pub const DEFAULT_INTERVAL_MINUTES: u64 = 5;
pub const DEFAULT_HISTORY_LIMIT: usize = 200;
pub const DEFAULT_SOFT_BAN_GRACE_PASSES: u32 = 3;
pub const DEFAULT_FORCE_RESTART_COMMAND: &str = "forcerestart";

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub discord_token: String,
    pub twitch_client_id: String,
    pub twitch_client_secret: String,
    /// Twitch category whose live streams are mirrored.
    pub game_id: String,
    /// Channel receiving the live announcements.
    pub streamer_channel_id: ChannelId,
    /// Channel receiving error reports and restart notices.
    pub admin_bot_channel_id: ChannelId,
    pub livestream_mention_role_id: String,
    #[serde(default = "default_interval_minutes")]
    pub stream_update_interval_minutes: u64,
    /// Owners whose streams are never announced.
    #[serde(default)]
    pub twitch_user_bans: BTreeSet<OwnerId>,
    /// Chat users allowed to run mutating daemon commands. Empty allows everyone.
    #[serde(default)]
    pub admin_user_ids: BTreeSet<String>,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_soft_ban_grace_passes")]
    pub soft_ban_grace_passes: u32,
    #[serde(default = "default_force_restart_command")]
    pub force_restart_command_name: String,
    /// Directory of `.tera` files overriding the embedded message templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

fn default_interval_minutes() -> u64 {
    DEFAULT_INTERVAL_MINUTES
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_soft_ban_grace_passes() -> u32 {
    DEFAULT_SOFT_BAN_GRACE_PASSES
}

fn default_force_restart_command() -> String {
    DEFAULT_FORCE_RESTART_COMMAND.to_string()
}

impl Config {
    /// A config with placeholder credentials, written by `streamwatch init`.
    pub fn template() -> Self {
        Config {
            discord_token: "<discord bot token>".to_string(),
            twitch_client_id: "<twitch client id>".to_string(),
            twitch_client_secret: "<twitch client secret>".to_string(),
            game_id: "<twitch game id>".to_string(),
            streamer_channel_id: ChannelId::from("0"),
            admin_bot_channel_id: ChannelId::from("0"),
            livestream_mention_role_id: "0".to_string(),
            stream_update_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            twitch_user_bans: BTreeSet::new(),
            admin_user_ids: BTreeSet::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            soft_ban_grace_passes: DEFAULT_SOFT_BAN_GRACE_PASSES,
            force_restart_command_name: DEFAULT_FORCE_RESTART_COMMAND.to_string(),
            template_dir: None,
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.stream_update_interval_minutes * 60)
    }

    pub fn live_filter(&self) -> LiveFilter {
        LiveFilter {
            game_id: self.game_id.clone(),
        }
    }

    /// Reject configs the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, &str); 7] = [
            ("discord_token", &self.discord_token),
            ("twitch_client_id", &self.twitch_client_id),
            ("twitch_client_secret", &self.twitch_client_secret),
            ("game_id", &self.game_id),
            ("streamer_channel_id", &self.streamer_channel_id.0),
            ("admin_bot_channel_id", &self.admin_bot_channel_id.0),
            ("livestream_mention_role_id", &self.livestream_mention_role_id),
        ];
        for (field, value) in required {
            let value = value.trim();
            if value.is_empty() || (value.starts_with('<') && value.ends_with('>')) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be set".to_string(),
                });
            }
        }
        for (field, value) in [
            ("streamer_channel_id", &self.streamer_channel_id.0),
            ("admin_bot_channel_id", &self.admin_bot_channel_id.0),
        ] {
            if value.parse::<u64>().map(|id| id == 0).unwrap_or(true) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("'{value}' is not a channel snowflake"),
                });
            }
        }
        if self.stream_update_interval_minutes == 0 {
            return Err(ConfigError::Invalid {
                field: "stream_update_interval_minutes",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.history_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "history_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.streamwatch/`. Pure, no I/O.
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".streamwatch")
}

/// `<home>/.streamwatch/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    root_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// 2. Load
// ---------------------------------------------------------------------------

/// Load `<home>/.streamwatch/config.yaml`.
///
/// Returns `ConfigError::ConfigNotFound` if absent,
/// `ConfigError::Parse` (with path + line context) if malformed YAML.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

/// Load a config from an explicit file path.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::ConfigNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save `config` to `<home>/.streamwatch/config.yaml`.
///
/// Write flow: serialize → `config.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &Config) -> Result<PathBuf, ConfigError> {
    let dir = root_at(home);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(path)
}

// ---------------------------------------------------------------------------
// 4. Init
// ---------------------------------------------------------------------------

/// Write a template config unless one already exists.
///
/// Idempotent: an existing file is loaded and returned unchanged.
pub fn init_at(home: &Path) -> Result<(PathBuf, Config), ConfigError> {
    let path = config_path_at(home);
    if path.exists() {
        return Ok((path, load_at(home)?));
    }
    let config = Config::template();
    let path = save_at(home, &config)?;
    Ok((path, config))
}

/// `init_at` convenience wrapper.
pub fn init() -> Result<(PathBuf, Config), ConfigError> {
    init_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn valid() -> Config {
        Config {
            discord_token: "token".to_string(),
            twitch_client_id: "client".to_string(),
            twitch_client_secret: "secret".to_string(),
            game_id: "509658".to_string(),
            streamer_channel_id: ChannelId::from("1001"),
            admin_bot_channel_id: ChannelId::from("1002"),
            livestream_mention_role_id: "77".to_string(),
            ..Config::template()
        }
    }

    #[test]
    fn config_path_is_correct() {
        let home = make_home();
        let path = config_path_at(home.path());
        assert!(path.ends_with(".streamwatch/config.yaml"));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = make_home();
        let mut config = valid();
        config.twitch_user_bans.insert(OwnerId::from("42"));
        save_at(home.path(), &config).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn save_sets_owner_only_permissions() {
        let home = make_home();
        let path = save_at(home.path(), &valid()).expect("save");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }
        let tmp = path.with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn load_missing_returns_not_found() {
        let home = make_home();
        let err = load_at(home.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ConfigNotFound { .. }));
    }

    #[test]
    fn optional_fields_take_defaults() {
        let yaml = "discord_token: t\ntwitch_client_id: c\ntwitch_client_secret: s\n\
                    game_id: g\nstreamer_channel_id: '1'\nadmin_bot_channel_id: '2'\n\
                    livestream_mention_role_id: '3'\n";
        let config: Config = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(config.stream_update_interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert_eq!(config.history_limit, DEFAULT_HISTORY_LIMIT);
        assert_eq!(config.force_restart_command_name, "forcerestart");
        assert!(config.twitch_user_bans.is_empty());
        assert_eq!(config.update_interval(), Duration::from_secs(300));
    }

    #[test]
    fn template_fails_validation() {
        let err = Config::template().validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "discord_token", .. }));
    }

    #[test]
    fn valid_config_passes_validation() {
        valid().validate().expect("valid");
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
