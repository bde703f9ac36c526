//! `streamwatch check`: load and validate the config.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use streamwatch_core::{config, Config};

#[derive(Args, Debug)]
pub struct CheckArgs {}

#[derive(Tabled)]
struct SettingRow {
    #[tabled(rename = "setting")]
    name: &'static str,
    #[tabled(rename = "value")]
    value: String,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let home = super::home_dir()?;
        let config = config::load_at(&home).context("failed to load config")?;
        config.validate().context("config is not usable")?;

        println!(
            "{} {} is valid",
            "✓".green(),
            config::config_path_at(&home).display()
        );
        let mut table = Table::new(settings(&config));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn settings(config: &Config) -> Vec<SettingRow> {
    let templates = config
        .template_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "built-in".to_string());
    vec![
        SettingRow {
            name: "game",
            value: config.game_id.clone(),
        },
        SettingRow {
            name: "announcements",
            value: format!("#{}", config.streamer_channel_id),
        },
        SettingRow {
            name: "admin channel",
            value: format!("#{}", config.admin_bot_channel_id),
        },
        SettingRow {
            name: "interval",
            value: format!("{} min", config.stream_update_interval_minutes),
        },
        SettingRow {
            name: "banned owners",
            value: config.twitch_user_bans.len().to_string(),
        },
        SettingRow {
            name: "admins",
            value: if config.admin_user_ids.is_empty() {
                "everyone".to_string()
            } else {
                config.admin_user_ids.len().to_string()
            },
        },
        SettingRow {
            name: "soft-ban grace",
            value: format!("{} passes", config.soft_ban_grace_passes),
        },
        SettingRow {
            name: "templates",
            value: templates,
        },
    ]
}
