//! `streamwatch daemon`: run the bot in the foreground or talk to it over its socket.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use streamwatch_daemon::paths::socket_path;
use streamwatch_daemon::{request_status, request_stop, start_blocking, DaemonError, EngineStatus};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground until stopped.
    Start,
    /// Ask the daemon to shut down.
    Stop(StopArgs),
    /// Show what the daemon is doing.
    Status(StatusArgs),
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Chat user id to act as, checked against `admin_user_ids`.
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "stream")]
    stream: String,
    #[tabled(rename = "message")]
    message: String,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home_dir()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop(args) => match request_stop(&home, args.user) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status(args) => match request_status(&home) {
            Ok(status) if args.json => print_json(&status)?,
            Ok(status) => print_status(&status)?,
            Err(DaemonError::DaemonNotRunning { .. }) if args.json => {
                print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }))?;
            }
            Err(DaemonError::DaemonNotRunning { socket }) => {
                println!("daemon is not running (no socket at {})", socket.display());
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        },
    }

    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to render daemon status JSON")?
    );
    Ok(())
}

fn print_status(status: &Value) -> Result<()> {
    let engine: EngineStatus = serde_json::from_value(status["engine"].clone())
        .context("daemon returned a malformed status")?;

    println!(
        "{} running since {}",
        "●".green().bold(),
        status["started_at"].as_str().unwrap_or("?")
    );
    println!(
        "live: {} | rendered: {} | soft-banned: {} | passes: {}",
        engine.state.live,
        engine.state.rendered.len(),
        engine.state.soft_banned.len(),
        engine.passes,
    );

    match (&engine.last_pass, engine.last_pass_at) {
        (Some(report), Some(at)) => println!(
            "last pass {}: +{} ~{} -{} ({} failures, {} ms)",
            age(at),
            report.created,
            report.updated,
            report.deleted,
            report.failures,
            report.duration_ms,
        ),
        _ => println!("no pass has completed yet"),
    }
    if let Some(err) = &engine.last_error {
        println!("{} {}", "last error:".red().bold(), err);
    }
    if let Some(restart) = &engine.restart {
        println!("restart: {restart}");
    }

    if !engine.state.rendered.is_empty() {
        let rows: Vec<RecordRow> = engine
            .state
            .rendered
            .iter()
            .map(|record| RecordRow {
                stream: record.stream_id.to_string(),
                message: record.message_id.to_string(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }
    Ok(())
}

fn age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        _ => format!("{}h ago", secs / 3600),
    }
}
