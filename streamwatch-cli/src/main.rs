//! streamwatch: mirrors a Twitch category's live streams into a Discord channel.
//!
//! # Usage
//!
//! ```text
//! streamwatch init
//! streamwatch check
//! streamwatch daemon start|stop|status [--json]
//! streamwatch reconcile [--user <id>] [--json]
//! streamwatch resolve <name>
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, daemon::DaemonCommand, init::InitArgs, reconcile::ReconcileArgs,
    resolve::ResolveArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "streamwatch",
    version,
    about = "Announce live Twitch streams in a Discord channel and keep the announcements current",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a template config to ~/.streamwatch/config.yaml.
    Init(InitArgs),

    /// Validate the config without starting anything.
    Check(CheckArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Ask the running daemon for a reconciliation pass now.
    Reconcile(ReconcileArgs),

    /// Resolve a broadcaster login to its Twitch user id.
    Resolve(ResolveArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
        Commands::Reconcile(args) => args.run(),
        Commands::Resolve(args) => args.run(),
    }
}
