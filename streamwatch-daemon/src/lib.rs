//! Daemon runtime: reconcile loop, restart correlation, control socket and
//! the Twitch and Discord HTTP adapters.

pub mod discord;
mod error;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod twitch;

pub use discord::{DiscordChannel, DiscordClient};
pub use error::DaemonError;
pub use protocol::{
    request_reconcile, request_resolve, request_status, request_stop, send_request,
    DaemonRequest, DaemonResponse,
};
pub use runtime::{
    run, run_with, spawn_reconciler, start_blocking, EngineStatus, ReconcilerHandle, Services,
    NOT_ADMIN_CHECK,
};
pub use twitch::TwitchProvider;
