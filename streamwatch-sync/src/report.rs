//! Turning failed user commands into chat responses.

use tracing::{error, warn};

use streamwatch_core::types::{Embed, OutgoingMessage};
use streamwatch_renderer::{CommandErrorContext, Renderer};

use crate::error::SyncError;
use crate::ports::MessageStore;

/// Who ran what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandContext {
    pub user: String,
    /// `None` when the command could not be identified.
    pub command: Option<String>,
}

impl CommandContext {
    pub fn new(user: impl Into<String>, command: Option<&str>) -> Self {
        CommandContext {
            user: user.into(),
            command: command.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// The user is not allowed to run the command. Each entry is one failed check.
    ChecksFailed(Vec<String>),
    Unexpected { kind: String, message: String },
}

impl From<&SyncError> for CommandFailure {
    fn from(err: &SyncError) -> Self {
        CommandFailure::Unexpected {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureResponse {
    /// Shown to the user who failed the checks.
    Denied(Embed),
    /// The failure was logged; `posted` is whether the admin channel got a report.
    Reported { posted: bool },
}

/// Handle one failed command.
///
/// Authorization failures are answered with an "Access Denied" embed and are
/// not logged as errors. Anything else is logged and, when `admin` is given,
/// reported to that channel. A failure to post the report is logged and
/// otherwise ignored.
pub async fn handle_command_failure<S>(
    ctx: &CommandContext,
    failure: CommandFailure,
    renderer: &Renderer,
    admin: Option<&S>,
) -> FailureResponse
where
    S: MessageStore + ?Sized,
{
    let (kind, message) = match failure {
        CommandFailure::ChecksFailed(checks) => {
            let embed = renderer.access_denied(&checks).unwrap_or_else(|err| {
                warn!(error = %err, "failed to render access denied response");
                Embed {
                    title: Some("Access Denied".to_string()),
                    description: Some(checks.join("\n")),
                    ..Default::default()
                }
            });
            return FailureResponse::Denied(embed);
        }
        CommandFailure::Unexpected { kind, message } => (kind, message),
    };

    error!(
        user = %ctx.user,
        command = ctx.command.as_deref().unwrap_or("<unknown command>"),
        kind = %kind,
        "command failed: {message}",
    );

    let Some(admin) = admin else {
        return FailureResponse::Reported { posted: false };
    };

    let report = CommandErrorContext::new(&ctx.user, ctx.command.as_deref(), kind, message);
    let embed = match renderer.command_error(&report) {
        Ok(embed) => embed,
        Err(err) => {
            warn!(error = %err, "failed to render command error report");
            return FailureResponse::Reported { posted: false };
        }
    };

    match admin.send(&OutgoingMessage::embed(embed)).await {
        Ok(_) => FailureResponse::Reported { posted: true },
        Err(err) => {
            warn!(error = %err, "failed to post command error report");
            FailureResponse::Reported { posted: false }
        }
    }
}
