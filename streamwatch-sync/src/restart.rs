//! Post-restart correlation.
//!
//! A forced restart is requested with a slash command whose response the bot
//! posts in the admin channel. After coming back up, the correlator finds
//! that response and replies to it with how long the restart took. A
//! response that already has a reply is left alone, so running the
//! correlator twice posts at most one completion notice.

use std::time::Duration;

use chrono::{DateTime, Utc};

use streamwatch_core::types::{Message, MessageId};
use streamwatch_renderer::Renderer;

use crate::error::SyncError;
use crate::ports::MessageStore;

/// How many recent admin-channel messages are scanned for the marker.
pub const RESTART_SCAN_LIMIT: usize = 50;

/// What a correlator run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    /// A completion reply was posted to `marker`.
    Replied { marker: MessageId, elapsed: Duration },
    /// `marker` already has a completion reply.
    AlreadyReplied { marker: MessageId },
    /// No restart command response in the scanned history.
    NotFound,
}

#[derive(Debug)]
enum Matched {
    NeedsReply(Message),
    AlreadyReplied(MessageId),
}

#[derive(Debug)]
enum CorrelatorState {
    Scanning,
    Matched(Matched),
    Done(RestartOutcome),
}

pub struct RestartCorrelator<'a, S: ?Sized> {
    store: &'a S,
    renderer: &'a Renderer,
    command_name: &'a str,
}

impl<'a, S> RestartCorrelator<'a, S>
where
    S: MessageStore + ?Sized,
{
    pub fn new(store: &'a S, renderer: &'a Renderer, command_name: &'a str) -> Self {
        RestartCorrelator {
            store,
            renderer,
            command_name,
        }
    }

    /// Scan, reply if needed, and report what happened. `now` is the restart
    /// completion time.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RestartOutcome, SyncError> {
        let mut state = CorrelatorState::Scanning;
        loop {
            state = match state {
                CorrelatorState::Scanning => match self.scan().await? {
                    Some(found) => CorrelatorState::Matched(found),
                    None => CorrelatorState::Done(RestartOutcome::NotFound),
                },
                CorrelatorState::Matched(Matched::AlreadyReplied(marker)) => {
                    CorrelatorState::Done(RestartOutcome::AlreadyReplied { marker })
                }
                CorrelatorState::Matched(Matched::NeedsReply(marker)) => {
                    let elapsed = (now - marker.timestamp).to_std().unwrap_or_default();
                    let reply = self
                        .renderer
                        .restart_complete(elapsed)?
                        .in_reply_to(marker.id.clone());
                    self.store.send(&reply).await?;
                    CorrelatorState::Done(RestartOutcome::Replied {
                        marker: marker.id,
                        elapsed,
                    })
                }
                CorrelatorState::Done(outcome) => return Ok(outcome),
            };
        }
    }

    /// First match in the newest bot messages, if any.
    async fn scan(&self) -> Result<Option<Matched>, SyncError> {
        let recent = self.store.list_recent(RESTART_SCAN_LIMIT).await?;
        for candidate in recent.into_iter().filter(|m| m.from_self) {
            if let Some(reference) = &candidate.reference {
                // A bot reply pointing at the marker means it was already answered.
                if let Some(target) = self.store.fetch(reference).await? {
                    if self.is_marker(&target) {
                        return Ok(Some(Matched::AlreadyReplied(target.id)));
                    }
                }
                continue;
            }
            if self.is_marker(&candidate) {
                return Ok(Some(Matched::NeedsReply(candidate)));
            }
        }
        Ok(None)
    }

    fn is_marker(&self, message: &Message) -> bool {
        message.interaction_name.as_deref() == Some(self.command_name)
    }
}
