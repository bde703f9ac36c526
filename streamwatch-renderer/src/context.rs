//! Template contexts: serializable rendering payloads built from domain values.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use streamwatch_core::types::LiveEntity;

use crate::error::RenderError;

/// Thumbnail size requested from the platform's `{width}x{height}` template.
pub const THUMBNAIL_WIDTH: u32 = 1280;
pub const THUMBNAIL_HEIGHT: u32 = 720;

/// Base URL of a broadcaster's channel page.
pub const CHANNEL_URL_BASE: &str = "https://twitch.tv/";

/// Payload for one live announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementContext {
    pub owner_name: String,
    pub owner_url: String,
    pub owner_icon_url: Option<String>,
    pub title: String,
    pub viewer_count: u64,
    /// Thumbnail URL with size filled in and a cache-busting query.
    pub image_url: String,
    pub mention_role_id: String,
    pub timestamp: DateTime<Utc>,
}

impl AnnouncementContext {
    /// Build the announcement payload for `entity`.
    ///
    /// `cache_buster` is appended as `?q=<token>` so chat clients refetch the
    /// thumbnail on every edit.
    pub fn from_entity(
        entity: &LiveEntity,
        owner_icon_url: Option<String>,
        mention_role_id: &str,
        cache_buster: u64,
        now: DateTime<Utc>,
    ) -> Self {
        let image_url = format!(
            "{}?q={}",
            entity
                .thumbnail_url
                .replace("{width}", &THUMBNAIL_WIDTH.to_string())
                .replace("{height}", &THUMBNAIL_HEIGHT.to_string()),
            cache_buster
        );

        AnnouncementContext {
            owner_name: entity.owner_name.clone(),
            owner_url: format!("{CHANNEL_URL_BASE}{}", entity.owner_name),
            owner_icon_url,
            title: entity.title.clone(),
            viewer_count: entity.viewer_count,
            image_url,
            mention_role_id: mention_role_id.to_string(),
            timestamp: now,
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// Payload for the "restart complete" reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartContext {
    /// Elapsed seconds, preformatted with two decimals and grouped thousands.
    pub seconds: String,
}

impl RestartContext {
    pub fn from_elapsed(elapsed: Duration) -> Self {
        RestartContext {
            seconds: group_thousands(&format!("{:.2}", elapsed.as_secs_f64())),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// Payload for an unexpected command failure posted to the admin channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandErrorContext {
    pub user: String,
    /// `<unknown command>` when the command name could not be determined.
    pub command: String,
    pub kind: String,
    pub message: String,
}

impl CommandErrorContext {
    pub fn new(
        user: impl Into<String>,
        command: Option<&str>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CommandErrorContext {
            user: user.into(),
            command: command.unwrap_or("<unknown command>").to_string(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// Insert `,` between each group of three integer digits: `1234.56` becomes
/// `1,234.56`.
fn group_thousands(number: &str) -> String {
    let (int, frac) = number.split_once('.').unwrap_or((number, ""));
    let mut out = String::with_capacity(number.len() + int.len() / 3);
    for (i, digit) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(digit);
    }
    if !frac.is_empty() {
        out.push('.');
        out.push_str(frac);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamwatch_core::types::{OwnerId, StreamId};

    fn entity() -> LiveEntity {
        LiveEntity {
            id: StreamId::from("s1"),
            owner_id: OwnerId::from("o1"),
            owner_name: "speedrunner".to_string(),
            title: "any% attempts".to_string(),
            viewer_count: 10,
            thumbnail_url: "https://cdn.example/live_user-{width}x{height}.jpg".to_string(),
        }
    }

    #[test]
    fn announcement_fills_thumbnail_size_and_cache_buster() {
        let ctx = AnnouncementContext::from_entity(&entity(), None, "77", 1234, Utc::now());
        assert_eq!(
            ctx.image_url,
            "https://cdn.example/live_user-1280x720.jpg?q=1234"
        );
        assert_eq!(ctx.owner_url, "https://twitch.tv/speedrunner");
    }

    #[test]
    fn restart_seconds_have_two_decimals() {
        let ctx = RestartContext::from_elapsed(Duration::from_millis(12_500));
        assert_eq!(ctx.seconds, "12.50");
    }

    #[test]
    fn restart_seconds_group_thousands() {
        let ctx = RestartContext::from_elapsed(Duration::from_millis(1_234_560));
        assert_eq!(ctx.seconds, "1,234.56");
        assert_eq!(group_thousands("999.00"), "999.00");
        assert_eq!(group_thousands("1234567.10"), "1,234,567.10");
    }

    #[test]
    fn command_error_defaults_unknown_command() {
        let ctx = CommandErrorContext::new("mod#0001", None, "Io", "boom");
        assert_eq!(ctx.command, "<unknown command>");
        ctx.to_tera_context().expect("context conversion");
    }
}
