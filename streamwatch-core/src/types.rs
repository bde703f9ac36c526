//! Domain types shared by the reconciliation engine, renderer and adapters.
//!
//! Identifiers coming from the streaming platform and the chat service are
//! opaque strings (Twitch ids and Discord snowflakes). Each gets a newtype so
//! a stream id can never be passed where a message id is expected.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of one live session (a single broadcast).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a broadcaster. Hard bans are keyed by this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub String);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for OwnerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OwnerId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a message in a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a chat channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Live set
// ---------------------------------------------------------------------------

/// One currently-live broadcast as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveEntity {
    pub id: StreamId,
    pub owner_id: OwnerId,
    /// Display name; also the embed author name used by cache recovery.
    pub owner_name: String,
    pub title: String,
    pub viewer_count: u64,
    /// URL template containing `{width}` and `{height}` placeholders.
    pub thumbnail_url: String,
}

/// Filter handed to the provider on every poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveFilter {
    pub game_id: String,
}

/// Binding between a live session and the message rendering it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderedRecord {
    pub stream_id: StreamId,
    pub message_id: MessageId,
}

// ---------------------------------------------------------------------------
// Channel messages
// ---------------------------------------------------------------------------

/// Embed author block. Its `name` is how recovery recognises a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EmbedAuthor {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
}

/// Rich embed attached to a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Embed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<EmbedAuthor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Embed {
    pub fn author_name(&self) -> Option<&str> {
        self.author.as_ref().map(|a| a.name.as_str())
    }
}

/// A message as read back from a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    /// Authored by the bot itself.
    pub from_self: bool,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// The message this one replies to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<MessageId>,
    /// Name of the slash command this message responded to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interaction_name: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A message about to be sent or used to overwrite an existing one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct OutgoingMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
}

impl OutgoingMessage {
    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
            reply_to: None,
        }
    }

    pub fn in_reply_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(StreamId::from("s-01").to_string(), "s-01");
        assert_eq!(OwnerId::from("o-01").to_string(), "o-01");
        assert_eq!(MessageId::from("123").to_string(), "123");
        assert_eq!(ChannelId::from("456").to_string(), "456");
    }

    #[test]
    fn newtype_equality() {
        let a = StreamId::from("x");
        let b = StreamId::from(String::from("x"));
        assert_eq!(a, b);
    }

    #[test]
    fn embed_author_name_is_optional() {
        let mut embed = Embed::default();
        assert_eq!(embed.author_name(), None);
        embed.author = Some(EmbedAuthor {
            name: "speedy".to_string(),
            ..Default::default()
        });
        assert_eq!(embed.author_name(), Some("speedy"));
    }

    #[test]
    fn outgoing_reply_sets_reference() {
        let msg = OutgoingMessage::embed(Embed::default()).in_reply_to(MessageId::from("9"));
        assert_eq!(msg.reply_to, Some(MessageId::from("9")));
        assert!(msg.content.is_none());
    }
}
