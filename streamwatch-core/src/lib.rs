//! streamwatch core library: domain types, YAML configuration, errors.
//!
//! - [`types`]: newtypes, live-set entities and channel messages
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save / init of `~/.streamwatch/config.yaml`

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::ConfigError;
pub use types::{
    ChannelId, Embed, EmbedAuthor, LiveEntity, LiveFilter, Message, MessageId, OutgoingMessage,
    OwnerId, RenderedRecord, StreamId,
};
