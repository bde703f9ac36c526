//! Seams between the engine and the outside world.
//!
//! The daemon implements these over HTTP; the `testkit` feature provides
//! in-memory versions.

use std::sync::Arc;

use async_trait::async_trait;

use streamwatch_core::types::{
    LiveEntity, LiveFilter, Message, MessageId, OutgoingMessage, OwnerId,
};

use crate::error::{ProviderError, StoreError};

/// Source of truth for which broadcasts are live right now.
#[async_trait]
pub trait LiveSetProvider: Send + Sync {
    /// Every live broadcast matching `filter`.
    async fn fetch_live(&self, filter: &LiveFilter) -> Result<Vec<LiveEntity>, ProviderError>;

    /// Profile image of a broadcaster, if they have one.
    async fn owner_icon_url(&self, owner: &OwnerId) -> Result<Option<String>, ProviderError>;

    /// Resolve a login name to a broadcaster id.
    ///
    /// Returns [`ProviderError::NotFound`] when no such broadcaster exists.
    async fn lookup_owner_id(&self, login: &str) -> Result<OwnerId, ProviderError>;
}

/// One chat channel the bot renders into.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Up to `limit` most recent messages, newest first.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// A single message, or `None` if it no longer exists.
    async fn fetch(&self, id: &MessageId) -> Result<Option<Message>, StoreError>;

    async fn send(&self, message: &OutgoingMessage) -> Result<Message, StoreError>;

    async fn edit(&self, id: &MessageId, message: &OutgoingMessage) -> Result<(), StoreError>;

    /// Delete a message. Deleting an id that is already gone succeeds.
    async fn delete(&self, id: &MessageId) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: LiveSetProvider + ?Sized> LiveSetProvider for Arc<T> {
    async fn fetch_live(&self, filter: &LiveFilter) -> Result<Vec<LiveEntity>, ProviderError> {
        (**self).fetch_live(filter).await
    }

    async fn owner_icon_url(&self, owner: &OwnerId) -> Result<Option<String>, ProviderError> {
        (**self).owner_icon_url(owner).await
    }

    async fn lookup_owner_id(&self, login: &str) -> Result<OwnerId, ProviderError> {
        (**self).lookup_owner_id(login).await
    }
}

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        (**self).list_recent(limit).await
    }

    async fn fetch(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        (**self).fetch(id).await
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<Message, StoreError> {
        (**self).send(message).await
    }

    async fn edit(&self, id: &MessageId, message: &OutgoingMessage) -> Result<(), StoreError> {
        (**self).edit(id, message).await
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StoreError> {
        (**self).delete(id).await
    }
}
