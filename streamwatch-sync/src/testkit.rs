//! In-memory [`MessageStore`] and [`LiveSetProvider`] for tests.
//!
//! Both fakes are cheap to clone and share their state, so a test can hand
//! one clone to an [`Engine`](crate::Engine) and keep another to inspect or
//! mutate the channel between passes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use streamwatch_core::types::{
    Embed, EmbedAuthor, LiveEntity, LiveFilter, Message, MessageId, OutgoingMessage, OwnerId,
    StreamId,
};

use crate::error::{ProviderError, StoreError};
use crate::ports::{LiveSetProvider, MessageStore};

/// A live entity with fixed metadata, for tests that only care about ids and names.
pub fn live_entity(id: &str, owner_id: &str, owner_name: &str) -> LiveEntity {
    LiveEntity {
        id: StreamId::from(id),
        owner_id: OwnerId::from(owner_id),
        owner_name: owner_name.to_string(),
        title: format!("{owner_name} is streaming"),
        viewer_count: 10,
        thumbnail_url: format!("https://cdn.example/live_{owner_name}-{{width}}x{{height}}.jpg"),
    }
}

// ---------------------------------------------------------------------------
// MemoryChannel
// ---------------------------------------------------------------------------

/// One call made against a [`MemoryChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    List { limit: usize },
    Fetch(MessageId),
    Send(MessageId),
    Edit(MessageId),
    Delete(MessageId),
}

#[derive(Debug, Default)]
struct ChannelInner {
    /// Oldest first.
    messages: Vec<Message>,
    next_id: u64,
    ops: Vec<StoreOp>,
    failing_deletes: HashSet<MessageId>,
    fail_next_list: bool,
    fail_sends: bool,
    fail_edits: bool,
}

impl ChannelInner {
    fn next_id(&mut self) -> MessageId {
        self.next_id += 1;
        MessageId(self.next_id.to_string())
    }

    fn find_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }
}

/// A chat channel held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Mutex<ChannelInner>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `draft` as the newest message. Its id is replaced with a fresh one.
    pub fn push_message(&self, mut draft: Message) -> MessageId {
        let mut inner = self.lock();
        let id = inner.next_id();
        draft.id = id.clone();
        inner.messages.push(draft);
        id
    }

    /// A bot-authored message carrying `embeds`.
    pub fn push_bot(&self, embeds: Vec<Embed>) -> MessageId {
        self.push_message(Message {
            id: MessageId::from(""),
            from_self: true,
            content: String::new(),
            embeds,
            reference: None,
            interaction_name: None,
            timestamp: Utc::now(),
        })
    }

    /// A bot announcement whose single embed is authored by `owner_name`.
    pub fn push_announcement(&self, owner_name: &str) -> MessageId {
        self.push_bot(vec![Embed {
            author: Some(EmbedAuthor {
                name: owner_name.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }])
    }

    /// A message written by someone other than the bot.
    pub fn push_foreign(&self, content: &str) -> MessageId {
        self.push_message(Message {
            id: MessageId::from(""),
            from_self: false,
            content: content.to_string(),
            embeds: Vec::new(),
            reference: None,
            interaction_name: None,
            timestamp: Utc::now(),
        })
    }

    /// The bot's response to slash command `command`, posted at `at`.
    pub fn push_command_response(&self, command: &str, at: DateTime<Utc>) -> MessageId {
        self.push_message(Message {
            id: MessageId::from(""),
            from_self: true,
            content: String::new(),
            embeds: Vec::new(),
            reference: None,
            interaction_name: Some(command.to_string()),
            timestamp: at,
        })
    }

    /// A bot message replying to `to`.
    pub fn push_bot_reply(&self, to: &MessageId, content: &str) -> MessageId {
        self.push_message(Message {
            id: MessageId::from(""),
            from_self: true,
            content: content.to_string(),
            embeds: Vec::new(),
            reference: Some(to.clone()),
            interaction_name: None,
            timestamp: Utc::now(),
        })
    }

    /// Delete a message without going through the store, as a moderator would.
    pub fn remove_externally(&self, id: &MessageId) -> bool {
        let mut inner = self.lock();
        let before = inner.messages.len();
        inner.messages.retain(|m| &m.id != id);
        inner.messages.len() != before
    }

    /// Oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn messages_newest_first(&self) -> Vec<Message> {
        self.lock().messages.iter().rev().cloned().collect()
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.lock().messages.iter().find(|m| &m.id == id).cloned()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.lock().messages.iter().any(|m| &m.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn bot_message_count(&self) -> usize {
        self.lock().messages.iter().filter(|m| m.from_self).count()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Every delete of `id` fails until the test ends.
    pub fn fail_delete_of(&self, id: MessageId) {
        self.lock().failing_deletes.insert(id);
    }

    /// Undo [`fail_delete_of`](Self::fail_delete_of).
    pub fn allow_delete_of(&self, id: &MessageId) {
        self.lock().failing_deletes.remove(id);
    }

    /// The next `list_recent` call fails.
    pub fn fail_next_list(&self) {
        self.lock().fail_next_list = true;
    }

    pub fn fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn fail_edits(&self, fail: bool) {
        self.lock().fail_edits = fail;
    }
}

#[async_trait]
impl MessageStore for MemoryChannel {
    async fn list_recent(&self, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::List { limit });
        if std::mem::take(&mut inner.fail_next_list) {
            return Err(StoreError::Request("injected list failure".to_string()));
        }
        Ok(inner.messages.iter().rev().take(limit).cloned().collect())
    }

    async fn fetch(&self, id: &MessageId) -> Result<Option<Message>, StoreError> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Fetch(id.clone()));
        Ok(inner.messages.iter().find(|m| &m.id == id).cloned())
    }

    async fn send(&self, message: &OutgoingMessage) -> Result<Message, StoreError> {
        let mut inner = self.lock();
        if inner.fail_sends {
            return Err(StoreError::Status {
                status: 500,
                endpoint: "messages".to_string(),
            });
        }
        let id = inner.next_id();
        inner.ops.push(StoreOp::Send(id.clone()));
        let sent = Message {
            id,
            from_self: true,
            content: message.content.clone().unwrap_or_default(),
            embeds: message.embed.clone().into_iter().collect(),
            reference: message.reply_to.clone(),
            interaction_name: None,
            timestamp: Utc::now(),
        };
        inner.messages.push(sent.clone());
        Ok(sent)
    }

    async fn edit(&self, id: &MessageId, message: &OutgoingMessage) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Edit(id.clone()));
        if inner.fail_edits {
            return Err(StoreError::Status {
                status: 500,
                endpoint: format!("messages/{id}"),
            });
        }
        let Some(existing) = inner.find_mut(id) else {
            return Err(StoreError::Status {
                status: 404,
                endpoint: format!("messages/{id}"),
            });
        };
        if let Some(content) = &message.content {
            existing.content = content.clone();
        }
        if let Some(embed) = &message.embed {
            existing.embeds = vec![embed.clone()];
        }
        Ok(())
    }

    async fn delete(&self, id: &MessageId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.ops.push(StoreOp::Delete(id.clone()));
        if inner.failing_deletes.contains(id) {
            return Err(StoreError::Request(format!("injected delete failure for {id}")));
        }
        inner.messages.retain(|m| &m.id != id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticProvider
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProviderInner {
    live: Vec<LiveEntity>,
    fail_next_fetch: bool,
    fail_icons: bool,
    /// Lowercased login → id.
    users: HashMap<String, OwnerId>,
    icons: HashMap<OwnerId, String>,
    fetches: usize,
    lookups: usize,
}

/// A provider whose live set is whatever the test last set.
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    inner: Arc<Mutex<ProviderInner>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_live(live: Vec<LiveEntity>) -> Self {
        let provider = Self::new();
        provider.set_live(live);
        provider
    }

    fn lock(&self) -> MutexGuard<'_, ProviderInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_live(&self, live: Vec<LiveEntity>) {
        self.lock().live = live;
    }

    /// The next `fetch_live` call fails.
    pub fn fail_next_fetch(&self) {
        self.lock().fail_next_fetch = true;
    }

    pub fn fail_icon_lookups(&self, fail: bool) {
        self.lock().fail_icons = fail;
    }

    pub fn register_user(&self, login: &str, id: &str) {
        self.lock()
            .users
            .insert(login.to_lowercase(), OwnerId::from(id));
    }

    pub fn set_icon(&self, owner: &str, url: &str) {
        self.lock()
            .icons
            .insert(OwnerId::from(owner), url.to_string());
    }

    pub fn fetch_count(&self) -> usize {
        self.lock().fetches
    }

    pub fn lookup_count(&self) -> usize {
        self.lock().lookups
    }
}

#[async_trait]
impl LiveSetProvider for StaticProvider {
    async fn fetch_live(&self, _filter: &LiveFilter) -> Result<Vec<LiveEntity>, ProviderError> {
        let mut inner = self.lock();
        inner.fetches += 1;
        if std::mem::take(&mut inner.fail_next_fetch) {
            return Err(ProviderError::Request("injected fetch failure".to_string()));
        }
        Ok(inner.live.clone())
    }

    async fn owner_icon_url(&self, owner: &OwnerId) -> Result<Option<String>, ProviderError> {
        let inner = self.lock();
        if inner.fail_icons {
            return Err(ProviderError::Status {
                status: 503,
                endpoint: "users".to_string(),
            });
        }
        Ok(inner.icons.get(owner).cloned())
    }

    async fn lookup_owner_id(&self, login: &str) -> Result<OwnerId, ProviderError> {
        let mut inner = self.lock();
        inner.lookups += 1;
        inner
            .users
            .get(&login.to_lowercase())
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                name: login.to_string(),
            })
    }
}
