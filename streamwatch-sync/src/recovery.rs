//! Rebuild the render cache from what is actually in the channel.
//!
//! A bot message is bound to a live session when it carries exactly one
//! embed whose author name equals that session's display name. Every other
//! bot message is deleted. No identifier is embedded in the messages, so a
//! renamed broadcaster or two broadcasters sharing a display name will be
//! matched wrongly; this mirrors how the announcements have always been
//! recognised.

use std::collections::HashMap;

use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use streamwatch_core::types::{LiveEntity, Message, MessageId};

use crate::error::StoreError;
use crate::ports::MessageStore;
use crate::state::RenderCache;

/// Result of one recovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryOutcome {
    pub cache: RenderCache,
    /// Stale messages successfully deleted.
    pub deleted: usize,
    /// Stale messages whose deletion failed.
    pub failed: usize,
}

/// Counts only, for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverySummary {
    pub bound: usize,
    pub deleted: usize,
    pub failed: usize,
}

impl RecoveryOutcome {
    pub fn summary(&self) -> RecoverySummary {
        RecoverySummary {
            bound: self.cache.len(),
            deleted: self.deleted,
            failed: self.failed,
        }
    }
}

/// Split bot-authored `messages` (newest first) into a cache and the ids to delete.
///
/// When several messages match the same session the first (newest) one is
/// kept and the others are treated as stale.
pub fn match_messages(messages: &[Message], live: &[LiveEntity]) -> (RenderCache, Vec<MessageId>) {
    let by_name: HashMap<&str, &LiveEntity> = live
        .iter()
        .map(|e| (e.owner_name.as_str(), e))
        .collect();

    let mut cache = RenderCache::new();
    let mut stale = Vec::new();

    for message in messages.iter().filter(|m| m.from_self) {
        let matched = match message.embeds.as_slice() {
            [embed] => embed
                .author_name()
                .and_then(|name| by_name.get(name).copied()),
            _ => None,
        };

        match matched {
            Some(entity) if !cache.contains_key(&entity.id) => {
                cache.insert(entity.id.clone(), message.id.clone());
            }
            _ => stale.push(message.id.clone()),
        }
    }

    (cache, stale)
}

/// List the channel, bind what still matches `live`, delete the rest.
///
/// Deletions run concurrently; an individual failure is logged and counted
/// without affecting the others.
pub async fn recover<S>(
    store: &S,
    live: &[LiveEntity],
    history_limit: usize,
) -> Result<RecoveryOutcome, StoreError>
where
    S: MessageStore + ?Sized,
{
    let messages = store.list_recent(history_limit).await?;
    let (cache, stale) = match_messages(&messages, live);

    let results = join_all(stale.iter().map(|id| async move {
        let result = store.delete(id).await;
        (id, result)
    }))
    .await;

    let mut outcome = RecoveryOutcome {
        cache,
        ..Default::default()
    };
    for (id, result) in results {
        match result {
            Ok(()) => {
                tracing::debug!(message = %id, "deleted stale announcement");
                outcome.deleted += 1;
            }
            Err(err) => {
                tracing::warn!(message = %id, error = %err, "failed to delete stale announcement");
                outcome.failed += 1;
            }
        }
    }

    tracing::debug!(
        bound = outcome.cache.len(),
        deleted = outcome.deleted,
        failed = outcome.failed,
        "render cache recovered from channel",
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{live_entity, MemoryChannel};
    use streamwatch_core::types::{Embed, StreamId};

    #[test]
    fn ignores_foreign_messages() {
        let channel = MemoryChannel::new();
        channel.push_foreign("hello");
        let live = vec![live_entity("s1", "o1", "alpha")];
        let (cache, stale) = match_messages(&channel.messages_newest_first(), &live);
        assert!(cache.is_empty());
        assert!(stale.is_empty());
    }

    #[test]
    fn multi_embed_message_is_stale() {
        let channel = MemoryChannel::new();
        let id = channel.push_bot(vec![
            Embed {
                author: Some(streamwatch_core::EmbedAuthor {
                    name: "alpha".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Embed::default(),
        ]);
        let live = vec![live_entity("s1", "o1", "alpha")];
        let (cache, stale) = match_messages(&channel.messages_newest_first(), &live);
        assert!(cache.is_empty());
        assert_eq!(stale, vec![id]);
    }

    #[test]
    fn duplicate_match_keeps_newest() {
        let channel = MemoryChannel::new();
        let older = channel.push_announcement("alpha");
        let newer = channel.push_announcement("alpha");
        let live = vec![live_entity("s1", "o1", "alpha")];
        let (cache, stale) = match_messages(&channel.messages_newest_first(), &live);
        assert_eq!(cache.get(&StreamId::from("s1")), Some(&newer));
        assert_eq!(stale, vec![older]);
    }

    #[tokio::test]
    async fn recover_binds_matches_and_deletes_the_rest() {
        let channel = MemoryChannel::new();
        let keep_a = channel.push_announcement("alpha");
        channel.push_announcement("gone-offline");
        let keep_b = channel.push_announcement("bravo");
        channel.push_bot(vec![]);
        channel.push_foreign("user chatter");

        let live = vec![
            live_entity("s1", "o1", "alpha"),
            live_entity("s2", "o2", "bravo"),
            live_entity("s3", "o3", "charlie"),
        ];
        let outcome = recover(&channel, &live, 100).await.expect("recover");

        assert_eq!(outcome.cache.len(), 2);
        assert_eq!(outcome.cache.get(&StreamId::from("s1")), Some(&keep_a));
        assert_eq!(outcome.cache.get(&StreamId::from("s2")), Some(&keep_b));
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failed, 0);
        assert_eq!(channel.bot_message_count(), 2);
        assert_eq!(channel.len(), 3, "foreign message untouched");
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_the_others() {
        let channel = MemoryChannel::new();
        let stuck = channel.push_announcement("old-1");
        channel.push_announcement("old-2");
        channel.push_announcement("old-3");
        channel.fail_delete_of(stuck.clone());

        let outcome = recover(&channel, &[], 100).await.expect("recover");
        assert_eq!(outcome.deleted, 2);
        assert_eq!(outcome.failed, 1);
        assert!(channel.contains(&stuck));
        assert_eq!(channel.bot_message_count(), 1);
    }

    #[tokio::test]
    async fn list_failure_is_returned() {
        let channel = MemoryChannel::new();
        channel.fail_next_list();
        let err = recover(&channel, &[], 100).await.unwrap_err();
        assert!(matches!(err, StoreError::Request(_)));
    }
}
