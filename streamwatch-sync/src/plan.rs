//! Pure diff planning between the live set and the render cache.
//!
//! Nothing here performs I/O; [`Engine::tick`](crate::Engine::tick) applies
//! the plans these functions return.

use std::collections::{BTreeSet, HashSet};

use streamwatch_core::types::{LiveEntity, MessageId, OwnerId, StreamId};

use crate::state::{RenderCache, SoftBanSet};

/// The live set split by hard-ban policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition<'a> {
    pub active: Vec<&'a LiveEntity>,
    pub hard_banned: Vec<&'a LiveEntity>,
}

impl Partition<'_> {
    pub fn hard_banned_ids(&self) -> HashSet<&StreamId> {
        self.hard_banned.iter().map(|e| &e.id).collect()
    }

    /// Owned copies of the active entities, for recovery matching.
    pub fn active_owned(&self) -> Vec<LiveEntity> {
        self.active.iter().map(|e| (*e).clone()).collect()
    }
}

/// Drop repeated stream ids from a fetched live set, keeping the first
/// occurrence and the provider's order.
pub fn dedup_live(live: Vec<LiveEntity>) -> Vec<LiveEntity> {
    let mut seen = HashSet::with_capacity(live.len());
    live.into_iter()
        .filter(|entity| seen.insert(entity.id.clone()))
        .collect()
}

/// Split `live` into entities that may be rendered and those whose owner is banned.
pub fn partition<'a>(live: &'a [LiveEntity], hard_bans: &BTreeSet<OwnerId>) -> Partition<'a> {
    let mut out = Partition::default();
    for entity in live {
        if hard_bans.contains(&entity.owner_id) {
            out.hard_banned.push(entity);
        } else {
            out.active.push(entity);
        }
    }
    out
}

/// Why a cached record must leave the cache this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    /// Session is no longer live. `rendered` is whether its message was
    /// still present in the channel.
    Ended {
        stream: StreamId,
        message: MessageId,
        rendered: bool,
    },
    /// Owner is hard-banned; the message is deleted.
    HardBanned { stream: StreamId, message: MessageId },
    /// Session is live but its message vanished from the channel.
    Moderated { stream: StreamId, message: MessageId },
}

impl Removal {
    pub fn stream(&self) -> &StreamId {
        match self {
            Removal::Ended { stream, .. }
            | Removal::HardBanned { stream, .. }
            | Removal::Moderated { stream, .. } => stream,
        }
    }
}

/// Classify every cached record that must not survive this pass.
///
/// `rendered` holds the ids of bot messages currently in the channel.
/// Records are returned sorted by stream id.
pub fn removals(
    cache: &RenderCache,
    live: &[LiveEntity],
    partition: &Partition<'_>,
    rendered: &HashSet<MessageId>,
) -> Vec<Removal> {
    let live_ids: HashSet<&StreamId> = live.iter().map(|e| &e.id).collect();
    let banned_ids = partition.hard_banned_ids();

    let mut out: Vec<Removal> = cache
        .iter()
        .filter_map(|(stream, message)| {
            let stream = stream.clone();
            let message = message.clone();
            if !live_ids.contains(&stream) {
                let rendered = rendered.contains(&message);
                Some(Removal::Ended {
                    stream,
                    message,
                    rendered,
                })
            } else if banned_ids.contains(&stream) {
                Some(Removal::HardBanned { stream, message })
            } else if !rendered.contains(&message) {
                Some(Removal::Moderated { stream, message })
            } else {
                None
            }
        })
        .collect();
    out.sort_by(|a, b| a.stream().cmp(b.stream()));
    out
}

/// Active entities that are neither soft- nor hard-banned, in provider order.
pub fn to_render<'a>(
    partition: &Partition<'a>,
    soft_bans: &SoftBanSet,
    hard_bans: &BTreeSet<OwnerId>,
) -> Vec<&'a LiveEntity> {
    partition
        .active
        .iter()
        .copied()
        .filter(|e| !soft_bans.contains(&e.id) && !hard_bans.contains(&e.owner_id))
        .collect()
}

/// What to do for one renderable entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderAction {
    Create(LiveEntity),
    Update {
        entity: LiveEntity,
        message: MessageId,
    },
}

/// Edit cached entities in place; create messages for the rest.
pub fn render_actions(to_render: &[&LiveEntity], cache: &RenderCache) -> Vec<RenderAction> {
    to_render
        .iter()
        .map(|entity| match cache.get(&entity.id) {
            Some(message) => RenderAction::Update {
                entity: (*entity).clone(),
                message: message.clone(),
            },
            None => RenderAction::Create((*entity).clone()),
        })
        .collect()
}
