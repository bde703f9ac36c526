//! In-memory reconciliation state owned by one [`Engine`](crate::Engine).
//!
//! Nothing here is persisted. After a restart the cache is rebuilt from the
//! channel by [`recovery`](crate::recovery) and the soft-ban set starts empty.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use streamwatch_core::types::{LiveEntity, MessageId, RenderedRecord, StreamId};

/// Live session → message currently rendering it.
pub type RenderCache = HashMap<StreamId, MessageId>;

/// Sessions whose message a moderator removed.
///
/// Each entry counts the consecutive passes its session has been absent
/// from the live set. Entries survive [`SoftBanSet::age`] while that count
/// stays within the grace window, so a flapping provider cannot resurrect a
/// moderated announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftBanSet {
    entries: HashMap<StreamId, u32>,
}

impl SoftBanSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not already banned.
    pub fn insert(&mut self, id: StreamId) -> bool {
        match self.entries.insert(id, 0) {
            Some(_) => false,
            None => true,
        }
    }

    pub fn remove(&mut self, id: &StreamId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &StreamId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted ids, for status output.
    pub fn ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<StreamId> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Advance absence counters against the current live set and drop bans
    /// whose session has been gone for more than `grace_passes` passes.
    ///
    /// Returns the pruned ids.
    pub fn age(&mut self, live: &HashSet<&StreamId>, grace_passes: u32) -> Vec<StreamId> {
        let mut pruned = Vec::new();
        self.entries.retain(|id, misses| {
            if live.contains(id) {
                *misses = 0;
                return true;
            }
            *misses += 1;
            if *misses > grace_passes {
                pruned.push(id.clone());
                false
            } else {
                true
            }
        });
        pruned.sort();
        pruned
    }
}

/// Everything a reconciliation pass reads and writes.
#[derive(Debug, Clone, Default)]
pub struct EngineState {
    pub cache: RenderCache,
    pub soft_bans: SoftBanSet,
    /// Live set from the most recent successful fetch, used for owner lookups.
    pub last_live: Vec<LiveEntity>,
}

impl EngineState {
    /// Cache contents as records, sorted by stream id.
    pub fn records(&self) -> Vec<RenderedRecord> {
        let mut records: Vec<RenderedRecord> = self
            .cache
            .iter()
            .map(|(stream_id, message_id)| RenderedRecord {
                stream_id: stream_id.clone(),
                message_id: message_id.clone(),
            })
            .collect();
        records.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
        records
    }

    /// Point-in-time view for status reporting.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            rendered: self.records(),
            soft_banned: self.soft_bans.ids(),
            live: self.last_live.len(),
        }
    }
}

/// Serializable copy of [`EngineState`] handed to other tasks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub rendered: Vec<RenderedRecord>,
    pub soft_banned: Vec<StreamId>,
    pub live: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_new_entries_only() {
        let mut bans = SoftBanSet::new();
        assert!(bans.insert(StreamId::from("s1")));
        assert!(!bans.insert(StreamId::from("s1")));
        assert_eq!(bans.len(), 1);
    }

    #[test]
    fn age_keeps_live_sessions_indefinitely() {
        let mut bans = SoftBanSet::new();
        let id = StreamId::from("s1");
        bans.insert(id.clone());
        let live: HashSet<&StreamId> = [&id].into_iter().collect();
        for _ in 0..10 {
            assert!(bans.age(&live, 0).is_empty());
        }
        assert!(bans.contains(&id));
    }

    #[test]
    fn age_prunes_after_grace_window() {
        let mut bans = SoftBanSet::new();
        let id = StreamId::from("s1");
        bans.insert(id.clone());
        let empty = HashSet::new();

        assert!(bans.age(&empty, 2).is_empty());
        assert!(bans.age(&empty, 2).is_empty());
        assert_eq!(bans.age(&empty, 2), vec![id.clone()]);
        assert!(!bans.contains(&id));
    }

    #[rstest::rstest]
    #[case(0, 1)]
    #[case(1, 2)]
    #[case(3, 4)]
    fn ban_survives_exactly_grace_passes(#[case] grace: u32, #[case] pruned_on: u32) {
        let mut bans = SoftBanSet::new();
        let id = StreamId::from("s1");
        bans.insert(id.clone());
        let empty = HashSet::new();

        for pass in 1..pruned_on {
            assert!(bans.age(&empty, grace).is_empty(), "pruned early on pass {pass}");
        }
        assert_eq!(bans.age(&empty, grace), vec![id]);
    }

    #[test]
    fn reappearing_session_resets_absence_counter() {
        let mut bans = SoftBanSet::new();
        let id = StreamId::from("s1");
        bans.insert(id.clone());
        let empty = HashSet::new();
        let live: HashSet<&StreamId> = [&id].into_iter().collect();

        bans.age(&empty, 1);
        bans.age(&live, 1);
        assert!(bans.age(&empty, 1).is_empty(), "counter restarted after flap");
        assert!(bans.contains(&id));
    }

    #[test]
    fn records_are_sorted() {
        let mut state = EngineState::default();
        state.cache.insert(StreamId::from("b"), MessageId::from("2"));
        state.cache.insert(StreamId::from("a"), MessageId::from("1"));
        let ids: Vec<_> = state.records().into_iter().map(|r| r.stream_id.0).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
