//! The reconciliation engine.
//!
//! [`Engine`] owns the render cache and soft-ban set and is driven by a
//! single task. Each [`Engine::tick`] fetches the live set, retires records
//! for sessions that ended or were banned, resynchronises the cache with the
//! channel and then creates or edits one announcement per renderable session.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use streamwatch_core::types::{LiveEntity, LiveFilter, MessageId, OutgoingMessage, OwnerId, StreamId};
use streamwatch_core::Config;
use streamwatch_renderer::{AnnouncementContext, RenderError, Renderer};

use crate::error::SyncError;
use crate::plan::{self, Removal, RenderAction};
use crate::ports::{LiveSetProvider, MessageStore};
use crate::recovery::{self, RecoverySummary};
use crate::state::{EngineState, StateSnapshot};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The slice of [`Config`] the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub filter: LiveFilter,
    pub hard_bans: BTreeSet<OwnerId>,
    pub mention_role_id: String,
    pub history_limit: usize,
    pub soft_ban_grace_passes: u32,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        EngineConfig {
            filter: config.live_filter(),
            hard_bans: config.twitch_user_bans.clone(),
            mention_role_id: config.livestream_mention_role_id.clone(),
            history_limit: config.history_limit,
            soft_ban_grace_passes: config.soft_ban_grace_passes,
        }
    }
}

// ---------------------------------------------------------------------------
// PassReport
// ---------------------------------------------------------------------------

/// Counters describing one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassReport {
    /// Size of the fetched live set, banned sessions included.
    pub live: usize,
    /// Cache size when the pass finished.
    pub rendered: usize,
    pub created: usize,
    pub updated: usize,
    /// Messages deleted for ended or hard-banned sessions.
    pub deleted: usize,
    /// Sessions newly soft-banned this pass.
    pub soft_banned: usize,
    /// Live sessions excluded by the hard-ban list.
    pub hard_banned: usize,
    pub recovery: RecoverySummary,
    /// Store or render operations that failed without aborting the pass.
    pub failures: usize,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine<P, S> {
    provider: P,
    store: S,
    renderer: Arc<Renderer>,
    config: EngineConfig,
    state: EngineState,
}

impl<P, S> Engine<P, S>
where
    P: LiveSetProvider,
    S: MessageStore,
{
    /// An engine with an empty cache. Call [`Engine::start`] before the first tick.
    pub fn new(provider: P, store: S, renderer: Arc<Renderer>, config: EngineConfig) -> Self {
        Engine {
            provider,
            store,
            renderer,
            config,
            state: EngineState::default(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }

    /// Rebuild the render cache from the channel against the current live set.
    pub async fn start(&mut self) -> Result<RecoverySummary, SyncError> {
        let live = plan::dedup_live(self.provider.fetch_live(&self.config.filter).await?);
        let active = plan::partition(&live, &self.config.hard_bans).active_owned();
        let outcome = recovery::recover(&self.store, &active, self.config.history_limit).await?;
        let summary = outcome.summary();

        self.state.cache = outcome.cache;
        self.state.last_live = live;
        info!(
            bound = summary.bound,
            deleted = summary.deleted,
            failed = summary.failed,
            "engine started",
        );
        Ok(summary)
    }

    /// Run one reconciliation pass.
    ///
    /// A failed live-set fetch or channel snapshot aborts the pass before any
    /// state changes. Individual send, edit and delete failures are logged,
    /// counted in [`PassReport::failures`] and do not abort it.
    pub async fn tick(&mut self) -> Result<PassReport, SyncError> {
        let started = Instant::now();
        let now = Utc::now();

        let live = plan::dedup_live(self.provider.fetch_live(&self.config.filter).await?);
        let partition = plan::partition(&live, &self.config.hard_bans);

        let rendered: HashSet<MessageId> = self
            .store
            .list_recent(self.config.history_limit)
            .await?
            .into_iter()
            .filter(|m| m.from_self)
            .map(|m| m.id)
            .collect();

        let mut report = PassReport {
            live: live.len(),
            hard_banned: partition.hard_banned.len(),
            ..Default::default()
        };

        let mut deletes: Vec<(StreamId, MessageId)> = Vec::new();
        for removal in plan::removals(&self.state.cache, &live, &partition, &rendered) {
            self.state.cache.remove(removal.stream());
            match removal {
                Removal::Ended {
                    stream,
                    message,
                    rendered: true,
                } => {
                    if self.state.soft_bans.remove(&stream) {
                        debug!(stream = %stream, "soft-ban lifted, session ended");
                    }
                    deletes.push((stream, message));
                }
                Removal::Ended {
                    stream,
                    rendered: false,
                    ..
                }
                | Removal::Moderated { stream, .. } => {
                    if self.state.soft_bans.insert(stream.clone()) {
                        info!(stream = %stream, "announcement removed externally, soft-banning session");
                        report.soft_banned += 1;
                    }
                }
                Removal::HardBanned { stream, message } => {
                    info!(stream = %stream, "owner is banned, removing announcement");
                    deletes.push((stream, message));
                }
            }
        }
        self.delete_messages(&deletes, &mut report).await;

        let active = partition.active_owned();
        let outcome = recovery::recover(&self.store, &active, self.config.history_limit).await?;
        report.recovery = outcome.summary();
        report.failures += outcome.failed;
        self.state.cache = outcome.cache;

        let to_render = plan::to_render(&partition, &self.state.soft_bans, &self.config.hard_bans);
        let actions = plan::render_actions(&to_render, &self.state.cache);
        let cache_buster = u64::try_from(now.timestamp_millis()).unwrap_or_default();

        for action in actions {
            self.apply(action, cache_buster, now, &mut report).await;
        }

        {
            let live_ids: HashSet<&StreamId> = live.iter().map(|e| &e.id).collect();
            for pruned in self
                .state
                .soft_bans
                .age(&live_ids, self.config.soft_ban_grace_passes)
            {
                debug!(stream = %pruned, "soft-ban expired");
            }
        }
        self.state.last_live = live;

        report.rendered = self.state.cache.len();
        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            live = report.live,
            rendered = report.rendered,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            soft_banned = report.soft_banned,
            failures = report.failures,
            duration_ms = report.duration_ms,
            "reconciliation pass complete",
        );
        Ok(report)
    }

    /// Resolve a broadcaster login or numeric id to an owner id.
    ///
    /// Numeric input is returned unchanged. Otherwise the last fetched live
    /// set is searched case-insensitively before asking the provider.
    pub async fn resolve_owner_id(&self, name: &str) -> Result<OwnerId, SyncError> {
        let name = name.trim();
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            return Ok(OwnerId::from(name));
        }

        let wanted = name.to_lowercase();
        if let Some(entity) = self
            .state
            .last_live
            .iter()
            .find(|e| e.owner_name.to_lowercase() == wanted)
        {
            return Ok(entity.owner_id.clone());
        }

        Ok(self.provider.lookup_owner_id(name).await?)
    }

    async fn apply(
        &mut self,
        action: RenderAction,
        cache_buster: u64,
        now: DateTime<Utc>,
        report: &mut PassReport,
    ) {
        let entity = match &action {
            RenderAction::Create(entity) | RenderAction::Update { entity, .. } => entity,
        };
        let message = match self.render(entity, cache_buster, now).await {
            Ok(message) => message,
            Err(err) => {
                warn!(stream = %entity.id, error = %err, "failed to render announcement");
                report.failures += 1;
                return;
            }
        };

        match action {
            RenderAction::Update { entity, message: id } => {
                match self.store.edit(&id, &message).await {
                    Ok(()) => report.updated += 1,
                    Err(err) => {
                        warn!(stream = %entity.id, message = %id, error = %err, "failed to edit announcement");
                        report.failures += 1;
                    }
                }
            }
            RenderAction::Create(entity) => match self.store.send(&message).await {
                Ok(sent) => {
                    debug!(stream = %entity.id, message = %sent.id, "announcement created");
                    self.state.cache.insert(entity.id, sent.id);
                    report.created += 1;
                }
                Err(err) => {
                    warn!(stream = %entity.id, error = %err, "failed to send announcement");
                    report.failures += 1;
                }
            },
        }
    }

    async fn render(
        &self,
        entity: &LiveEntity,
        cache_buster: u64,
        now: DateTime<Utc>,
    ) -> Result<OutgoingMessage, RenderError> {
        let icon = match self.provider.owner_icon_url(&entity.owner_id).await {
            Ok(icon) => icon,
            Err(err) => {
                warn!(owner = %entity.owner_id, error = %err, "owner icon lookup failed, rendering without icon");
                None
            }
        };
        let ctx = AnnouncementContext::from_entity(
            entity,
            icon,
            &self.config.mention_role_id,
            cache_buster,
            now,
        );
        self.renderer.announcement(&ctx)
    }

    /// Delete retired announcements concurrently. Failures are counted; the
    /// records are already out of the cache, so recovery removes leftovers.
    async fn delete_messages(&self, deletes: &[(StreamId, MessageId)], report: &mut PassReport) {
        let store = &self.store;
        let results = join_all(deletes.iter().map(|(stream, message)| async move {
            (stream, message, store.delete(message).await)
        }))
        .await;

        for (stream, message, result) in results {
            match result {
                Ok(()) => report.deleted += 1,
                Err(err) => {
                    warn!(stream = %stream, message = %message, error = %err, "failed to delete announcement");
                    report.failures += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::testkit::{live_entity, MemoryChannel, StaticProvider, StoreOp};

    fn config(bans: &[&str]) -> EngineConfig {
        EngineConfig {
            filter: LiveFilter {
                game_id: "12345".to_string(),
            },
            hard_bans: bans.iter().map(|b| OwnerId::from(*b)).collect(),
            mention_role_id: "999".to_string(),
            history_limit: 100,
            soft_ban_grace_passes: 2,
        }
    }

    fn engine(
        provider: &StaticProvider,
        channel: &MemoryChannel,
        bans: &[&str],
    ) -> Engine<StaticProvider, MemoryChannel> {
        let renderer = Arc::new(Renderer::new().expect("renderer"));
        Engine::new(provider.clone(), channel.clone(), renderer, config(bans))
    }

    fn cached(engine: &Engine<StaticProvider, MemoryChannel>, id: &str) -> Option<MessageId> {
        engine.state().cache.get(&StreamId::from(id)).cloned()
    }

    fn mutations(channel: &MemoryChannel) -> Vec<StoreOp> {
        channel
            .ops()
            .into_iter()
            .filter(|op| !matches!(op, StoreOp::List { .. } | StoreOp::Fetch(_)))
            .collect()
    }

    #[tokio::test]
    async fn sample_scenario_create_edit_delete() {
        let provider = StaticProvider::new();
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);

        let mut s1 = live_entity("s1", "o1", "alpha");
        provider.set_live(vec![s1.clone()]);
        let report = engine.tick().await.expect("first pass");
        assert_eq!(report.created, 1);
        let m1 = cached(&engine, "s1").expect("s1 rendered");
        assert_eq!(
            channel.get(&m1).and_then(|m| m.embeds[0].description.clone()).as_deref(),
            Some("10 viewers")
        );

        s1.viewer_count = 25;
        provider.set_live(vec![s1]);
        channel.clear_ops();
        let report = engine.tick().await.expect("second pass");
        assert_eq!(report.updated, 1);
        assert_eq!(mutations(&channel), vec![StoreOp::Edit(m1.clone())]);
        assert_eq!(
            channel.get(&m1).and_then(|m| m.embeds[0].description.clone()).as_deref(),
            Some("25 viewers")
        );

        provider.set_live(vec![]);
        let report = engine.tick().await.expect("third pass");
        assert_eq!(report.deleted, 1);
        assert!(!channel.contains(&m1));
        assert!(engine.state().cache.is_empty());
        assert!(engine.state().soft_bans.is_empty());
    }

    #[tokio::test]
    async fn unchanged_live_set_only_edits() {
        let provider = StaticProvider::with_live(vec![
            live_entity("s1", "o1", "alpha"),
            live_entity("s2", "o2", "bravo"),
        ]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);

        engine.tick().await.expect("first pass");
        channel.clear_ops();
        let report = engine.tick().await.expect("second pass");

        assert_eq!(report.created, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(report.updated, 2);
        assert!(mutations(&channel)
            .iter()
            .all(|op| matches!(op, StoreOp::Edit(_))));
    }

    #[tokio::test]
    async fn hard_banned_owner_is_never_rendered() {
        let provider = StaticProvider::with_live(vec![
            live_entity("s1", "o1", "alpha"),
            live_entity("s2", "banned", "bravo"),
        ]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &["banned"]);

        let report = engine.tick().await.expect("pass");
        assert_eq!(report.hard_banned, 1);
        assert_eq!(report.created, 1);
        assert!(cached(&engine, "s2").is_none());
        assert_eq!(channel.bot_message_count(), 1);
    }

    #[tokio::test]
    async fn ban_added_after_render_deletes_message() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("rendered");

        engine.config.hard_bans.insert(OwnerId::from("o1"));
        let report = engine.tick().await.expect("second pass");
        assert_eq!(report.deleted, 1);
        assert!(!channel.contains(&m1));
        assert!(engine.state().cache.is_empty());
    }

    #[tokio::test]
    async fn externally_deleted_message_is_not_recreated() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("rendered");

        assert!(channel.remove_externally(&m1));
        let report = engine.tick().await.expect("second pass");
        assert_eq!(report.soft_banned, 1);
        assert_eq!(report.created, 0);
        assert!(engine.state().soft_bans.contains(&StreamId::from("s1")));

        let report = engine.tick().await.expect("third pass");
        assert_eq!(report.created, 0);
        assert_eq!(channel.bot_message_count(), 0);
    }

    #[tokio::test]
    async fn new_session_by_soft_banned_owner_renders() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("rendered");
        channel.remove_externally(&m1);
        engine.tick().await.expect("soft-ban pass");

        provider.set_live(vec![live_entity("s9", "o1", "alpha")]);
        let report = engine.tick().await.expect("new session pass");
        assert_eq!(report.created, 1);
        assert!(cached(&engine, "s9").is_some());
    }

    #[tokio::test]
    async fn soft_ban_expires_after_grace_window() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("render");
        let m1 = cached(&engine, "s1").expect("rendered");
        channel.remove_externally(&m1);
        engine.tick().await.expect("soft-ban");

        provider.set_live(vec![]);
        engine.tick().await.expect("absent 1");
        engine.tick().await.expect("absent 2");
        assert!(engine.state().soft_bans.contains(&StreamId::from("s1")));
        engine.tick().await.expect("absent 3");
        assert!(engine.state().soft_bans.is_empty());
    }

    #[tokio::test]
    async fn flapping_session_stays_soft_banned() {
        let s1 = live_entity("s1", "o1", "alpha");
        let provider = StaticProvider::with_live(vec![s1.clone()]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("render");
        let m1 = cached(&engine, "s1").expect("rendered");
        channel.remove_externally(&m1);
        engine.tick().await.expect("soft-ban");

        provider.set_live(vec![]);
        engine.tick().await.expect("provider hiccup");
        provider.set_live(vec![s1]);
        let report = engine.tick().await.expect("back");
        assert_eq!(report.created, 0);
        assert_eq!(channel.bot_message_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_aborts_without_mutation() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let before = engine.state().records();

        provider.set_live(vec![]);
        provider.fail_next_fetch();
        channel.clear_ops();
        let err = engine.tick().await.unwrap_err();
        assert!(matches!(err, SyncError::Provider(ProviderError::Request(_))));
        assert!(channel.ops().is_empty());
        assert_eq!(engine.state().records(), before);
    }

    #[tokio::test]
    async fn snapshot_failure_aborts_without_mutation() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("rendered");

        provider.set_live(vec![]);
        channel.fail_next_list();
        assert!(matches!(engine.tick().await, Err(SyncError::Store(_))));
        assert!(channel.contains(&m1));
        assert_eq!(cached(&engine, "s1"), Some(m1));
    }

    #[tokio::test]
    async fn send_failure_is_counted_and_retried_next_pass() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);

        channel.fail_sends(true);
        let report = engine.tick().await.expect("pass completes");
        assert_eq!(report.failures, 1);
        assert!(engine.state().cache.is_empty());

        channel.fail_sends(false);
        let report = engine.tick().await.expect("retry");
        assert_eq!(report.created, 1);
    }

    #[tokio::test]
    async fn repeated_live_entry_is_announced_once() {
        let entity = live_entity("s1", "o1", "alpha");
        let provider = StaticProvider::with_live(vec![entity.clone(), entity]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);

        let report = engine.tick().await.expect("pass");

        assert_eq!(report.live, 1);
        assert_eq!(report.created, 1);
        assert_eq!(channel.bot_message_count(), 1);
        assert_eq!(engine.state().cache.len(), 1);
    }

    #[tokio::test]
    async fn edit_failure_is_counted_and_record_kept() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("rendered");

        channel.fail_edits(true);
        let report = engine.tick().await.expect("pass completes");
        assert_eq!(report.failures, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(cached(&engine, "s1"), Some(m1.clone()));

        channel.fail_edits(false);
        let report = engine.tick().await.expect("next pass");
        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(cached(&engine, "s1"), Some(m1));
    }

    #[tokio::test]
    async fn failed_delete_of_ended_session_is_swept_by_recovery() {
        let provider = StaticProvider::with_live(vec![
            live_entity("s1", "o1", "alpha"),
            live_entity("s2", "o2", "bravo"),
        ]);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("first pass");
        let m1 = cached(&engine, "s1").expect("s1 rendered");
        let m2 = cached(&engine, "s2").expect("s2 rendered");

        provider.set_live(vec![]);
        channel.fail_delete_of(m1.clone());
        let report = engine.tick().await.expect("pass completes");

        assert_eq!(report.deleted, 1);
        // The ended-session delete and the recovery sweep both fail for m1.
        assert_eq!(report.failures, 2);
        assert_eq!(report.recovery.failed, 1);
        assert!(engine.state().cache.is_empty());
        assert!(engine.state().soft_bans.is_empty());
        assert!(channel.contains(&m1));
        assert!(!channel.contains(&m2));

        channel.allow_delete_of(&m1);
        let report = engine.tick().await.expect("next pass");
        assert_eq!(report.recovery.deleted, 1);
        assert_eq!(report.failures, 0);
        assert!(!channel.contains(&m1));
    }

    #[tokio::test]
    async fn icon_lookup_failure_renders_without_icon() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        provider.set_icon("o1", "https://cdn.example/o1.png");
        provider.fail_icon_lookups(true);
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);

        let report = engine.tick().await.expect("pass");
        assert_eq!(report.created, 1);
        let m1 = cached(&engine, "s1").expect("rendered");
        let author = channel.get(&m1).and_then(|m| m.embeds[0].author.clone());
        assert_eq!(author.and_then(|a| a.icon_url), None);
    }

    #[tokio::test]
    async fn start_adopts_existing_announcements() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "alpha")]);
        let channel = MemoryChannel::new();
        let existing = channel.push_announcement("alpha");
        channel.push_announcement("offline-now");
        let mut engine = engine(&provider, &channel, &[]);

        let summary = engine.start().await.expect("start");
        assert_eq!(summary.bound, 1);
        assert_eq!(summary.deleted, 1);
        assert_eq!(cached(&engine, "s1"), Some(existing.clone()));

        channel.clear_ops();
        let report = engine.tick().await.expect("pass");
        assert_eq!(report.created, 0);
        assert_eq!(mutations(&channel), vec![StoreOp::Edit(existing)]);
    }

    #[tokio::test]
    async fn resolve_prefers_numeric_then_live_set_then_provider() {
        let provider = StaticProvider::with_live(vec![live_entity("s1", "o1", "Alpha")]);
        provider.register_user("zulu", "26");
        let channel = MemoryChannel::new();
        let mut engine = engine(&provider, &channel, &[]);
        engine.tick().await.expect("pass");

        assert_eq!(engine.resolve_owner_id("4242").await.expect("numeric"), OwnerId::from("4242"));
        assert_eq!(engine.resolve_owner_id("alpha").await.expect("live"), OwnerId::from("o1"));
        assert_eq!(provider.lookup_count(), 0);
        assert_eq!(engine.resolve_owner_id("zulu").await.expect("lookup"), OwnerId::from("26"));

        let err = engine.resolve_owner_id("nobody").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
