//! Subscription state and its persistence boundary.
//!
//! The [`SubscriptionStore`] is the single source of truth for
//! subscriptions, channel memberships, and dedup checkpoints; every
//! mutation funnels through it. A feed followed by several channels is one
//! shared subscription: channels hold ids into an indirection table, never
//! copies, so the feed is fetched once for all of them.
//!
//! Persistence is a key-value JSON document behind the [`StateStore`]
//! trait: loaded once at startup, saved after every mutating operation.
//! Save failures are logged rather than propagated — the in-memory state
//! stays authoritative, and a crash before the next successful save costs
//! at most one cycle of redundant re-delivery, never lost dedup state.

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::FALLBACK_CRON;
use crate::dedup::DedupCheckpoint;
use crate::schedule::CronExpr;

/// Opaque subscription identifier, process-local.
pub type SubId = u64;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Index out of range for that channel, or the subscription vanished.
    #[error("no such subscription for this channel")]
    NotFound,
    /// The channel already subscribes to this feed URL.
    #[error("channel already subscribes to this feed")]
    Duplicate,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("state document malformed: {0}")]
    Serde(#[from] serde_json::Error),
}

// ============================================================================
// Persistence boundary
// ============================================================================

/// On-disk document shape: feeds keyed by URL, channel membership lists
/// keyed by channel identifier holding URLs in list order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub feeds: BTreeMap<String, PersistedFeed>,
    #[serde(default)]
    pub channels: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedFeed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub cron_expr: String,
    /// Seen-id ledger, oldest-inserted first.
    #[serde(default)]
    pub recent_ids: Vec<String>,
}

/// Key-value persistence collaborator for the subscription document.
pub trait StateStore: Send + Sync {
    fn load(&self) -> Result<PersistedState, PersistError>;
    fn save(&self, state: &PersistedState) -> Result<(), PersistError>;
}

impl<T: StateStore + ?Sized> StateStore for Arc<T> {
    fn load(&self) -> Result<PersistedState, PersistError> {
        (**self).load()
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        (**self).save(state)
    }
}

/// JSON file persistence with atomic replace (write temp, sync, rename).
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<PersistedState, PersistError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file, starting empty");
                return Ok(PersistedState::default());
            }
            Err(e) => return Err(e.into()),
        };

        // An unreadable document starts the process empty instead of
        // refusing to run; the broken file is replaced on the next save.
        match serde_json::from_str(&content) {
            Ok(state) => Ok(state),
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "State file unreadable, starting empty"
                );
                Ok(PersistedState::default())
            }
        }
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&json)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory persistence, for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<PersistedState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current saved document, for assertions.
    pub fn snapshot(&self) -> PersistedState {
        self.inner.lock().expect("state lock poisoned").clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<PersistedState, PersistError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<(), PersistError> {
        *self.inner.lock().expect("state lock poisoned") = state.clone();
        Ok(())
    }
}

// ============================================================================
// In-memory model
// ============================================================================

/// Feed-level metadata cached from the last successful fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedMeta {
    pub title: Option<String>,
    pub description: Option<String>,
}

/// One channel-visible subscription row.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub index: usize,
    pub id: SubId,
    pub url: String,
    pub title: Option<String>,
    pub cron_expr: String,
}

/// Everything a fetch cycle needs to read up front.
#[derive(Debug, Clone)]
pub struct CycleView {
    pub url: String,
    pub title: Option<String>,
    pub checkpoint: DedupCheckpoint,
}

/// Result of removing a channel membership.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedSubscription {
    pub id: SubId,
    pub url: String,
    /// True when no channel references the subscription any longer and it
    /// was discarded together with its checkpoint.
    pub destroyed: bool,
}

struct SubEntry {
    url: String,
    meta: FeedMeta,
    cron: CronExpr,
    checkpoint: DedupCheckpoint,
    /// Per-subscription execution slot: scheduled cycles and manual `get`
    /// fetches both take this lock, so work for one subscription is
    /// strictly serialized while unrelated subscriptions stay concurrent.
    flight: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Default)]
struct State {
    subs: HashMap<SubId, SubEntry>,
    by_url: HashMap<String, SubId>,
    channels: BTreeMap<String, Vec<SubId>>,
    next_id: SubId,
}

impl State {
    fn insert_sub(&mut self, url: String, meta: FeedMeta, cron: CronExpr, checkpoint: DedupCheckpoint) -> SubId {
        let id = self.next_id;
        self.next_id += 1;
        self.by_url.insert(url.clone(), id);
        self.subs.insert(
            id,
            SubEntry {
                url,
                meta,
                cron,
                checkpoint,
                flight: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        id
    }

    fn index_of(&self, channel: &str, id: SubId) -> Option<usize> {
        self.channels.get(channel)?.iter().position(|&s| s == id)
    }

    fn to_persisted(&self) -> PersistedState {
        let mut feeds = BTreeMap::new();
        for entry in self.subs.values() {
            feeds.insert(
                entry.url.clone(),
                PersistedFeed {
                    title: entry.meta.title.clone(),
                    description: entry.meta.description.clone(),
                    cron_expr: entry.cron.as_str().to_string(),
                    recent_ids: entry.checkpoint.ids().map(String::from).collect(),
                },
            );
        }

        let channels = self
            .channels
            .iter()
            .map(|(channel, ids)| {
                let urls = ids
                    .iter()
                    .filter_map(|id| self.subs.get(id).map(|e| e.url.clone()))
                    .collect();
                (channel.clone(), urls)
            })
            .collect();

        PersistedState { feeds, channels }
    }
}

// ============================================================================
// SubscriptionStore
// ============================================================================

/// Authoritative subscription state. All mutation goes through here; every
/// mutating operation saves the document through the persistence
/// collaborator before returning.
pub struct SubscriptionStore {
    state: RwLock<State>,
    persist: Box<dyn StateStore>,
}

impl SubscriptionStore {
    /// Loads persisted state through the given collaborator.
    ///
    /// Tolerant by design: feeds with an invalid persisted cron fall back
    /// to [`FALLBACK_CRON`] with a warning, and channel lists referencing
    /// unknown URLs are dropped. Feeds no channel references are not
    /// resurrected.
    pub fn open(persist: Box<dyn StateStore>) -> Result<Self, PersistError> {
        let doc = persist.load()?;
        let mut state = State::default();

        for (channel, urls) in &doc.channels {
            for url in urls {
                let Some(feed) = doc.feeds.get(url) else {
                    tracing::warn!(channel = %channel, url = %url, "Dropping unknown feed URL from channel list");
                    continue;
                };

                let id = match state.by_url.get(url).copied() {
                    Some(id) => id,
                    None => {
                        let cron = CronExpr::parse(&feed.cron_expr).unwrap_or_else(|e| {
                            tracing::warn!(
                                url = %url,
                                expr = %feed.cron_expr,
                                error = %e,
                                "Persisted cron invalid, using fallback"
                            );
                            CronExpr::parse(FALLBACK_CRON).expect("fallback cron is valid")
                        });
                        state.insert_sub(
                            url.clone(),
                            FeedMeta {
                                title: feed.title.clone(),
                                description: feed.description.clone(),
                            },
                            cron,
                            DedupCheckpoint::from_ids(feed.recent_ids.iter().cloned()),
                        )
                    }
                };

                let members = state.channels.entry(channel.clone()).or_default();
                if !members.contains(&id) {
                    members.push(id);
                }
            }
        }

        tracing::info!(
            subscriptions = state.subs.len(),
            channels = state.channels.len(),
            "Subscription store loaded"
        );
        Ok(Self {
            state: RwLock::new(state),
            persist,
        })
    }

    fn save(&self, state: &State) {
        if let Err(e) = self.persist.save(&state.to_persisted()) {
            tracing::warn!(error = %e, "Failed to persist subscription state");
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Binds `channel` to an already-tracked feed URL, reusing the shared
    /// subscription and its checkpoint (no re-fetch, no re-baseline).
    ///
    /// `explicit_cron` rebinds the shared per-feed schedule (last writer
    /// wins for all subscribing channels); `None` keeps the existing one.
    ///
    /// Returns `Ok(None)` when the URL is not tracked yet — the caller
    /// must perform the seeding fetch and call [`Self::create`].
    pub fn bind_existing(
        &self,
        channel: &str,
        url: &str,
        explicit_cron: Option<&CronExpr>,
    ) -> Result<Option<(SubId, usize)>, StoreError> {
        let mut state = self.state.write().expect("store lock poisoned");

        let Some(id) = state.by_url.get(url).copied() else {
            return Ok(None);
        };
        if state.index_of(channel, id).is_some() {
            return Err(StoreError::Duplicate);
        }

        if let Some(cron) = explicit_cron {
            if let Some(entry) = state.subs.get_mut(&id) {
                entry.cron = cron.clone();
            }
        }

        let members = state.channels.entry(channel.to_string()).or_default();
        members.push(id);
        let index = members.len() - 1;

        self.save(&state);
        Ok(Some((id, index)))
    }

    /// Creates a fresh subscription from a completed seeding fetch and
    /// binds `channel` to it.
    ///
    /// If the URL appeared concurrently, joins the existing subscription
    /// instead and discards the redundant seed.
    pub fn create(
        &self,
        channel: &str,
        url: &str,
        meta: FeedMeta,
        cron: CronExpr,
        checkpoint: DedupCheckpoint,
    ) -> Result<(SubId, usize), StoreError> {
        let mut state = self.state.write().expect("store lock poisoned");

        let id = match state.by_url.get(url).copied() {
            Some(existing) => {
                if state.index_of(channel, existing).is_some() {
                    return Err(StoreError::Duplicate);
                }
                existing
            }
            None => state.insert_sub(url.to_string(), meta, cron, checkpoint),
        };

        let members = state.channels.entry(channel.to_string()).or_default();
        members.push(id);
        let index = members.len() - 1;

        self.save(&state);
        Ok((id, index))
    }

    /// Removes the channel's membership at `index`. The subscription and
    /// its checkpoint are discarded only when no channel references it any
    /// longer.
    pub fn remove(&self, channel: &str, index: usize) -> Result<RemovedSubscription, StoreError> {
        let mut state = self.state.write().expect("store lock poisoned");

        let members = state.channels.get_mut(channel).ok_or(StoreError::NotFound)?;
        if index >= members.len() {
            return Err(StoreError::NotFound);
        }
        let id = members.remove(index);
        if members.is_empty() {
            state.channels.remove(channel);
        }

        let referenced = state.channels.values().any(|ids| ids.contains(&id));
        let url = state
            .subs
            .get(&id)
            .map(|e| e.url.clone())
            .unwrap_or_default();
        if !referenced {
            if let Some(entry) = state.subs.remove(&id) {
                state.by_url.remove(&entry.url);
            }
        }

        self.save(&state);
        Ok(RemovedSubscription {
            id,
            url,
            destroyed: !referenced,
        })
    }

    /// Rebinds the shared cron of the subscription at the channel's
    /// `index`. Affects delivery timing for every subscribing channel.
    pub fn change_cron(
        &self,
        channel: &str,
        index: usize,
        cron: CronExpr,
    ) -> Result<SubId, StoreError> {
        let mut state = self.state.write().expect("store lock poisoned");

        let id = *state
            .channels
            .get(channel)
            .and_then(|members| members.get(index))
            .ok_or(StoreError::NotFound)?;
        let entry = state.subs.get_mut(&id).ok_or(StoreError::NotFound)?;
        entry.cron = cron;

        self.save(&state);
        Ok(id)
    }

    /// Commits a completed fetch cycle: refreshed metadata plus the
    /// updated checkpoint. A vanished subscription is a no-op.
    pub fn commit_cycle(&self, id: SubId, meta: FeedMeta, checkpoint: DedupCheckpoint) {
        let mut state = self.state.write().expect("store lock poisoned");
        let Some(entry) = state.subs.get_mut(&id) else {
            return;
        };

        if meta.title.is_some() {
            entry.meta.title = meta.title;
        }
        if meta.description.is_some() {
            entry.meta.description = meta.description;
        }
        entry.checkpoint = checkpoint;

        self.save(&state);
    }

    /// Refreshes cached feed metadata without touching the checkpoint
    /// (the manual `get` path).
    pub fn update_meta(&self, id: SubId, meta: FeedMeta) {
        let mut state = self.state.write().expect("store lock poisoned");
        let Some(entry) = state.subs.get_mut(&id) else {
            return;
        };

        let mut changed = false;
        if meta.title.is_some() && meta.title != entry.meta.title {
            entry.meta.title = meta.title;
            changed = true;
        }
        if meta.description.is_some() && meta.description != entry.meta.description {
            entry.meta.description = meta.description;
            changed = true;
        }
        if changed {
            self.save(&state);
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn channel_has_url(&self, channel: &str, url: &str) -> bool {
        let state = self.state.read().expect("store lock poisoned");
        let Some(&id) = state.by_url.get(url) else {
            return false;
        };
        state.index_of(channel, id).is_some()
    }

    /// Ordered subscription rows for a channel; the position is the stable
    /// `list-index` used by commands.
    pub fn list(&self, channel: &str) -> Vec<SubscriptionInfo> {
        let state = self.state.read().expect("store lock poisoned");
        let Some(members) = state.channels.get(channel) else {
            return Vec::new();
        };

        members
            .iter()
            .enumerate()
            .filter_map(|(index, id)| {
                state.subs.get(id).map(|entry| SubscriptionInfo {
                    index,
                    id: *id,
                    url: entry.url.clone(),
                    title: entry.meta.title.clone(),
                    cron_expr: entry.cron.as_str().to_string(),
                })
            })
            .collect()
    }

    pub fn resolve(&self, channel: &str, index: usize) -> Result<SubscriptionInfo, StoreError> {
        self.list(channel)
            .into_iter()
            .find(|info| info.index == index)
            .ok_or(StoreError::NotFound)
    }

    pub fn cron_of(&self, id: SubId) -> Option<CronExpr> {
        let state = self.state.read().expect("store lock poisoned");
        state.subs.get(&id).map(|e| e.cron.clone())
    }

    /// The per-subscription execution slot (see [`SubEntry::flight`]).
    pub fn flight_slot(&self, id: SubId) -> Option<Arc<tokio::sync::Mutex<()>>> {
        let state = self.state.read().expect("store lock poisoned");
        state.subs.get(&id).map(|e| Arc::clone(&e.flight))
    }

    /// Snapshot for a fetch cycle. Read *after* acquiring the flight slot
    /// so the checkpoint reflects any cycle that just completed.
    pub fn cycle_view(&self, id: SubId) -> Option<CycleView> {
        let state = self.state.read().expect("store lock poisoned");
        state.subs.get(&id).map(|e| CycleView {
            url: e.url.clone(),
            title: e.meta.title.clone(),
            checkpoint: e.checkpoint.clone(),
        })
    }

    /// Channels currently subscribed to this feed, in stable order.
    pub fn channels_of(&self, id: SubId) -> Vec<String> {
        let state = self.state.read().expect("store lock poisoned");
        state
            .channels
            .iter()
            .filter(|(_, ids)| ids.contains(&id))
            .map(|(channel, _)| channel.clone())
            .collect()
    }

    pub fn subscription_ids(&self) -> Vec<SubId> {
        let state = self.state.read().expect("store lock poisoned");
        state.subs.keys().copied().collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
