//! The command surface and the fetch-parse-dedup-deliver pipeline.
//!
//! [`Engine`] is what the host dispatcher talks to: `add`, `list`,
//! `remove`, `change`, `get` as typed operations, plus [`Engine::run_cycle`]
//! which the scheduler invokes per subscription at its cron fire times.
//!
//! Concurrency model: work for different subscriptions runs concurrently;
//! work for the same subscription is serialized through the store's
//! per-subscription flight slot, which scheduled cycles and manual `get`
//! fetches share. Checkpoints are committed strictly after delivery
//! accounting, so a crash mid-cycle re-delivers rather than silently drops.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::config::Config;
use crate::dedup::{self, DedupCheckpoint};
use crate::dispatch::Dispatcher;
use crate::feed::{parse_feed, FeedFetcher, FeedItem, FetchError, ParseError, ParsedFeed};
use crate::schedule::{CronError, CronExpr, Scheduler};
use crate::store::{FeedMeta, StoreError, SubId, SubscriptionInfo, SubscriptionStore};
use crate::util::normalize_url;

/// Concurrent feed fetches during a `get all` request.
const GET_CONCURRENCY: usize = 4;

// ============================================================================
// Error Types
// ============================================================================

/// Failures of the synchronous, user-initiated `add` operation. Atomic
/// create-or-fail: any of these leaves no partial subscription behind.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("invalid feed URL: must be an http/https link")]
    InvalidUrl,
    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),
    #[error("channel already subscribes to this feed")]
    AlreadySubscribed,
    #[error("could not fetch feed: {0}")]
    FetchFailed(#[from] FetchError),
    #[error("could not parse feed: {0}")]
    ParseFailed(#[from] ParseError),
}

/// Failures of `remove`/`change`/`get`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no subscription at that index for this channel")]
    NotFound,
    #[error("invalid cron expression: {0}")]
    InvalidCron(#[from] CronError),
}

impl From<StoreError> for CommandError {
    fn from(_: StoreError) -> Self {
        CommandError::NotFound
    }
}

/// A fetch-parse failure within one cycle or one `get` poll.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Failure of one scheduled cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("subscription no longer exists")]
    Gone,
    #[error(transparent)]
    Poll(#[from] PollError),
}

// ============================================================================
// Outcomes
// ============================================================================

/// Successful `add`.
#[derive(Debug, Clone, PartialEq)]
pub struct AddOutcome {
    pub id: SubId,
    pub index: usize,
    pub url: String,
    pub title: Option<String>,
    pub cron_expr: String,
    /// True when the URL was already tracked and the existing subscription
    /// (and checkpoint) was reused without a fetch.
    pub reused: bool,
}

/// Successful scheduled cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleOutcome {
    /// New items delivered this cycle (possibly zero).
    pub delivered: usize,
    /// Channels each batch was sent to.
    pub channels: usize,
}

/// Target selector for `get`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GetTarget {
    All,
    Index(usize),
}

/// Per-feed result of a `get` request; an "all" request reports partial
/// success per feed instead of aborting the batch.
#[derive(Debug)]
pub struct GetResult {
    pub info: SubscriptionInfo,
    pub items: Result<Vec<FeedItem>, PollError>,
}

// ============================================================================
// Engine
// ============================================================================

pub struct Engine {
    config: Config,
    store: Arc<SubscriptionStore>,
    fetcher: FeedFetcher,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
}

impl Engine {
    pub fn new(
        config: Config,
        store: Arc<SubscriptionStore>,
        dispatcher: Dispatcher,
    ) -> Result<Arc<Self>, FetchError> {
        let fetcher = FeedFetcher::new(&config.user_agent, config.fetch_timeout_secs)?;
        Ok(Arc::new(Self {
            config,
            store,
            fetcher,
            scheduler: Scheduler::new(),
            dispatcher,
        }))
    }

    pub fn store(&self) -> &Arc<SubscriptionStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Starts a scheduler worker for every loaded subscription.
    pub fn start(self: &Arc<Self>) {
        self.scheduler.rebuild(self);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Subscribes `channel` to a feed URL.
    ///
    /// A URL already tracked for another channel reuses the shared
    /// subscription and checkpoint with no fetch and no re-baseline. A new
    /// URL is fetched and parsed synchronously so the caller learns the
    /// outcome immediately; the seeding baseline records the
    /// `init_fetch_count` most recent items without delivering them.
    pub async fn add(
        self: &Arc<Self>,
        channel: &str,
        url_raw: &str,
        cron_expr: Option<&str>,
    ) -> Result<AddOutcome, SubscribeError> {
        let url = normalize_url(url_raw).ok_or(SubscribeError::InvalidUrl)?;
        let explicit_cron = cron_expr.map(CronExpr::parse).transpose()?;
        let cron = match &explicit_cron {
            Some(cron) => cron.clone(),
            // Validated at config load, parse cannot fail here
            None => CronExpr::parse(&self.config.default_cron_exp)?,
        };

        match self
            .store
            .bind_existing(channel, &url, explicit_cron.as_ref())
        {
            Ok(Some((id, index))) => {
                if explicit_cron.is_some() {
                    self.scheduler.reschedule(self, id);
                }
                let info = self.store.resolve(channel, index).ok();
                // The shared subscription keeps its own schedule unless the
                // caller supplied one, so report what is actually in effect.
                let cron_expr = info
                    .as_ref()
                    .map(|i| i.cron_expr.clone())
                    .unwrap_or_else(|| cron.as_str().to_string());
                tracing::info!(channel = %channel, url = %url, id, "Joined existing subscription");
                return Ok(AddOutcome {
                    id,
                    index,
                    url,
                    title: info.and_then(|i| i.title),
                    cron_expr,
                    reused: true,
                });
            }
            Ok(None) => {}
            Err(StoreError::Duplicate) => return Err(SubscribeError::AlreadySubscribed),
            Err(StoreError::NotFound) => return Err(SubscribeError::AlreadySubscribed),
        }

        // Seeding fetch, synchronous and atomic: any failure here leaves
        // nothing behind.
        let bytes = self.fetcher.fetch(&url).await?;
        let parsed = parse_feed(&bytes)?;
        let checkpoint = DedupCheckpoint::seed(&parsed.items, self.config.init_fetch_count);

        let (id, index) = self
            .store
            .create(
                channel,
                &url,
                FeedMeta {
                    title: parsed.title.clone(),
                    description: parsed.description.clone(),
                },
                cron.clone(),
                checkpoint,
            )
            .map_err(|_| SubscribeError::AlreadySubscribed)?;

        self.scheduler.reschedule(self, id);
        tracing::info!(
            channel = %channel,
            url = %url,
            id,
            seeded = self.config.init_fetch_count.min(parsed.items.len()),
            "Created subscription"
        );

        Ok(AddOutcome {
            id,
            index,
            url,
            title: parsed.title,
            cron_expr: cron.as_str().to_string(),
            reused: false,
        })
    }

    /// Ordered `(index, title, url, cron)` rows for a channel.
    pub fn list(&self, channel: &str) -> Vec<SubscriptionInfo> {
        self.store.list(channel)
    }

    /// Drops the channel's membership at `index`; the subscription itself
    /// is destroyed only when no channel references it any longer.
    pub fn remove(&self, channel: &str, index: usize) -> Result<(), CommandError> {
        let removed = self.store.remove(channel, index)?;
        if removed.destroyed {
            self.scheduler.remove(removed.id);
            tracing::info!(url = %removed.url, id = removed.id, "Subscription destroyed");
        }
        Ok(())
    }

    /// Rebinds the subscription's cron expression (or resets it to the
    /// configured default when omitted). The schedule is shared per feed:
    /// this changes delivery timing for every subscribing channel.
    pub fn change(
        self: &Arc<Self>,
        channel: &str,
        index: usize,
        cron_expr: Option<&str>,
    ) -> Result<String, CommandError> {
        let cron = CronExpr::parse(cron_expr.unwrap_or(&self.config.default_cron_exp))?;
        let id = self.store.change_cron(channel, index, cron.clone())?;
        self.scheduler.reschedule(self, id);
        tracing::info!(channel = %channel, id, expr = %cron, "Cron changed");
        Ok(cron.as_str().to_string())
    }

    /// Fetches up to `count` most recent items on demand.
    ///
    /// A pure read: the dedup checkpoint is neither consulted nor mutated,
    /// unlike scheduled delivery. Each feed's fetch still takes the shared
    /// flight slot so it never races a scheduled cycle for the same
    /// subscription. For [`GetTarget::All`], failures are reported per
    /// feed without aborting the batch.
    pub async fn get(
        &self,
        channel: &str,
        target: GetTarget,
        count: usize,
    ) -> Result<Vec<GetResult>, CommandError> {
        let selected = match target {
            GetTarget::All => self.store.list(channel),
            GetTarget::Index(index) => vec![self.store.resolve(channel, index)?],
        };

        let results = stream::iter(selected)
            .map(|info| async move {
                let items = self.poll_latest(&info, count).await;
                GetResult { info, items }
            })
            .buffered(GET_CONCURRENCY)
            .collect()
            .await;

        Ok(results)
    }

    async fn poll_latest(
        &self,
        info: &SubscriptionInfo,
        count: usize,
    ) -> Result<Vec<FeedItem>, PollError> {
        match self.store.flight_slot(info.id) {
            Some(flight) => {
                let _guard = flight.lock().await;
                self.fetch_latest(info, count).await
            }
            None => self.fetch_latest(info, count).await,
        }
    }

    async fn fetch_latest(
        &self,
        info: &SubscriptionInfo,
        count: usize,
    ) -> Result<Vec<FeedItem>, PollError> {
        let bytes = self.fetcher.fetch(&info.url).await?;
        let parsed = parse_feed(&bytes)?;
        self.note_skipped(&info.url, &parsed);

        self.store.update_meta(
            info.id,
            FeedMeta {
                title: parsed.title,
                description: parsed.description,
            },
        );

        let mut items = parsed.items;
        items.truncate(count);
        Ok(items)
    }

    // ------------------------------------------------------------------
    // Scheduled pipeline
    // ------------------------------------------------------------------

    /// Runs one fetch cycle for a subscription: fetch → parse → dedup diff
    /// → deliver to every subscribing channel → commit checkpoint.
    ///
    /// Serialized per subscription through the flight slot. The checkpoint
    /// is committed only after delivery has been handed to the dispatcher;
    /// on any failure it is left untouched and the next attempt is the
    /// subscription's next cron tick.
    pub async fn run_cycle(&self, id: SubId) -> Result<CycleOutcome, CycleError> {
        let flight = self.store.flight_slot(id).ok_or(CycleError::Gone)?;
        let _guard = flight.lock().await;

        // Snapshot after acquiring the slot so the checkpoint reflects any
        // cycle that just finished.
        let view = self.store.cycle_view(id).ok_or(CycleError::Gone)?;

        let bytes = self.fetcher.fetch(&view.url).await.map_err(PollError::from)?;
        let parsed = parse_feed(&bytes).map_err(PollError::from)?;
        self.note_skipped(&view.url, &parsed);

        let mut items = parsed.items;
        items.truncate(self.config.poll_fetch_count);
        let outcome = dedup::diff(&view.checkpoint, &items);

        let channels = self.store.channels_of(id);
        let delivered = outcome.fresh.len();

        if delivered > 0 {
            let feed_title = parsed
                .title
                .clone()
                .or(view.title)
                .unwrap_or_else(|| view.url.clone());
            for channel in &channels {
                self.dispatcher
                    .dispatch(channel, &feed_title, outcome.fresh.clone())
                    .await;
            }
        }

        self.store.commit_cycle(
            id,
            FeedMeta {
                title: parsed.title,
                description: parsed.description,
            },
            outcome.checkpoint,
        );

        Ok(CycleOutcome {
            delivered,
            channels: channels.len(),
        })
    }

    fn note_skipped(&self, url: &str, parsed: &ParsedFeed) {
        if parsed.skipped > 0 {
            tracing::warn!(
                url = %url,
                skipped = parsed.skipped,
                "Entries without derivable identity skipped"
            );
        }
    }
}
