//! Channel-scoped RSS/Atom feed-polling engine.
//!
//! `feedrelay` tracks feed subscriptions per opaque channel identifier,
//! fetches each subscribed feed on its own cron schedule, diffs fetched
//! entries against a bounded dedup checkpoint, and emits only genuinely new
//! entries for delivery.
//!
//! # Architecture
//!
//! - [`feed`] — fetching raw bytes over HTTP and parsing RSS 2.0 / Atom
//!   documents into normalized items
//! - [`dedup`] — the seen-id ledger that decides which items are new
//! - [`schedule`] — cron expression evaluation and the per-subscription
//!   worker tasks that drive fetch cycles
//! - [`store`] — the authoritative subscription/channel state and its
//!   persistence boundary
//! - [`engine`] — the command surface (`add`/`list`/`remove`/`change`/`get`)
//!   and the fetch-parse-dedup-deliver pipeline
//! - [`dispatch`] — delivery batches handed to the host messaging boundary
//!
//! A fetch cycle flows: scheduler fires → fetcher retrieves → parser
//! normalizes → dedup diffs against the store's checkpoint → the store
//! persists the updated checkpoint → the dispatcher pushes new items to
//! every channel subscribed to that feed.

pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod engine;
pub mod feed;
pub mod schedule;
pub mod store;
pub mod util;

pub use config::Config;
pub use dispatch::{DeliveryBatch, Dispatcher};
pub use engine::Engine;
pub use feed::{FeedFetcher, FeedItem, FetchError, ParseError, ParsedFeed};
pub use schedule::{CronError, CronExpr, Scheduler};
pub use store::{JsonFileStore, MemoryStateStore, StateStore, SubId, SubscriptionStore};
