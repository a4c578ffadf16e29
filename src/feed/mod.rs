//! Feed retrieval and parsing.
//!
//! - [`fetcher`] — HTTP retrieval of raw feed bytes with a bounded timeout,
//!   a limited redirect policy, and a response size cap. The fetcher never
//!   retries: a failed cycle is simply retried at the subscription's next
//!   cron tick.
//! - [`parser`] — normalization of RSS 2.0 / Atom documents into ordered
//!   [`FeedItem`] sequences with stable identity tokens.

mod fetcher;
mod parser;

pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{parse_feed, FeedItem, ParseError, ParsedFeed};
