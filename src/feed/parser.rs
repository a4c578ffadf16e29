//! Feed document parsing.
//!
//! Accepts RSS 2.0 and Atom documents and normalizes their entries into
//! [`FeedItem`] values in document order. A single malformed entry never
//! aborts the whole feed: entries whose identity token cannot be derived
//! are skipped and counted, everything else parses through.

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser::{self, ParseErrorKind, ParseFeedError};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::util::strip_html;

/// Errors produced while parsing a feed document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The document root is neither `<rss>` nor `<feed>`.
    #[error("unsupported feed format")]
    UnsupportedFormat,
    /// The document could not be parsed at all.
    #[error("malformed feed document: {0}")]
    MalformedDocument(String),
}

/// One normalized entry from a parsed feed.
///
/// Immutable once produced; `id` is the stable identity token used by the
/// dedup checkpoint, derived by preference order: explicit GUID/Atom id →
/// entry link URL → hash of (title, published timestamp).
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub id: String,
    pub title: Option<String>,
    pub link: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub summary: Option<String>,
}

/// A parsed feed: channel-level metadata plus entries in document order.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub items: Vec<FeedItem>,
    /// Entries dropped because no identity token could be derived.
    pub skipped: usize,
}

/// Parses raw feed bytes into an ordered item sequence.
///
/// Item ordering is document order — ordering guarantees belong to the
/// feed publisher, not the parser. Missing optional fields (summary,
/// published time, even title or link) are tolerated; an entry is only
/// skipped when it carries no id, no link, and no title, leaving nothing
/// to derive an identity from.
pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
    // Suppress feed-rs id synthesis: a missing entry id must stay visibly
    // missing so the identity preference order below applies.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(map_parse_error)?;

    let mut items = Vec::with_capacity(feed.entries.len());
    let mut skipped = 0;

    for entry in feed.entries {
        match normalize_entry(entry) {
            Some(item) => items.push(item),
            None => skipped += 1,
        }
    }

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content).filter(|t| !t.is_empty()),
        description: feed
            .description
            .map(|t| t.content)
            .filter(|t| !t.is_empty()),
        items,
        skipped,
    })
}

fn map_parse_error(err: ParseFeedError) -> ParseError {
    match err {
        ParseFeedError::ParseError(ParseErrorKind::NoFeedRoot) => ParseError::UnsupportedFormat,
        other => ParseError::MalformedDocument(other.to_string()),
    }
}

fn normalize_entry(entry: Entry) -> Option<FeedItem> {
    let title = entry
        .title
        .map(|t| t.content)
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    let link = pick_link(&entry.links);
    let published_at = entry.published.or(entry.updated);
    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|s| strip_html(&s))
        .filter(|s| !s.is_empty());

    let id = derive_id(
        entry.id.trim(),
        link.as_deref(),
        title.as_deref(),
        published_at,
    )?;

    Some(FeedItem {
        id,
        title,
        link,
        published_at,
        summary,
    })
}

/// Prefers the `alternate` (or unannotated) link like feed consumers
/// conventionally do; falls back to whatever link comes first.
fn pick_link(links: &[feed_rs::model::Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_string())
        .filter(|href| !href.is_empty())
}

fn derive_id(
    explicit: &str,
    link: Option<&str>,
    title: Option<&str>,
    published_at: Option<DateTime<Utc>>,
) -> Option<String> {
    if !explicit.is_empty() {
        return Some(explicit.to_string());
    }
    if let Some(link) = link {
        return Some(link.to_string());
    }
    let title = title?;

    let input = format!(
        "{}|{}",
        title,
        published_at.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    Some(format!("{hash:x}"))
}

// ============================================================================
// Tests
// ============================================================================
