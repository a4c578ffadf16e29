//! Delivery batches and plain-text rendering.
//!
//! The engine hands `(channel, feed title, ordered new items)` batches to
//! the host messaging boundary through a bounded mpsc channel — at most one
//! batch per channel per fetch cycle. The rendering helpers produce the
//! plain-text shapes the binary prints; a real host would format its own.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::feed::FeedItem;
use crate::util::truncate_chars;

/// One delivery: the new items of one feed for one channel, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryBatch {
    pub channel: String,
    pub feed_title: String,
    pub items: Vec<FeedItem>,
}

/// Sending half of the delivery boundary.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DeliveryBatch>,
}

impl Dispatcher {
    /// Creates the dispatcher and the receiving half the host consumes.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DeliveryBatch>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Forwards a batch to the delivery boundary. A dropped receiver is
    /// logged, not fatal: dedup state has already accounted for the items.
    pub async fn dispatch(&self, channel: &str, feed_title: &str, items: Vec<FeedItem>) {
        let batch = DeliveryBatch {
            channel: channel.to_string(),
            feed_title: feed_title.to_string(),
            items,
        };
        if self.tx.send(batch).await.is_err() {
            tracing::warn!(channel = %channel, "Delivery receiver dropped, batch discarded");
        }
    }
}

// ============================================================================
// Rendering
// ============================================================================

pub fn render_item_time(published_at: Option<DateTime<Utc>>) -> String {
    match published_at {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        None => "unknown time".to_string(),
    }
}

/// Renders a scheduled-delivery batch as plain text, one block per item.
pub fn render_push(batch: &DeliveryBatch, summary_max_chars: usize) -> String {
    let mut lines = vec![format!(
        "[{}] {} new item{}",
        batch.feed_title,
        batch.items.len(),
        if batch.items.len() == 1 { "" } else { "s" }
    )];

    for item in &batch.items {
        lines.push(format!(
            "title: {}",
            item.title.as_deref().unwrap_or("(untitled)")
        ));
        lines.push(format!("time: {}", render_item_time(item.published_at)));
        if let Some(link) = &item.link {
            lines.push(format!("link: {link}"));
        }
        if let Some(summary) = &item.summary {
            lines.push(format!(
                "summary: {}",
                truncate_chars(summary, summary_max_chars)
            ));
        }
    }

    lines.join("\n")
}

/// Renders a manual `get` result: numbered recent items of one feed.
pub fn render_get(
    feed_title: &str,
    url: &str,
    items: &[FeedItem],
    summary_max_chars: usize,
) -> String {
    if items.is_empty() {
        return format!("[{feed_title}] no items available");
    }

    let mut lines = vec![format!("from [{feed_title}]: {url}")];
    for (n, item) in items.iter().enumerate() {
        lines.push(format!(
            "#{}. {}",
            n + 1,
            item.title.as_deref().unwrap_or("(untitled)")
        ));
        lines.push(format!("> {}", render_item_time(item.published_at)));
        match &item.summary {
            Some(summary) => lines.push(truncate_chars(summary, summary_max_chars).into_owned()),
            None => lines.push("(no summary)".to_string()),
        }
    }
    lines.join("\n")
}

// ============================================================================
// Tests
// ============================================================================
