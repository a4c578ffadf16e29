//! Small shared helpers: URL normalization and plain-text cleanup.

mod text;
mod url;

pub use text::{strip_html, truncate_chars};
pub use url::normalize_url;
