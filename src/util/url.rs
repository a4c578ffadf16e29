use std::sync::OnceLock;

use regex::Regex;
use url::Url;

fn scheme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^https?://").expect("static regex"))
}

/// Normalizes user-supplied feed URL text.
///
/// A missing scheme defaults to `https://`. Only http/https URLs with a
/// host survive; anything else yields `None`. The returned string is the
/// canonical form produced by the `url` crate, so two spellings of the
/// same feed URL compare equal as store keys.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let candidate = if scheme_re().is_match(raw) {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let parsed = Url::parse(&candidate).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return None;
    }

    Some(parsed.to_string())
}
