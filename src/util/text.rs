use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

fn br_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<br\s*/?>").expect("static regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

fn blank_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("static regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]{2,}").expect("static regex"))
}

/// Reduces HTML summary markup to readable plain text.
///
/// `<br>` becomes a newline, remaining tags are dropped, the common named
/// entities are unescaped, and runs of blank lines / spaces are collapsed.
pub fn strip_html(html: &str) -> String {
    let text = br_re().replace_all(html, "\n");
    let text = tag_re().replace_all(&text, "");
    let text = unescape_entities(&text);
    let text = text.replace('\r', "");
    let text = blank_re().replace_all(&text, "\n\n");
    let text = spaces_re().replace_all(&text, " ");
    text.trim().to_string()
}

/// The entities feeds actually emit. `&amp;` last so already-unescaped
/// sequences are not double-decoded.
fn unescape_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Truncates a string to at most `max_chars` characters, appending an
/// ellipsis when text was cut. Counts `char`s, not bytes, so multi-byte
/// text is never split mid-character.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        None => Cow::Borrowed(s),
        Some((byte_idx, _)) => {
            let mut out = s[..byte_idx].trim_end().to_string();
            out.push('…');
            Cow::Owned(out)
        }
    }
}
