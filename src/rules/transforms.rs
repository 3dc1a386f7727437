//! Fixed text transforms shared by every mapping's editing toggles.

use std::sync::LazyLock;

use regex::Regex;

/// URLs, including bare domains the platform auto-links.
pub static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)] // Pattern is a compile-time constant.
    Regex::new(r"(?i)\b(?:https?://|www\.)\S+|\b[a-z0-9-]+\.[a-z]{2,}/\S*").unwrap()
});

/// `@mention` tokens.
pub static MENTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"@[A-Za-z0-9_]{2,}").unwrap()
});

/// `#hashtag` tokens.
pub static HASHTAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"#[\w]+").unwrap()
});

/// "Forwarded from …" attribution lines the platform prepends.
pub static SENDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?mi)^\s*forwarded from .*$\n?").unwrap()
});

/// Whether the text contains anything the URL pattern matches.
#[must_use]
pub fn contains_url(text: &str) -> bool {
    URL_RE.is_match(text)
}

/// Strip all URL matches.
#[must_use]
pub fn strip_urls(text: &str) -> String {
    URL_RE.replace_all(text, "").into_owned()
}

/// Strip all `@mention` matches.
#[must_use]
pub fn strip_mentions(text: &str) -> String {
    MENTION_RE.replace_all(text, "").into_owned()
}

/// Strip all `#hashtag` matches.
#[must_use]
pub fn strip_hashtags(text: &str) -> String {
    HASHTAG_RE.replace_all(text, "").into_owned()
}

/// Strip forwarded-sender attribution lines.
#[must_use]
pub fn strip_sender_info(text: &str) -> String {
    SENDER_RE.replace_all(text, "").into_owned()
}
