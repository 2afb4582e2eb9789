//! Link rewriting: feed permalinks and pasted source-platform URLs.
//!
//! Both transforms are pure. Anything that does not match passes through
//! untouched.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Source-platform URL prefix found in ordinary chat messages.
static SOURCE_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https://(?:twitter\.com|x\.com)").unwrap());

/// Nitter item permalink: `https://nitter.<host>/<handle>/status/<id>#m`.
static FEED_PERMALINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://nitter\.[^/\s]+/([^/\s]+)/status/(\d+)(?:[#?]\S*)?$").unwrap()
});

/// Rewrites links to the configured alternate viewer.
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    viewer_base_url: String,
}

impl LinkRewriter {
    pub fn new(viewer_base_url: impl Into<String>) -> Self {
        let viewer_base_url: String = viewer_base_url.into();
        Self {
            viewer_base_url: viewer_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn viewer_base_url(&self) -> &str {
        &self.viewer_base_url
    }

    /// Map a feed item permalink to `<viewer>/<handle>/status/<id>`.
    pub fn normalize_feed_link(&self, link: &str) -> String {
        match FEED_PERMALINK.captures(link) {
            Some(caps) => format!("{}/{}/status/{}", self.viewer_base_url, &caps[1], &caps[2]),
            None => link.to_string(),
        }
    }

    /// Whether a chat message carries a URL that [`Self::rewrite_message`] would change.
    pub fn has_source_link(text: &str) -> bool {
        SOURCE_URL.is_match(text)
    }

    /// Replace every source-platform URL prefix with the viewer base URL.
    pub fn rewrite_message<'a>(&self, text: &'a str) -> Cow<'a, str> {
        SOURCE_URL.replace_all(text, regex::NoExpand(&self.viewer_base_url))
    }
}
