//! Feed source abstraction.
//!
//! [`FeedFetcher`] is the seam between the poll loops and the network. The
//! only production implementation is [`NitterFetcher`]; tests plug in
//! scripted fetchers.

pub mod nitter;

pub use nitter::NitterFetcher;

use async_trait::async_trait;

use crate::error::FetchError;

/// One syndicated entry from a tracked account's feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Source-provided identifier, stable across polls.
    pub id: String,
    pub title: String,
    /// Permalink to the original item.
    pub link: String,
}

impl FeedItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            link: link.into(),
        }
    }

    /// Whether this item is a reshare by the tracked account itself.
    ///
    /// Nitter's own reshare filter is unreliable, so the marker it puts in
    /// the title is matched instead. Exact and case-sensitive.
    pub fn is_reshare_by(&self, source_account_id: &str) -> bool {
        self.title.contains(&format!("RT by @{source_account_id}"))
    }
}

/// Retrieves the current items of one account's feed.
///
/// Implementations keep no per-account state between calls and never retry.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch the feed for `source_account_id`, newest item first.
    async fn fetch(&self, source_account_id: &str) -> Result<Vec<FeedItem>, FetchError>;
}
