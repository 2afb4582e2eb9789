//! Nitter RSS fetcher.
//!
//! Each tracked account has a feed at `<base>/<account>/rss`. The body is
//! parsed with the [`rss`] crate; item order is kept as served, which is
//! newest first.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use super::{FeedFetcher, FeedItem};
use crate::error::FetchError;

/// Fetches account feeds from a Nitter instance.
pub struct NitterFetcher {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl NitterFetcher {
    /// Create a fetcher for the instance at `base_url`.
    ///
    /// `timeout` bounds every request made by the underlying HTTP client.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let base_url: String = base_url.into();
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .user_agent(concat!("kurage/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client,
        })
    }

    pub fn feed_url(&self, source_account_id: &str) -> String {
        format!("{}/{source_account_id}/rss", self.base_url)
    }

    /// Convert a parsed channel into feed items. No I/O, so tests can use it
    /// directly.
    pub fn parse_channel(channel: &rss::Channel) -> Vec<FeedItem> {
        channel
            .items()
            .iter()
            .filter_map(|item| {
                let link = item.link().map(String::from);
                // Prefer <guid>, fall back to <link>; skip items with neither.
                let id = item
                    .guid()
                    .map(|g| g.value().to_string())
                    .or_else(|| link.clone())?;
                Some(FeedItem {
                    id,
                    title: item.title().unwrap_or_default().to_string(),
                    link: link.unwrap_or_default(),
                })
            })
            .collect()
    }

    /// Parse a raw RSS body for `account`.
    pub fn parse_body(account: &str, body: &[u8]) -> Result<Vec<FeedItem>, FetchError> {
        let channel = rss::Channel::read_from(body).map_err(|e| FetchError::Parse {
            account: account.to_string(),
            reason: e.to_string(),
        })?;
        let items = Self::parse_channel(&channel);
        if items.is_empty() {
            return Err(FetchError::Empty {
                account: account.to_string(),
            });
        }
        Ok(items)
    }

    fn map_request_error(&self, account: &str, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout {
                account: account.to_string(),
                timeout: self.timeout,
            }
        } else {
            FetchError::Network {
                account: account.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for NitterFetcher {
    async fn fetch(&self, source_account_id: &str) -> Result<Vec<FeedItem>, FetchError> {
        let url = self.feed_url(source_account_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_request_error(source_account_id, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::AccountNotFound {
                account: source_account_id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                account: source_account_id.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_request_error(source_account_id, e))?;
        let items = Self::parse_body(source_account_id, &body)?;
        debug!(account = source_account_id, count = items.len(), "Fetched feed");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>alice / @alice</title>
    <item>
      <title>Second post</title>
      <link>https://nitter.poast.org/alice/status/2#m</link>
      <guid>https://nitter.poast.org/alice/status/2#m</guid>
    </item>
    <item>
      <title>First post</title>
      <link>https://nitter.poast.org/alice/status/1#m</link>
      <guid>https://nitter.poast.org/alice/status/1#m</guid>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_items_in_feed_order() {
        let items = NitterFetcher::parse_body("alice", FEED.as_bytes()).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "https://nitter.poast.org/alice/status/2#m");
        assert_eq!(items[0].title, "Second post");
        assert_eq!(items[1].title, "First post");
    }

    #[test]
    fn falls_back_to_link_when_no_guid() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Test</title>
    <item>
      <title>No GUID</title>
      <link>https://nitter.net/a/status/9</link>
    </item>
    <item>
      <title>Neither guid nor link</title>
    </item>
  </channel>
</rss>"#;
        let items = NitterFetcher::parse_body("a", xml.as_bytes()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "https://nitter.net/a/status/9");
    }

    #[test]
    fn empty_channel_is_an_error() {
        let xml = r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title></channel></rss>"#;
        let err = NitterFetcher::parse_body("a", xml.as_bytes()).unwrap_err();
        assert!(matches!(err, FetchError::Empty { .. }));
        assert!(!err.is_permanent());
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let err = NitterFetcher::parse_body("a", b"<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, FetchError::Parse { .. }));
    }

    #[test]
    fn builds_feed_url() {
        let fetcher = NitterFetcher::new("https://nitter.poast.org/", Duration::from_secs(5)).unwrap();
        assert_eq!(fetcher.feed_url("alice"), "https://nitter.poast.org/alice/rss");
    }

    #[test]
    fn builds_rustls_client_with_process_provider() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        assert!(rustls::crypto::CryptoProvider::get_default().is_some());
        assert!(NitterFetcher::new("https://nitter.poast.org", Duration::from_secs(5)).is_ok());
    }
}
