//! Per-account poll loop.
//!
//! One loop per tracked account. Each cycle fetches the account's feed,
//! looks at the newest item only, and publishes it when it differs from the
//! last item this loop published. Cycles run strictly one after another:
//!
//! ```text
//! POLLING -> EVALUATING -> PUBLISHING -> IDLE -> POLLING
//!                       \-> IDLE
//!     any transient failure -> BACKOFF -> POLLING
//!     permanent failure, too many failures, cancellation -> STOPPED
//! ```
//!
//! Because only `items[0]` is inspected, items posted in quick succession
//! between two polls can be skipped.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::Publisher;
use crate::config::PollConfig;
use crate::error::{FetchError, PublishError};
use crate::feed::FeedFetcher;
use crate::links::LinkRewriter;
use crate::store::Account;

/// Last item published by one loop. Lives and dies with that loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollCursor {
    last_seen_item_id: Option<String>,
}

impl PollCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_seen(&self) -> Option<&str> {
        self.last_seen_item_id.as_deref()
    }

    fn is_current(&self, item_id: &str) -> bool {
        self.last_seen_item_id.as_deref() == Some(item_id)
    }

    fn advance(&mut self, item_id: String) {
        self.last_seen_item_id = Some(item_id);
    }
}

/// What a single cycle did.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The newest item was new and has been delivered.
    Published { item_id: String },
    /// The newest item is the one already delivered.
    NoNewItem,
    /// The feed had no items.
    EmptyFeed,
    /// The newest item is a reshare by the tracked account; skipped this cycle.
    SkippedReshare { item_id: String },
    FetchFailed(FetchError),
    PublishFailed(PublishError),
}

/// Why a loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    /// The feed source reports the tracked account does not exist.
    AccountGone,
    /// The destination channel can no longer receive messages.
    ChannelUnavailable,
    TooManyFailures { failures: u32 },
}

/// Decision taken after a cycle.
#[derive(Debug, PartialEq, Eq)]
enum Next {
    Sleep(Duration),
    Stop(StopReason),
}

/// The polling state machine for one account.
pub struct PollLoop {
    account: Account,
    fetcher: Arc<dyn FeedFetcher>,
    publisher: Arc<dyn Publisher>,
    links: LinkRewriter,
    config: PollConfig,
    cursor: PollCursor,
    consecutive_failures: u32,
}

impl PollLoop {
    pub fn new(
        account: Account,
        fetcher: Arc<dyn FeedFetcher>,
        publisher: Arc<dyn Publisher>,
        links: LinkRewriter,
        config: PollConfig,
    ) -> Self {
        Self {
            account,
            fetcher,
            publisher,
            links,
            config,
            cursor: PollCursor::new(),
            consecutive_failures: 0,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Run cycles until cancelled or stopped by a failure.
    ///
    /// The token is checked at the top of every cycle and raced against every
    /// await, so cancellation never waits out a sleep.
    pub async fn run(mut self, cancel: CancellationToken) -> StopReason {
        info!(
            id = %self.account.id,
            account = %self.account.source_account_id,
            channel = %self.account.destination_channel_id,
            "Poll loop started"
        );

        let reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                outcome = self.poll_once() => outcome,
            };

            let delay = match self.next_step(outcome) {
                Next::Sleep(delay) => delay,
                Next::Stop(reason) => break reason,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break StopReason::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        };

        info!(
            id = %self.account.id,
            account = %self.account.source_account_id,
            reason = ?reason,
            "Poll loop stopped"
        );
        reason
    }

    /// Run one POLLING → EVALUATING → PUBLISHING pass.
    pub async fn poll_once(&mut self) -> CycleOutcome {
        let source = self.account.source_account_id.as_str();
        let request_timeout = self.config.request_timeout;

        let fetched = timeout(request_timeout, self.fetcher.fetch(source))
            .await
            .unwrap_or_else(|_| {
                Err(FetchError::Timeout {
                    account: source.to_string(),
                    timeout: request_timeout,
                })
            });

        let newest = match fetched {
            Ok(items) => match items.into_iter().next() {
                Some(item) => item,
                None => return CycleOutcome::EmptyFeed,
            },
            Err(FetchError::Empty { .. }) => return CycleOutcome::EmptyFeed,
            Err(e) => return CycleOutcome::FetchFailed(e),
        };

        if newest.is_reshare_by(source) {
            return CycleOutcome::SkippedReshare { item_id: newest.id };
        }
        if self.cursor.is_current(&newest.id) {
            return CycleOutcome::NoNewItem;
        }

        let link = if newest.link.is_empty() {
            newest.id.clone()
        } else {
            self.links.normalize_feed_link(&newest.link)
        };
        let channel = self.account.destination_channel_id.as_str();

        let published = timeout(request_timeout, self.publisher.publish(channel, &link))
            .await
            .unwrap_or_else(|_| {
                Err(PublishError::Timeout {
                    channel: channel.to_string(),
                    timeout: request_timeout,
                })
            });

        match published {
            Ok(()) => {
                self.cursor.advance(newest.id.clone());
                CycleOutcome::Published { item_id: newest.id }
            }
            Err(e) => CycleOutcome::PublishFailed(e),
        }
    }

    fn next_step(&mut self, outcome: CycleOutcome) -> Next {
        let account = &self.account.source_account_id;
        match outcome {
            CycleOutcome::Published { item_id } => {
                info!(account = %account, item = %item_id, "Published new item");
                self.consecutive_failures = 0;
                Next::Sleep(self.config.interval)
            }
            CycleOutcome::NoNewItem | CycleOutcome::EmptyFeed => {
                self.consecutive_failures = 0;
                Next::Sleep(self.config.interval)
            }
            CycleOutcome::SkippedReshare { item_id } => {
                debug!(account = %account, item = %item_id, "Skipping reshare");
                self.consecutive_failures = 0;
                Next::Sleep(self.config.interval)
            }
            CycleOutcome::FetchFailed(e) if e.is_permanent() => {
                warn!(account = %account, error = %e, "Tracked account is gone");
                Next::Stop(StopReason::AccountGone)
            }
            CycleOutcome::PublishFailed(e) if e.is_permanent() => {
                warn!(account = %account, error = %e, "Destination channel is unavailable");
                Next::Stop(StopReason::ChannelUnavailable)
            }
            CycleOutcome::FetchFailed(e) => self.back_off(&e),
            CycleOutcome::PublishFailed(e) => self.back_off(&e),
        }
    }

    /// Count a transient failure and pick the BACKOFF delay.
    ///
    /// A `max_consecutive_failures` of zero never gives up.
    fn back_off(&mut self, error: &dyn std::error::Error) -> Next {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let failures = self.consecutive_failures;
        let max = self.config.max_consecutive_failures;

        if max > 0 && failures >= max {
            error!(
                account = %self.account.source_account_id,
                failures,
                error = %error,
                "Giving up after repeated failures"
            );
            return Next::Stop(StopReason::TooManyFailures { failures });
        }

        let delay = self
            .config
            .retry
            .next_delay_with_jitter(failures)
            .max(self.config.interval);
        warn!(
            account = %self.account.source_account_id,
            failures,
            retry_in = ?delay,
            error = %error,
            "Poll cycle failed"
        );
        Next::Sleep(delay)
    }
}
