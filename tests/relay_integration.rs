//! End-to-end tests for registration management and the relay.
//!
//! Registrations go through the same service the slash commands use, and the
//! dispatcher runs against a real in-memory store with stub feed and publish
//! endpoints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use kurage::channels::Publisher;
use kurage::config::PollConfig;
use kurage::error::{CommandError, FetchError, PublishError, ValidationError};
use kurage::feed::{FeedFetcher, FeedItem};
use kurage::links::LinkRewriter;
use kurage::registrations::{Caller, RegistrationService};
use kurage::relay::Dispatcher;
use kurage::store::{LibSqlBackend, RegistrationStore};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves a fixed feed per account; unknown accounts are not found.
#[derive(Default)]
struct StubFeed {
    feeds: Mutex<HashMap<String, Vec<FeedItem>>>,
}

impl StubFeed {
    fn set(&self, account: &str, items: Vec<FeedItem>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(account.to_string(), items);
    }
}

#[async_trait]
impl FeedFetcher for StubFeed {
    async fn fetch(&self, account: &str) -> Result<Vec<FeedItem>, FetchError> {
        self.feeds
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .ok_or_else(|| FetchError::AccountNotFound {
                account: account.to_string(),
            })
    }
}

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<(String, String)>>,
}

impl Outbox {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for Outbox {
    async fn publish(&self, channel_id: &str, content: &str) -> Result<(), PublishError> {
        self.sent
            .lock()
            .unwrap()
            .push((channel_id.to_string(), content.to_string()));
        Ok(())
    }
}

struct Harness {
    store: Arc<LibSqlBackend>,
    service: RegistrationService,
    feed: Arc<StubFeed>,
    outbox: Arc<Outbox>,
    shutdown: CancellationToken,
    task: tokio::task::JoinHandle<Result<(), kurage::error::DatabaseError>>,
}

async fn start() -> Harness {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let feed = Arc::new(StubFeed::default());
    let outbox = Arc::new(Outbox::default());
    let shutdown = CancellationToken::new();

    let config = PollConfig {
        interval: Duration::from_millis(10),
        request_timeout: Duration::from_secs(1),
        ..PollConfig::default()
    };
    let dispatcher = Dispatcher::new(
        store.clone(),
        feed.clone(),
        outbox.clone(),
        LinkRewriter::new("https://fxtwitter.com"),
        config,
        shutdown.clone(),
    );
    let events = store.subscribe();
    let task = tokio::spawn(dispatcher.run(events));

    Harness {
        service: RegistrationService::new(store.clone(), 15),
        store,
        feed,
        outbox,
        shutdown,
        task,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    timeout(TEST_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn stop(h: Harness) {
    h.shutdown.cancel();
    timeout(TEST_TIMEOUT, h.task)
        .await
        .expect("dispatcher did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn added_registration_relays_newest_post_once() {
    let h = start().await;
    h.feed.set(
        "alice",
        vec![
            FeedItem::new("t2", "second", "https://nitter.net/alice/status/2#m"),
            FeedItem::new("t1", "first", "https://nitter.net/alice/status/1#m"),
        ],
    );

    h.service
        .add(Caller::admin(), "guild-1", "alice", "100")
        .await
        .unwrap();

    wait_for(|| !h.outbox.sent().is_empty()).await;
    // Give the loop a few more cycles to prove it does not repeat itself.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.outbox.sent(),
        vec![(
            "100".to_string(),
            "https://fxtwitter.com/alice/status/2".to_string()
        )]
    );

    stop(h).await;
}

#[tokio::test]
async fn new_post_after_first_is_relayed() {
    let h = start().await;
    h.feed.set(
        "alice",
        vec![FeedItem::new("t1", "first", "https://nitter.net/alice/status/1#m")],
    );
    h.service
        .add(Caller::admin(), "guild-1", "alice", "100")
        .await
        .unwrap();
    wait_for(|| h.outbox.sent().len() == 1).await;

    h.feed.set(
        "alice",
        vec![
            FeedItem::new("t2", "second", "https://nitter.net/alice/status/2#m"),
            FeedItem::new("t1", "first", "https://nitter.net/alice/status/1#m"),
        ],
    );
    wait_for(|| h.outbox.sent().len() == 2).await;
    assert_eq!(h.outbox.sent()[1].1, "https://fxtwitter.com/alice/status/2");

    stop(h).await;
}

#[tokio::test]
async fn reshare_is_skipped_and_loop_keeps_running() {
    let h = start().await;
    h.feed.set(
        "alice",
        vec![FeedItem::new(
            "t9",
            "RT by @alice: something",
            "https://nitter.net/bob/status/9#m",
        )],
    );
    h.service
        .add(Caller::admin(), "guild-1", "alice", "100")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.outbox.sent().is_empty());

    h.feed.set(
        "alice",
        vec![FeedItem::new("t10", "own post", "https://nitter.net/alice/status/10#m")],
    );
    wait_for(|| h.outbox.sent().len() == 1).await;

    stop(h).await;
}

#[tokio::test]
async fn removed_registration_stops_relaying() {
    let h = start().await;
    h.feed.set(
        "alice",
        vec![FeedItem::new("t1", "first", "https://nitter.net/alice/status/1#m")],
    );
    h.service
        .add(Caller::admin(), "guild-1", "alice", "100")
        .await
        .unwrap();
    wait_for(|| h.outbox.sent().len() == 1).await;

    assert_eq!(
        h.service
            .remove(Caller::admin(), "guild-1", "alice")
            .await
            .unwrap(),
        1
    );
    // Let the dispatcher observe the removal before the feed changes.
    tokio::time::sleep(Duration::from_millis(50)).await;
    h.feed.set(
        "alice",
        vec![FeedItem::new("t2", "second", "https://nitter.net/alice/status/2#m")],
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.outbox.sent().len(), 1);
    assert!(h.store.list_all().await.unwrap().is_empty());

    stop(h).await;
}

#[tokio::test]
async fn registrations_present_at_startup_are_relayed() {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    RegistrationService::new(store.clone(), 15)
        .add(Caller::admin(), "guild-1", "carol", "300")
        .await
        .unwrap();

    let feed = Arc::new(StubFeed::default());
    feed.set(
        "carol",
        vec![FeedItem::new("c1", "hello", "https://example.org/not-a-permalink")],
    );
    let outbox = Arc::new(Outbox::default());
    let shutdown = CancellationToken::new();
    let dispatcher = Dispatcher::new(
        store.clone(),
        feed,
        outbox.clone(),
        LinkRewriter::new("https://fxtwitter.com"),
        PollConfig {
            interval: Duration::from_millis(10),
            ..PollConfig::default()
        },
        shutdown.clone(),
    );
    let task = tokio::spawn(dispatcher.run(store.subscribe()));

    wait_for(|| outbox.sent().len() == 1).await;
    // Links that are not feed permalinks pass through untouched.
    assert_eq!(outbox.sent()[0].1, "https://example.org/not-a-permalink");

    shutdown.cancel();
    timeout(TEST_TIMEOUT, task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn sixteenth_registration_is_rejected() {
    let h = start().await;
    for i in 0..15 {
        h.service
            .add(Caller::admin(), "guild-1", &format!("acct{i}"), "100")
            .await
            .unwrap();
    }
    let err = h
        .service
        .add(Caller::admin(), "guild-1", "acct15", "100")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommandError::Validation(ValidationError::LimitExceeded { limit: 15 })
    ));
    assert_eq!(h.store.list_by_scope("guild-1").await.unwrap().len(), 15);

    stop(h).await;
}
