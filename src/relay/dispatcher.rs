//! Dispatcher: owns one poll loop task per registration.
//!
//! Starts a loop for every registration found at startup, then follows the
//! store's change events: `Added` starts a loop, `Removed` cancels one. If
//! the event stream lags, the running set is reconciled against a fresh
//! snapshot. Loops that stop on their own are reaped and are not restarted
//! until their registration is added again or the process restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::Publisher;
use crate::config::PollConfig;
use crate::error::DatabaseError;
use crate::feed::FeedFetcher;
use crate::links::LinkRewriter;
use crate::relay::poll_loop::{PollLoop, StopReason};
use crate::store::{Account, RegistrationEvent, RegistrationStore};

/// How often finished loops are collected while idle.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// A running loop and the means to stop it.
struct LoopHandle {
    account: Account,
    cancel: CancellationToken,
    task: JoinHandle<StopReason>,
}

/// Starts, tracks and stops poll loops.
pub struct Dispatcher {
    store: Arc<dyn RegistrationStore>,
    fetcher: Arc<dyn FeedFetcher>,
    publisher: Arc<dyn Publisher>,
    links: LinkRewriter,
    config: PollConfig,
    shutdown: CancellationToken,
    loops: HashMap<String, LoopHandle>,
}

impl Dispatcher {
    /// Create a dispatcher. Cancelling `shutdown` stops every loop it started.
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        fetcher: Arc<dyn FeedFetcher>,
        publisher: Arc<dyn Publisher>,
        links: LinkRewriter,
        config: PollConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            fetcher,
            publisher,
            links,
            config,
            shutdown,
            loops: HashMap::new(),
        }
    }

    /// Start a loop for every registration in the store. Returns how many
    /// loops were started.
    pub async fn start_all(&mut self) -> Result<usize, DatabaseError> {
        let accounts = self.store.list_all().await?;
        let total = accounts.len();
        let started = accounts
            .into_iter()
            .filter(|account| self.start_loop(account.clone()))
            .count();
        info!(registrations = total, started, "Poll loops started");
        Ok(started)
    }

    /// Start a loop for `account` unless one is already running for its id.
    pub fn start_loop(&mut self, account: Account) -> bool {
        if let Some(existing) = self.loops.get(&account.id) {
            if !existing.task.is_finished() {
                debug!(id = %account.id, "Poll loop already running");
                return false;
            }
        }

        let cancel = self.shutdown.child_token();
        let poll_loop = PollLoop::new(
            account.clone(),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.publisher),
            self.links.clone(),
            self.config.clone(),
        );
        let task = tokio::spawn(poll_loop.run(cancel.clone()));

        self.loops.insert(
            account.id.clone(),
            LoopHandle {
                account,
                cancel,
                task,
            },
        );
        true
    }

    /// Cancel the loop for registration `id` and wait for it to finish.
    pub async fn stop_loop(&mut self, id: &str) -> Option<StopReason> {
        let handle = self.loops.remove(id)?;
        handle.cancel.cancel();
        let reason = join(handle).await;
        debug!(id, reason = ?reason, "Poll loop removed");
        reason
    }

    /// Apply one registration change.
    pub async fn handle_event(&mut self, event: RegistrationEvent) {
        match event {
            RegistrationEvent::Added(account) => {
                info!(
                    id = %account.id,
                    account = %account.source_account_id,
                    "Registration added"
                );
                self.start_loop(account);
            }
            RegistrationEvent::Removed { id } => {
                info!(id = %id, "Registration removed");
                self.stop_loop(&id).await;
            }
        }
    }

    /// Reconcile running loops with the store: start missing ones, stop
    /// loops whose registration no longer exists.
    pub async fn resync(&mut self) -> Result<(), DatabaseError> {
        let accounts = self.store.list_all().await?;
        let stale: Vec<String> = self
            .loops
            .keys()
            .filter(|id| !accounts.iter().any(|a| &a.id == *id))
            .cloned()
            .collect();
        for id in stale {
            self.stop_loop(&id).await;
        }
        for account in accounts {
            self.start_loop(account);
        }
        Ok(())
    }

    /// Remove finished loops and log why they stopped.
    pub async fn reap_finished(&mut self) -> usize {
        let finished: Vec<String> = self
            .loops
            .iter()
            .filter(|(_, handle)| handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for id in &finished {
            if let Some(handle) = self.loops.remove(id) {
                let account = handle.account.source_account_id.clone();
                let channel = handle.account.destination_channel_id.clone();
                match join(handle).await {
                    Some(reason) => warn!(
                        id = %id,
                        account = %account,
                        channel = %channel,
                        reason = ?reason,
                        "Poll loop ended; it restarts when the account is registered again"
                    ),
                    None => error!(id = %id, account = %account, "Poll loop task failed"),
                }
            }
        }
        finished.len()
    }

    /// Ids of registrations with a live loop.
    pub fn running_ids(&self) -> Vec<String> {
        self.loops
            .iter()
            .filter(|(_, handle)| !handle.task.is_finished())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Cancel every loop and wait for all of them to exit.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        let handles: Vec<LoopHandle> = self.loops.drain().map(|(_, h)| h).collect();
        let count = handles.len();
        futures::future::join_all(handles.into_iter().map(join)).await;
        info!(loops = count, "All poll loops stopped");
    }

    /// Drive the dispatcher until the shutdown token is cancelled.
    ///
    /// `events` must be subscribed before this is called so that changes
    /// made while the startup snapshot is read are not lost; duplicates
    /// between the snapshot and the stream are ignored.
    pub async fn run(
        mut self,
        mut events: broadcast::Receiver<RegistrationEvent>,
    ) -> Result<(), DatabaseError> {
        if let Err(e) = self.start_all().await {
            error!(error = %e, "Failed to load registrations; relay not started");
            self.shutdown().await;
            return Err(e);
        }

        let mut reap = tokio::time::interval(REAP_INTERVAL);
        reap.tick().await;
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.recv(), if events_open => match event {
                    Ok(event) => self.handle_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Registration events lagged; resyncing");
                        if let Err(e) = self.resync().await {
                            error!(error = %e, "Resync failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Registration event stream closed; running set is now fixed");
                        events_open = false;
                    }
                },
                _ = reap.tick() => {
                    self.reap_finished().await;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }
}

/// Await a loop task. `None` when the task panicked or was aborted.
async fn join(handle: LoopHandle) -> Option<StopReason> {
    match handle.task.await {
        Ok(reason) => Some(reason),
        Err(e) => {
            error!(id = %handle.account.id, error = %e, "Poll loop task panicked");
            None
        }
    }
}
