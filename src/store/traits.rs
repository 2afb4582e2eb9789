//! `RegistrationStore` trait: single async interface for registration persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DatabaseError;

/// A tracking registration: one source account relayed into one channel of
/// one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: String,
    /// Server (guild) the registration belongs to.
    pub scope_id: String,
    /// Handle of the tracked account on the feed source.
    pub source_account_id: String,
    /// Channel new items are published to.
    pub destination_channel_id: String,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create a registration with a fresh id.
    pub fn new(
        scope_id: impl Into<String>,
        source_account_id: impl Into<String>,
        destination_channel_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scope_id: scope_id.into(),
            source_account_id: source_account_id.into(),
            destination_channel_id: destination_channel_id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Change notification emitted after a registration is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    Added(Account),
    Removed { id: String },
}

/// Backend-agnostic registration storage.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Every registration across all scopes.
    async fn list_all(&self) -> Result<Vec<Account>, DatabaseError>;

    /// Registrations of one scope, oldest first.
    async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<Account>, DatabaseError>;

    /// Persist a registration and emit [`RegistrationEvent::Added`].
    async fn insert(&self, account: &Account) -> Result<(), DatabaseError>;

    /// Delete every registration for `source_account_id` in `scope_id`,
    /// emitting [`RegistrationEvent::Removed`] for each. Returns how many
    /// were deleted.
    async fn delete_by(
        &self,
        scope_id: &str,
        source_account_id: &str,
    ) -> Result<usize, DatabaseError>;

    /// Subscribe to registration changes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent>;
}
