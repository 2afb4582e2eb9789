//! Registration management behind the administration commands.
//!
//! Every operation checks the caller's permission first, then validates
//! input, then touches the store. Errors are meant to be shown to the caller.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::info;

use crate::error::{CommandError, DatabaseError, PermissionError, ValidationError};
use crate::store::{Account, RegistrationStore};

static ACCOUNT_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
static CHANNEL_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]+$").unwrap());

/// Who is invoking a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub is_admin: bool,
}

impl Caller {
    pub fn admin() -> Self {
        Self { is_admin: true }
    }

    pub fn member() -> Self {
        Self { is_admin: false }
    }

    fn require_admin(&self) -> Result<(), PermissionError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(PermissionError::NotAdministrator)
        }
    }
}

/// Check a tracked-account handle.
pub fn validate_account_id(account: &str) -> Result<(), ValidationError> {
    if ACCOUNT_ID.is_match(account) {
        Ok(())
    } else {
        Err(ValidationError::InvalidAccountId(account.to_string()))
    }
}

/// Check a destination channel id.
pub fn validate_channel_id(channel: &str) -> Result<(), ValidationError> {
    if CHANNEL_ID.is_match(channel) {
        Ok(())
    } else {
        Err(ValidationError::InvalidChannelId(channel.to_string()))
    }
}

/// Add/list/remove registrations with a per-scope limit.
pub struct RegistrationService {
    store: Arc<dyn RegistrationStore>,
    accounts_limit: usize,
}

impl RegistrationService {
    pub fn new(store: Arc<dyn RegistrationStore>, accounts_limit: usize) -> Self {
        Self {
            store,
            accounts_limit,
        }
    }

    pub fn accounts_limit(&self) -> usize {
        self.accounts_limit
    }

    /// Register `source_account_id` to be relayed into `channel_id`.
    pub async fn add(
        &self,
        caller: Caller,
        scope_id: &str,
        source_account_id: &str,
        channel_id: &str,
    ) -> Result<Account, CommandError> {
        caller.require_admin()?;
        let source_account_id = source_account_id.trim().trim_start_matches('@');
        let channel_id = channel_id.trim();
        validate_account_id(source_account_id)?;
        validate_channel_id(channel_id)?;

        let existing = self.store.list_by_scope(scope_id).await?;
        if existing
            .iter()
            .any(|a| a.source_account_id.eq_ignore_ascii_case(source_account_id))
        {
            return Err(ValidationError::AlreadyRegistered(source_account_id.to_string()).into());
        }
        if existing.len() >= self.accounts_limit {
            return Err(ValidationError::LimitExceeded {
                limit: self.accounts_limit,
            }
            .into());
        }

        let account = Account::new(scope_id, source_account_id, channel_id);
        self.store.insert(&account).await.map_err(|e| match e {
            // Lost a race against a concurrent add of the same handle.
            DatabaseError::Constraint(_) => {
                CommandError::from(ValidationError::AlreadyRegistered(
                    source_account_id.to_string(),
                ))
            }
            other => CommandError::from(other),
        })?;

        info!(
            scope = scope_id,
            account = source_account_id,
            channel = channel_id,
            "Registration added"
        );
        Ok(account)
    }

    /// Registrations of a scope.
    pub async fn list(&self, caller: Caller, scope_id: &str) -> Result<Vec<Account>, CommandError> {
        caller.require_admin()?;
        Ok(self.store.list_by_scope(scope_id).await?)
    }

    /// Stop tracking `source_account_id` in a scope. Returns how many
    /// registrations were removed.
    pub async fn remove(
        &self,
        caller: Caller,
        scope_id: &str,
        source_account_id: &str,
    ) -> Result<usize, CommandError> {
        caller.require_admin()?;
        let source_account_id = source_account_id.trim().trim_start_matches('@');
        validate_account_id(source_account_id)?;

        let removed = self.store.delete_by(scope_id, source_account_id).await?;
        if removed == 0 {
            return Err(ValidationError::NotRegistered(source_account_id.to_string()).into());
        }
        info!(
            scope = scope_id,
            account = source_account_id,
            removed,
            "Registration removed"
        );
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LibSqlBackend;

    async fn service(limit: usize) -> RegistrationService {
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        RegistrationService::new(store, limit)
    }

    #[test]
    fn validates_account_ids() {
        assert!(validate_account_id("alice_01").is_ok());
        assert!(validate_account_id("").is_err());
        assert!(validate_account_id("bad-name").is_err());
        assert!(validate_account_id("a b").is_err());
        assert!(validate_account_id("ünicode").is_err());
    }

    #[test]
    fn validates_channel_ids() {
        assert!(validate_channel_id("123456789012345678").is_ok());
        assert!(validate_channel_id("").is_err());
        assert!(validate_channel_id("#general").is_err());
        assert!(validate_channel_id("12a").is_err());
    }

    #[tokio::test]
    async fn limit_allows_fifteenth_and_rejects_sixteenth() {
        let svc = service(15).await;
        for i in 0..14 {
            svc.add(Caller::admin(), "g1", &format!("user{i}"), "100")
                .await
                .unwrap();
        }

        svc.add(Caller::admin(), "g1", "user14", "100").await.unwrap();
        let err = svc
            .add(Caller::admin(), "g1", "user15", "100")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CommandError::Validation(ValidationError::LimitExceeded { limit: 15 })
        ));

        // The limit is per scope.
        svc.add(Caller::admin(), "g2", "user15", "100").await.unwrap();
    }

    #[tokio::test]
    async fn non_admin_is_rejected_before_validation() {
        let svc = service(15).await;
        for result in [
            svc.add(Caller::member(), "g1", "not valid!", "x").await.map(|_| ()),
            svc.list(Caller::member(), "g1").await.map(|_| ()),
            svc.remove(Caller::member(), "g1", "alice").await.map(|_| ()),
        ] {
            assert!(matches!(
                result,
                Err(CommandError::Permission(PermissionError::NotAdministrator))
            ));
        }
    }

    #[tokio::test]
    async fn add_rejects_bad_input_and_duplicates() {
        let svc = service(15).await;
        assert!(matches!(
            svc.add(Caller::admin(), "g1", "bad-name", "100").await,
            Err(CommandError::Validation(ValidationError::InvalidAccountId(_)))
        ));
        assert!(matches!(
            svc.add(Caller::admin(), "g1", "alice", "general").await,
            Err(CommandError::Validation(ValidationError::InvalidChannelId(_)))
        ));

        let account = svc.add(Caller::admin(), "g1", "@alice", " 100 ").await.unwrap();
        assert_eq!(account.source_account_id, "alice");
        assert_eq!(account.destination_channel_id, "100");
        assert!(matches!(
            svc.add(Caller::admin(), "g1", "alice", "200").await,
            Err(CommandError::Validation(ValidationError::AlreadyRegistered(_)))
        ));
    }

    #[tokio::test]
    async fn list_and_remove() {
        let svc = service(15).await;
        svc.add(Caller::admin(), "g1", "alice", "100").await.unwrap();
        svc.add(Caller::admin(), "g1", "bob", "100").await.unwrap();

        assert_eq!(svc.list(Caller::admin(), "g1").await.unwrap().len(), 2);
        assert_eq!(svc.remove(Caller::admin(), "g1", "alice").await.unwrap(), 1);
        assert!(matches!(
            svc.remove(Caller::admin(), "g1", "alice").await,
            Err(CommandError::Validation(ValidationError::NotRegistered(_)))
        ));

        let remaining = svc.list(Caller::admin(), "g1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].source_account_id, "bob");
    }

    #[tokio::test]
    async fn handle_case_does_not_matter_for_add_or_remove() {
        let svc = service(15).await;
        svc.add(Caller::admin(), "g1", "Alice", "100").await.unwrap();
        assert!(matches!(
            svc.add(Caller::admin(), "g1", "alice", "100").await,
            Err(CommandError::Validation(ValidationError::AlreadyRegistered(_)))
        ));

        assert_eq!(svc.remove(Caller::admin(), "g1", "alice").await.unwrap(), 1);
        assert!(svc.list(Caller::admin(), "g1").await.unwrap().is_empty());

        // The handle can be registered again once removed.
        svc.add(Caller::admin(), "g1", "alice", "100").await.unwrap();
    }
}
