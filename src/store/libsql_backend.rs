//! libSQL backend: async `RegistrationStore` implementation.
//!
//! Supports local file and in-memory databases. Every successful write is
//! followed by a [`RegistrationEvent`] on the store's broadcast channel.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{Account, RegistrationEvent, RegistrationStore};

/// Capacity of the registration event channel. Slow subscribers that fall
/// further behind observe `Lagged` and resync.
const EVENT_CAPACITY: usize = 64;

const ACCOUNT_COLUMNS: &str =
    "id, scope_id, source_account_id, destination_channel_id, created_at";

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    events: broadcast::Sender<RegistrationEvent>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            db: Arc::new(db),
            conn,
            events,
        })
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn query_accounts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
        op: &str,
    ) -> Result<Vec<Account>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        let mut accounts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?
        {
            match row_to_account(&row) {
                Ok(account) => accounts.push(account),
                Err(e) => {
                    tracing::warn!("Skipping account row: {e}");
                }
            }
        }
        Ok(accounts)
    }

    fn emit(&self, event: RegistrationEvent) {
        // No subscribers is fine: nobody needs to react.
        let _ = self.events.send(event);
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to an Account. Column order matches ACCOUNT_COLUMNS.
fn row_to_account(row: &libsql::Row) -> Result<Account, libsql::Error> {
    let created_str: String = row.get(4)?;
    Ok(Account {
        id: row.get(0)?,
        scope_id: row.get(1)?,
        source_account_id: row.get(2)?,
        destination_channel_id: row.get(3)?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl RegistrationStore for LibSqlBackend {
    async fn list_all(&self) -> Result<Vec<Account>, DatabaseError> {
        self.query_accounts(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at ASC"),
            (),
            "list_all",
        )
        .await
    }

    async fn list_by_scope(&self, scope_id: &str) -> Result<Vec<Account>, DatabaseError> {
        self.query_accounts(
            &format!(
                "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE scope_id = ?1 ORDER BY created_at ASC"
            ),
            params![scope_id],
            "list_by_scope",
        )
        .await
    }

    async fn insert(&self, account: &Account) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!("INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5)"),
                params![
                    account.id.clone(),
                    account.scope_id.clone(),
                    account.source_account_id.clone(),
                    account.destination_channel_id.clone(),
                    account.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("UNIQUE constraint failed") {
                    DatabaseError::Constraint(format!("insert account: {msg}"))
                } else {
                    DatabaseError::Query(format!("insert account: {msg}"))
                }
            })?;

        debug!(
            id = %account.id,
            scope = %account.scope_id,
            account = %account.source_account_id,
            "Account inserted into DB"
        );
        self.emit(RegistrationEvent::Added(account.clone()));
        Ok(())
    }

    async fn delete_by(
        &self,
        scope_id: &str,
        source_account_id: &str,
    ) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "DELETE FROM accounts \
                 WHERE scope_id = ?1 AND source_account_id = ?2 COLLATE NOCASE \
                 RETURNING id",
                params![scope_id, source_account_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_by: {e}")))?;

        let mut removed = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_by: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("delete_by: {e}")))?;
            removed.push(id);
        }

        debug!(
            scope = scope_id,
            account = source_account_id,
            count = removed.len(),
            "Accounts deleted from DB"
        );
        let count = removed.len();
        for id in removed {
            self.emit(RegistrationEvent::Removed { id });
        }
        Ok(count)
    }

    fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }
}
