//! Error types for kurage.

use std::time::Duration;

/// Top-level error type for the bot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Command error: {0}")]
    Command(#[from] CommandError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Feed source errors. The fetcher never retries; the poll loop decides.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("Feed request for @{account} failed: {reason}")]
    Network { account: String, reason: String },

    #[error("Feed request for @{account} timed out after {timeout:?}")]
    Timeout { account: String, timeout: Duration },

    #[error("Feed source returned HTTP {status} for @{account}")]
    Status { account: String, status: u16 },

    #[error("Failed to parse feed for @{account}: {reason}")]
    Parse { account: String, reason: String },

    #[error("Feed for @{account} has no items")]
    Empty { account: String },

    #[error("Account @{account} not found on the feed source")]
    AccountNotFound { account: String },
}

impl FetchError {
    /// Whether retrying can never succeed for this account.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::AccountNotFound { .. })
    }
}

/// Publish sink errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    #[error("Invalid channel id: {channel}")]
    InvalidChannel { channel: String },

    #[error("Channel {channel} not found")]
    ChannelNotFound { channel: String },

    #[error("Missing permission to post in channel {channel}: {reason}")]
    Forbidden { channel: String, reason: String },

    #[error("Rate limited on channel {channel}")]
    RateLimited { channel: String },

    #[error("Publishing to channel {channel} timed out after {timeout:?}")]
    Timeout { channel: String, timeout: Duration },

    #[error("Channel {channel} rejected the message: {reason}")]
    Rejected { channel: String, reason: String },
}

impl PublishError {
    /// Whether the destination can never accept a message again.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            PublishError::InvalidChannel { .. } | PublishError::ChannelNotFound { .. }
        )
    }
}

/// Malformed registration input or a violated registration rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Account ids may only contain ASCII letters, digits and underscores: {0:?}")]
    InvalidAccountId(String),

    #[error("Channel ids may only contain digits: {0:?}")]
    InvalidChannelId(String),

    #[error("This server already tracks the maximum of {limit} accounts")]
    LimitExceeded { limit: usize },

    #[error("@{0} is already tracked in this server")]
    AlreadyRegistered(String),

    #[error("@{0} is not tracked in this server")]
    NotRegistered(String),

    #[error("This command can only be used inside a server")]
    MissingScope,
}

/// Unauthorized administration action.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PermissionError {
    #[error("Only server administrators can manage tracked accounts")]
    NotAdministrator,
}

/// Errors surfaced to the caller of an administration command.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Permission(#[from] PermissionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type alias for the bot.
pub type Result<T> = std::result::Result<T, Error>;
