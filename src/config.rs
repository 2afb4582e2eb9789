//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::relay::retry::RetryPolicy;

/// Per-account poll loop configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between two cycles when nothing went wrong.
    pub interval: Duration,
    /// Upper bound for a single fetch or publish call.
    pub request_timeout: Duration,
    /// Backoff applied after consecutive transient failures.
    pub retry: RetryPolicy,
    /// Consecutive transient failures after which a loop gives up.
    pub max_consecutive_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            max_consecutive_failures: 10,
        }
    }
}

/// Feed relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Base URL of the Nitter-style feed source, without trailing slash.
    pub feed_base_url: String,
    /// Base URL that item links and pasted links are rewritten to.
    pub viewer_base_url: String,
    /// Maximum number of registrations per server.
    pub accounts_limit: usize,
    pub poll: PollConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            feed_base_url: "https://nitter.poast.org".to_string(),
            viewer_base_url: "https://fxtwitter.com".to_string(),
            accounts_limit: 15,
            poll: PollConfig::default(),
        }
    }
}

/// Process-level configuration.
#[derive(Debug)]
pub struct BotConfig {
    /// Discord bot token.
    pub bot_token: SecretString,
    /// Path of the local registration database.
    pub db_path: PathBuf,
    /// Text shown in the bot's "Watching ..." presence.
    pub watching: String,
    pub relay: RelayConfig,
}

impl BotConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = std::env::var("BOT_TOKEN")
            .map_err(|_| ConfigError::MissingEnvVar("BOT_TOKEN".to_string()))?;

        let db_path = std::env::var("KURAGE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/kurage.db"));

        let watching = std::env::var("KURAGE_WATCHING").unwrap_or_else(|_| "feeds".to_string());

        let defaults = RelayConfig::default();
        let feed_base_url = std::env::var("KURAGE_FEED_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.feed_base_url);
        let viewer_base_url = std::env::var("KURAGE_VIEWER_BASE_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.viewer_base_url);
        let accounts_limit = env_parse("KURAGE_ACCOUNTS_LIMIT", defaults.accounts_limit)?;

        let poll = PollConfig {
            interval: Duration::from_secs(env_parse(
                "KURAGE_POLL_INTERVAL_SECS",
                defaults.poll.interval.as_secs(),
            )?),
            request_timeout: Duration::from_secs(env_parse(
                "KURAGE_REQUEST_TIMEOUT_SECS",
                defaults.poll.request_timeout.as_secs(),
            )?),
            retry: defaults.poll.retry,
            max_consecutive_failures: env_parse(
                "KURAGE_MAX_FAILURES",
                defaults.poll.max_consecutive_failures,
            )?,
        };

        if poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "KURAGE_POLL_INTERVAL_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            bot_token: SecretString::from(bot_token),
            db_path,
            watching,
            relay: RelayConfig {
                feed_base_url,
                viewer_base_url,
                accounts_limit,
                poll,
            },
        })
    }
}

/// Read an optional environment variable, falling back to `default` when unset.
fn env_parse<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
