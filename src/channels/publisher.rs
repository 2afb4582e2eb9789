//! Outbound message sink.

use async_trait::async_trait;

use crate::error::PublishError;

/// Delivers a text message to a destination channel.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Post `content` into `channel_id`.
    async fn publish(&self, channel_id: &str, content: &str) -> Result<(), PublishError>;
}
