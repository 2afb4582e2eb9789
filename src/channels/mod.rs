//! Outbound publishing and the Discord gateway surface.

pub mod discord;
pub mod publisher;

pub use discord::{DiscordHandler, DiscordPublisher};
pub use publisher::Publisher;
