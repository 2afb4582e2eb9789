//! Kurage: relays posts from tracked accounts into Discord channels.

pub mod channels;
pub mod config;
pub mod error;
pub mod feed;
pub mod links;
pub mod registrations;
pub mod relay;
pub mod store;
