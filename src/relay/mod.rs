//! Feed relay: per-account poll loops and the dispatcher that owns them.

pub mod dispatcher;
pub mod poll_loop;
pub mod retry;

pub use dispatcher::Dispatcher;
pub use poll_loop::{CycleOutcome, PollCursor, PollLoop, StopReason};
pub use retry::RetryPolicy;
