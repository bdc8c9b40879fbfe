//! Application Services
//!
//! Services that drive the tick pipeline through the ports.
//!
//! - `FeedConnection`: upstream session lifecycle, replay and delta frames
//! - `FeedSupervisor`: reconnect loop for the lifetime of the process
//! - `TickSink`: cache write and broadcast for every tick
//! - `RetryPolicy`: bounded connection retry schedule

pub mod feed_connection;
pub mod retry;
pub mod supervisor;
pub mod tick_sink;

#[cfg(test)]
pub(crate) mod testing;

pub use feed_connection::FeedConnection;
pub use retry::{Backoff, RetryPolicy};
pub use supervisor::FeedSupervisor;
pub use tick_sink::TickSink;
