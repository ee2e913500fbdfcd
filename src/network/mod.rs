//! Upstream feed plumbing: the command/event protocol and the Postgres adapter.

pub mod connection;
pub mod feed;

pub use connection::{Backoff, ConnectionManager};
pub use feed::{FeedCommand, FeedEvent, FeedHandle, FeedTransition};
