//! Notification fan-out.
//!
//! One [`Dispatcher`] per process maps channel names to subscriber queues and
//! copies each upstream notification into every matching queue without ever
//! waiting on one of them.
//!
//! # Slow subscribers
//!
//! Queues are bounded. When one cannot take another entry, the configured
//! [`SlowReaderPolicy`] applies:
//! - **Neglect**: skip that subscriber for this notification; its consumer sees
//!   its own [`Backlog`] saturate and hangs up
//! - **Evict**: drop all of its registrations at once, which closes its queue

pub mod manager;
pub mod policy;
pub mod registry;
pub mod state;

pub use manager::{DeliveryReport, Dispatcher, DispatcherStats};
pub use policy::{DispatcherConfig, SlowReaderPolicy};
pub use registry::{ChannelRegistry, Subscriber, SubscriberId, MIN_QUEUE_CAPACITY};
pub use state::Backlog;
