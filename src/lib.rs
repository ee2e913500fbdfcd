pub mod config;
pub mod dispatch;
mod error;
pub mod handler;
pub mod model;
pub mod network;
pub mod relay;
pub mod server;
pub mod supervisor;

pub use config::RelayConfig;
pub use dispatch::{Dispatcher, DispatcherConfig, SlowReaderPolicy, Subscriber};
pub use error::RelayError;
pub use handler::{EventStream, EventStreamHandler};
pub use model::{Delivery, Frame, Notification};
pub use network::{FeedCommand, FeedEvent, FeedHandle, FeedTransition};
pub use relay::Relay;
pub use supervisor::{AdmissionToken, ConnectionState, ConnectionSupervisor};
