//! Dispatcher policy knobs.

use std::str::FromStr;

use crate::error::RelayError;

/// What the dispatcher does with a subscriber whose queue cannot take another entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlowReaderPolicy {
    /// Skip the subscriber for this delivery and let its own consumer notice
    /// the backlog and hang up.
    #[default]
    Neglect,
    /// Drop the subscriber's registrations on the spot, closing its queue.
    Evict,
}

impl SlowReaderPolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Neglect => "neglect",
            Self::Evict => "evict",
        }
    }
}

impl std::fmt::Display for SlowReaderPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SlowReaderPolicy {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neglect" => Ok(Self::Neglect),
            "evict" => Ok(Self::Evict),
            other => Err(RelayError::Config(format!(
                "unknown slow reader policy {:?} (expected \"neglect\" or \"evict\")",
                other
            ))),
        }
    }
}

/// Fixed per process.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub slow_reader_policy: SlowReaderPolicy,
    /// Send a connection-lost marker to every subscriber when the upstream drops
    pub broadcast_on_connection_loss: bool,
}
