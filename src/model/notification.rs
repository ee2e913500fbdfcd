use serde::{Deserialize, Serialize};

/// One upstream publish event. Every subscriber gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

impl Notification {
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// What a subscriber queue carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Notification(Notification),
    // Synthetic marker, never produced by the upstream itself
    ConnectionLost,
}

impl Delivery {
    #[inline]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::ConnectionLost)
    }
}
