use serde::{Deserialize, Serialize};

use super::notification::{Delivery, Notification};

/// Event name used for the connection-loss frame.
pub const CONNECTION_LOST_EVENT: &str = "connection_lost";

// JSON body of a notification frame
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubscriptionMessage {
    pub channel: String,
    pub payload: String,
}

impl From<Notification> for SubscriptionMessage {
    fn from(n: Notification) -> Self {
        Self {
            channel: n.channel,
            payload: n.payload,
        }
    }
}

/// One outbound server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Message(SubscriptionMessage),
    ConnectionLost,
}

impl Frame {
    /// Event name, if the frame carries one.
    pub fn event_name(&self) -> Option<&'static str> {
        match self {
            Self::Message(_) => None,
            Self::ConnectionLost => Some(CONNECTION_LOST_EVENT),
        }
    }

    /// The `data:` line contents.
    pub fn data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Message(msg) => serde_json::to_string(msg),
            Self::ConnectionLost => Ok("{}".to_string()),
        }
    }

    /// Full text/event-stream encoding, terminated by a blank line.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        let data = self.data()?;
        Ok(match self.event_name() {
            Some(name) => format!("event: {}\ndata: {}\n\n", name, data),
            None => format!("data: {}\n\n", data),
        })
    }
}

impl From<Delivery> for Frame {
    fn from(delivery: Delivery) -> Self {
        match delivery {
            Delivery::Notification(n) => Self::Message(n.into()),
            Delivery::ConnectionLost => Self::ConnectionLost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_encoding() {
        let frame = Frame::from(Delivery::Notification(Notification::new("orders", "42")));
        assert_eq!(
            frame.encode().unwrap(),
            "data: {\"channel\":\"orders\",\"payload\":\"42\"}\n\n"
        );
    }

    #[test]
    fn test_payload_is_escaped() {
        let frame = Frame::from(Delivery::Notification(Notification::new(
            "orders",
            "line1\nline2 \"quoted\"",
        )));
        let encoded = frame.encode().unwrap();
        // A raw newline inside the payload would split the data line
        assert_eq!(encoded.matches('\n').count(), 2);
        assert!(encoded.contains(r#"\"quoted\""#));
    }

    #[test]
    fn test_connection_lost_frame() {
        let frame = Frame::from(Delivery::ConnectionLost);
        assert_eq!(frame.event_name(), Some("connection_lost"));
        assert_eq!(frame.encode().unwrap(), "event: connection_lost\ndata: {}\n\n");
    }
}
