//! The seam between the core and the upstream feed.
//!
//! The core never touches the upstream connection directly. It sends
//! [`FeedCommand`]s through a [`FeedHandle`] and consumes [`FeedEvent`]s from
//! one ordered queue. Anything that speaks this protocol can stand in for the
//! Postgres adapter, which is how the tests drive the relay without a database.

use tokio::sync::{mpsc, oneshot};

use crate::error::RelayError;
use crate::model::Notification;

/// Connectivity transitions reported by the feed adapter, in the order it observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedTransition {
    Connected,
    Disconnected(String),
    ReconnectAttemptFailed(String),
}

impl FeedTransition {
    /// Error detail carried by failure transitions.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Connected => None,
            Self::Disconnected(detail) | Self::ReconnectAttemptFailed(detail) => Some(detail),
        }
    }
}

/// Everything the adapter emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Notification(Notification),
    State(FeedTransition),
}

/// Requests sent to the adapter.
#[derive(Debug)]
pub enum FeedCommand {
    Listen {
        channel: String,
        reply: oneshot::Sender<Result<(), RelayError>>,
    },
    Unlisten {
        channel: String,
    },
    Ping,
}

/// Cheap cloneable sender half of the command queue.
///
/// Sends never block: the queue is unbounded so callers may enqueue while
/// holding a lock and still keep the command order equal to their own order.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
}

impl FeedHandle {
    pub fn new(commands: mpsc::UnboundedSender<FeedCommand>) -> Self {
        Self { commands }
    }

    /// Create a handle plus the receiving end an adapter (or a test double) drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<FeedCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Enqueue a LISTEN and return the receiver for its result.
    pub fn request_listen(
        &self,
        channel: &str,
    ) -> Result<oneshot::Receiver<Result<(), RelayError>>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(FeedCommand::Listen {
                channel: channel.to_string(),
                reply,
            })
            .map_err(|_| RelayError::ChannelClosed)?;
        Ok(rx)
    }

    /// LISTEN and wait for the upstream's answer.
    pub async fn listen(&self, channel: &str) -> Result<(), RelayError> {
        let rx = self.request_listen(channel)?;
        rx.await.map_err(|_| RelayError::ChannelClosed)?
    }

    /// Fire-and-forget UNLISTEN.
    pub fn unlisten(&self, channel: &str) -> Result<(), RelayError> {
        self.commands
            .send(FeedCommand::Unlisten {
                channel: channel.to_string(),
            })
            .map_err(|_| RelayError::ChannelClosed)
    }

    pub fn ping(&self) -> Result<(), RelayError> {
        self.commands
            .send(FeedCommand::Ping)
            .map_err(|_| RelayError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listen_round_trip() {
        let (handle, mut rx) = FeedHandle::channel();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let FeedCommand::Listen { channel, reply } = cmd {
                    let result = if channel == "bad" {
                        Err(RelayError::Upstream("rejected".to_string()))
                    } else {
                        Ok(())
                    };
                    let _ = reply.send(result);
                }
            }
        });

        assert!(handle.listen("orders").await.is_ok());
        assert!(matches!(
            handle.listen("bad").await,
            Err(RelayError::Upstream(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_feed() {
        let (handle, rx) = FeedHandle::channel();
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.listen("orders").await,
            Err(RelayError::ChannelClosed)
        ));
        assert!(handle.unlisten("orders").is_err());
        assert!(handle.ping().is_err());
    }

    #[test]
    fn test_transition_detail() {
        assert_eq!(FeedTransition::Connected.detail(), None);
        assert_eq!(
            FeedTransition::Disconnected("eof".to_string()).detail(),
            Some("eof")
        );
    }
}
