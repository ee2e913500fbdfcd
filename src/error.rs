use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid channel list: {0}")]
    InvalidChannels(String),

    #[error("Upstream connection is not established")]
    UpstreamUnavailable,

    #[error("Upstream command failed: {0}")]
    Upstream(String),

    #[error("Subscriber evicted while registering")]
    SubscriberEvicted,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal channel closed")]
    ChannelClosed,

    #[error("Invalid URL")]
    UrlParseError(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidChannels(_) => "invalid_channels",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Upstream(_) | Self::Database(_) => "upstream_error",
            Self::SubscriberEvicted => "subscriber_evicted",
            Self::Json(_) | Self::ChannelClosed | Self::UrlParseError(_) | Self::Io(_) => {
                "internal"
            }
        }
    }
}
