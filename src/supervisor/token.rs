//! Admission tokens and the connection state they stand for.

/// Proof that the upstream connection was established when the token was read.
///
/// Each successful (re)connect mints a token with a fresh generation; a
/// disconnect revokes it for good. Holders compare tokens, they never poll a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdmissionToken {
    generation: u64,
}

impl AdmissionToken {
    pub(crate) const fn new(generation: u64) -> Self {
        Self { generation }
    }

    #[inline]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Upstream connectivity as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionState {
    #[default]
    Disconnected = 0,
    Connected = 1,
}

impl ConnectionState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
        }
    }

    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
