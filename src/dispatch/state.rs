//! Queue backlog classification used by consumers to detect they fell behind.

/// How full a subscriber queue is at the moment it is inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backlog {
    /// Less than half full.
    Clear,
    /// Half full or more, still has headroom.
    Filling,
    /// At most one free slot left: the producer is outrunning the consumer.
    Saturated,
}

impl Backlog {
    /// Classify a queue from its current length and capacity.
    #[inline]
    pub fn from_capacity(current_len: usize, max_capacity: usize) -> Self {
        if max_capacity <= 1 || current_len + 1 >= max_capacity {
            return Self::Saturated;
        }

        if current_len * 2 >= max_capacity {
            Self::Filling
        } else {
            Self::Clear
        }
    }

    #[inline]
    pub fn is_saturated(&self) -> bool {
        matches!(self, Self::Saturated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Filling => "filling",
            Self::Saturated => "saturated",
        }
    }
}

impl std::fmt::Display for Backlog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
