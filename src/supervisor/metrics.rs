//! Counters describing upstream connection history.

use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct SupervisorStats {
    /// Successful connects, including reconnects
    pub connects: u64,
    /// Connections lost after being established
    pub disconnects: u64,
    /// Connection attempts that never got established
    pub failed_attempts: u64,
    /// Detail of the most recent failure transition
    pub last_error: Option<String>,
}

impl SupervisorStats {
    pub fn reconnects(&self) -> u64 {
        self.connects.saturating_sub(1)
    }
}

impl std::fmt::Display for SupervisorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "connects: {}, disconnects: {}, failed attempts: {}",
            self.connects, self.disconnects, self.failed_attempts
        )?;
        if let Some(err) = &self.last_error {
            write!(f, ", last error: {}", err)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnects() {
        let mut stats = SupervisorStats::default();
        assert_eq!(stats.reconnects(), 0);
        stats.connects = 3;
        assert_eq!(stats.reconnects(), 2);
    }

    #[test]
    fn test_display() {
        let stats = SupervisorStats {
            connects: 2,
            disconnects: 1,
            failed_attempts: 4,
            last_error: Some("connection refused".to_string()),
        };
        let s = format!("{}", stats);
        assert!(s.contains("failed attempts: 4"));
        assert!(s.contains("connection refused"));
    }
}
