//! Service state definitions.

/// Service operational state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service is starting up.
    Starting,
    /// Service is running and accepting transfers.
    Running,
    /// Service is finishing in-flight transfers, not accepting new ones.
    ShuttingDown,
    /// Service is stopped.
    Stopped,
}

impl ServiceState {
    /// Check if the service is accepting new transfers.
    pub fn accepts_requests(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    /// Check if the service is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServiceState::Stopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_accepts() {
        assert!(ServiceState::Running.accepts_requests());
        assert!(!ServiceState::Starting.accepts_requests());
        assert!(!ServiceState::ShuttingDown.accepts_requests());
        assert!(ServiceState::Stopped.is_terminal());
    }
}
