use serde::Serialize;

/// Lifecycle of a worker session.
///
/// `Idle → Starting → Ready → Draining → Terminated`. Startup failures and
/// process death jump straight to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Idle,
    Starting,
    Ready,
    /// End of input was signaled. No further requests may be sent.
    Draining,
    Terminated,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Terminated => "terminated",
        }
    }

    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Idle, Terminated)
                | (Starting, Ready)
                | (Starting, Terminated)
                | (Ready, Draining)
                | (Ready, Terminated)
                | (Draining, Terminated)
        )
    }

    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            WorkerState::Idle,
            WorkerState::Starting,
            WorkerState::Ready,
            WorkerState::Draining,
            WorkerState::Terminated,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!WorkerState::Draining.can_transition_to(WorkerState::Ready));
        assert!(!WorkerState::Terminated.can_transition_to(WorkerState::Starting));
        assert!(!WorkerState::Idle.can_transition_to(WorkerState::Ready));
        assert!(!WorkerState::Terminated.can_transition_to(WorkerState::Terminated));
    }

    #[test]
    fn test_only_ready_accepts_requests() {
        assert!(WorkerState::Ready.accepts_requests());
        assert!(!WorkerState::Starting.accepts_requests());
        assert!(!WorkerState::Draining.accepts_requests());
    }
}
