//! Session roles and lifecycle states

/// Which side of the connection this endpoint plays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listens and accepts exactly one peer
    Host,
    /// Dials a known host
    Client,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Host => write!(f, "host"),
            Role::Client => write!(f, "client"),
        }
    }
}

/// Session lifecycle
///
/// ```text
/// Idle ──► Listening ──┐
///   │                  ├──► Connected ──► Closed
///   └────► Connecting ─┘
///
/// any non-terminal state ──► Failed(reason) | Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closed,
    Failed(String),
}

impl SessionState {
    /// Closed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (Idle, Listening) | (Idle, Connecting) => true,
            (Listening, Connected) | (Connecting, Connected) => true,
            (from, Closed) | (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Listening => write!(f, "listening"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Closed => write!(f, "closed"),
            SessionState::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn test_happy_paths() {
        assert!(Idle.can_transition_to(&Listening));
        assert!(Idle.can_transition_to(&Connecting));
        assert!(Listening.can_transition_to(&Connected));
        assert!(Connecting.can_transition_to(&Connected));
        assert!(Connected.can_transition_to(&Closed));
    }

    #[test]
    fn test_no_skipping_setup() {
        assert!(!Idle.can_transition_to(&Connected));
        assert!(!Listening.can_transition_to(&Connecting));
        assert!(!Connected.can_transition_to(&Listening));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let failed = Failed("refused".into());
        for next in [Idle, Listening, Connecting, Connected, Closed, Failed("again".into())] {
            assert!(!Closed.can_transition_to(&next));
            assert!(!failed.can_transition_to(&next));
        }
    }

    #[test]
    fn test_any_live_state_can_fail_or_close() {
        for from in [Idle, Listening, Connecting, Connected] {
            assert!(from.can_transition_to(&Failed("x".into())));
            assert!(from.can_transition_to(&Closed));
        }
    }
}
