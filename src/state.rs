use std::fmt;

use serde::Serialize;

/// Derived connection state. Only the coordinator moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    LocalMediaReady,
    Negotiating,
    Connected,
    Ended,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Ended | ConnectionState::Failed)
    }

    /// Whether `next` is reachable from `self` in one step.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (from, Ended | Failed) => !from.is_terminal(),
            (Idle, LocalMediaReady) => true,
            (LocalMediaReady, Negotiating) => true,
            (Negotiating, Connected) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::LocalMediaReady => "local media ready",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Ended => "ended",
            ConnectionState::Failed => "failed",
        };
        f.write_str(name)
    }
}
