//! Per-camera connection state machine

use serde::{Deserialize, Serialize};

/// Connection states of a supervised camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Streaming,
    Reconnecting,
    Error,
}

impl ConnectionState {
    /// Get the state name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Streaming => "streaming",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        }
    }

    /// Whether a live session exists in this state
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Streaming)
    }

    /// Transition table. The machine only moves forward except for the retry
    /// loop (`Reconnecting -> Connecting`, `Error -> Reconnecting`). An explicit
    /// disconnect is allowed from anywhere.
    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        if next == Disconnected {
            return *self != Disconnected;
        }

        matches!(
            (*self, next),
            (Disconnected, Connecting)
                | (Connecting, Authenticating)
                | (Connecting, Connected)
                | (Connecting, Reconnecting)
                | (Connecting, Error)
                | (Authenticating, Connected)
                | (Authenticating, Reconnecting)
                | (Authenticating, Error)
                | (Connected, Streaming)
                | (Connected, Reconnecting)
                | (Connected, Error)
                | (Streaming, Reconnecting)
                | (Streaming, Error)
                | (Reconnecting, Connecting)
                | (Reconnecting, Error)
                | (Error, Reconnecting)
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid connection state transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Current state plus transition validation
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: ConnectionState,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn transition(&mut self, next: ConnectionState) -> Result<ConnectionState, InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(next)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn test_happy_path() {
        let mut sm = StateMachine::new();
        for next in [Connecting, Authenticating, Connected, Streaming] {
            sm.transition(next).unwrap();
        }
        assert!(sm.state().is_live());
    }

    #[test]
    fn test_reconnect_loop() {
        let mut sm = StateMachine::new();
        for next in [Connecting, Connected, Reconnecting, Connecting, Reconnecting, Connecting, Connected] {
            sm.transition(next).unwrap();
        }
        assert_eq!(sm.state(), Connected);
    }

    #[test]
    fn test_no_backwards_moves() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Authenticating.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Disconnected.can_transition_to(Disconnected));
    }

    #[test]
    fn test_error_exits() {
        assert!(Error.can_transition_to(Reconnecting));
        assert!(Error.can_transition_to(Disconnected));

        let mut sm = StateMachine::new();
        sm.transition(Connecting).unwrap();
        sm.transition(Error).unwrap();
        let err = sm.transition(Connected).unwrap_err();
        assert_eq!(err.from, Error);
        assert_eq!(err.to, Connected);
    }
}
