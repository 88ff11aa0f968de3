//! Session state and role
//!
//! One `SessionState` per engine. `Closed` and `Error` are absorbing.

use std::fmt;

/// Lifecycle of a Salt Channel session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Fresh engine, no packets exchanged
    Init,
    /// A1/A2 discovery in progress
    A1A2,
    /// M1-M4 exchange in progress
    Handshaking,
    /// Session established, application messages may flow
    Ready,
    /// Last frame seen, remaining queued messages being drained
    Last,
    /// Session over, transport released
    Closed,
    /// A fatal error occurred; settles in `Closed`
    Error,
    /// Transport not yet connected
    Waiting,
}

impl SessionState {
    /// Check if no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// Check if application messages may be sent
    pub fn can_send(self) -> bool {
        self == Self::Ready
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::A1A2 => "a1a2",
            Self::Handshaking => "handshake",
            Self::Ready => "ready",
            Self::Last => "last",
            Self::Closed => "closed",
            Self::Error => "error",
            Self::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// Which end of the handshake this session played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    /// Initial value of the nonce used for our outgoing frames
    pub fn initial_my_nonce(self) -> u64 {
        match self {
            Self::Client => 1,
            Self::Server => 2,
        }
    }

    /// Initial value of the nonce expected on incoming frames
    pub fn initial_their_nonce(self) -> u64 {
        match self {
            Self::Client => 2,
            Self::Server => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Server => f.write_str("server"),
        }
    }
}
