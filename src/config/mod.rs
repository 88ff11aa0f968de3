//! Configuration for Salt Channel engines
//!
//! `SessionConfig` carries the timeouts and time tracking settings used by
//! the client and server engines. The parser reads the INI-style file used
//! by the `saltchannel` CLI.

mod parser;

use std::sync::Arc;
use std::time::Duration;

use crate::protocol::time::{
    NullTimeChecker, NullTimeKeeper, SystemClock, TimeChecker, TimeKeeper, TypicalTimeChecker,
    TypicalTimeKeeper, DEFAULT_DELAY_THRESHOLD,
};

pub use parser::{PeerConfig, SaltConfig, ServerConfig};

/// Default wait for each handshake packet
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default wait for the A2 answer and for the first inbound frame
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Engine settings shared by client and server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Wait for each of M1/M2/M3/M4
    pub handshake_timeout: Duration,
    /// Wait for A2
    pub discovery_timeout: Duration,
    /// Lag after which an incoming packet counts as delayed
    pub delay_threshold: Duration,
    /// Stamp packets with relative time and check peer stamps
    pub time_tracking: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            delay_threshold: DEFAULT_DELAY_THRESHOLD,
            time_tracking: true,
        }
    }
}

impl SessionConfig {
    /// Time keeper matching these settings
    pub fn time_keeper(&self) -> Box<dyn TimeKeeper> {
        if self.time_tracking {
            Box::new(TypicalTimeKeeper::new(Arc::new(SystemClock::new())))
        } else {
            Box::new(NullTimeKeeper)
        }
    }

    /// Time checker matching these settings
    pub fn time_checker(&self) -> Box<dyn TimeChecker> {
        if self.time_tracking {
            Box::new(TypicalTimeChecker::new(
                Arc::new(SystemClock::new()),
                self.delay_threshold,
            ))
        } else {
            Box::new(NullTimeChecker)
        }
    }
}
