//! Salt Channel v2 protocol implementation
//!
//! This module contains the core protocol components:
//! - Message wire formats
//! - Nonce sequencing
//! - Session encryption
//! - Time keeping and delay detection
//! - Handshake steps (M1-M4)
//! - A1/A2 discovery
//! - Session state

pub mod discovery;
pub mod handshake;
pub mod messages;
pub mod nonce;
pub mod session;
pub mod time;
pub mod transport;

pub use handshake::{ClientHandshake, HandshakeResult, ServerHandshake, Transcript};
pub use messages::{AppPacket, PacketType, ProtocolEntry, A1, A2, M1, M2};
pub use nonce::{Nonce, NonceSequencer};
pub use session::{Role, SessionState};
pub use time::{
    Clock, ManualClock, NullTimeChecker, NullTimeKeeper, SystemClock, TimeChecker, TimeKeeper,
    TypicalTimeChecker, TypicalTimeKeeper,
};
pub use transport::{Decrypted, SessionCrypto};
