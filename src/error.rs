//! Error types for the Salt Channel engine

use thiserror::Error;

use crate::protocol::session::SessionState;

/// Main error type for Salt Channel sessions
#[derive(Error, Debug)]
pub enum SaltChannelError {
    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Operation invoked outside the state it is legal in
    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    /// Caller supplied malformed keys or messages
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },
}

/// Configuration parsing errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid base64 key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid socket address: {value}")]
    InvalidAddress { value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Decryption failed: invalid ciphertext or authentication tag")]
    DecryptionFailed,

    #[error("Encryption failed")]
    Encryption,

    #[error("Invalid key length for {what}: expected {expected}, got {got}")]
    InvalidKeyLength {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("Invalid key: {what}")]
    InvalidKey { what: &'static str },

    #[error("Invalid nonce: expected {expected} bytes, got {got}")]
    InvalidNonce { expected: usize, got: usize },

    #[error("{packet}: could not verify signature")]
    SignatureVerification { packet: &'static str },

    #[error("Session key not established")]
    NoSessionKey,

    #[error("Peer ephemeral public key is all zeros")]
    ZeroPeerKey,
}

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("{packet}: bad packet header, expected {expected:?}, was {got:?}")]
    BadHeader {
        packet: &'static str,
        expected: Vec<[u8; 2]>,
        got: [u8; 2],
    },

    #[error("{packet}: invalid length, expected {expected}, got {got}")]
    InvalidLength {
        packet: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("{packet}: malformed packet: {reason}")]
    Malformed { packet: &'static str, reason: String },

    #[error("{packet}: invalid protocol character {byte:#04x} in {field}")]
    InvalidProtocolChar {
        packet: &'static str,
        field: &'static str,
        byte: u8,
    },

    #[error("{packet}: invalid time value {value}")]
    InvalidTime { packet: &'static str, value: u32 },

    #[error("M1: invalid address type {value}, expected 0 or 1")]
    InvalidAddressType { value: u8 },

    #[error("{packet}: detected delayed packet (time {time})")]
    DelayedPacket { packet: &'static str, time: u32 },

    #[error("{packet}: timeout after {millis} ms waiting for data")]
    Timeout { packet: &'static str, millis: u64 },

    #[error("{packet}: NoSuchServer")]
    NoSuchServer { packet: &'static str },

    #[error("Server signature key does not match expected key")]
    UnexpectedServerKey,

    #[error("Client tries to reach a different server identity")]
    ServerIdentityMismatch,

    #[error("Unknown protocol, first bytes: {prefix}")]
    UnknownProtocol { prefix: String },
}

/// Transport-level errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,

    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectFailed { endpoint: String, reason: String },

    #[error("Frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error kinds independent of where in the engine the error was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MalformedPacket,
    ProtocolViolation,
    ReplayOrDelay,
    AuthenticationFailure,
    DecryptionFailed,
    InvalidState,
    Timeout,
    NoSuchServer,
    UnknownProtocol,
    InvalidArgument,
    Transport,
    Config,
}

impl SaltChannelError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) => ErrorKind::Transport,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,

            Self::Crypto(CryptoError::DecryptionFailed) => ErrorKind::DecryptionFailed,
            Self::Crypto(CryptoError::SignatureVerification { .. }) => {
                ErrorKind::AuthenticationFailure
            }
            Self::Crypto(CryptoError::InvalidKeyLength { .. })
            | Self::Crypto(CryptoError::InvalidKey { .. })
            | Self::Crypto(CryptoError::InvalidNonce { .. }) => ErrorKind::InvalidArgument,
            Self::Crypto(CryptoError::Encryption)
            | Self::Crypto(CryptoError::NoSessionKey)
            | Self::Crypto(CryptoError::ZeroPeerKey) => ErrorKind::ProtocolViolation,

            Self::Protocol(e) => match e {
                ProtocolError::BadHeader { .. }
                | ProtocolError::InvalidLength { .. }
                | ProtocolError::Malformed { .. }
                | ProtocolError::InvalidProtocolChar { .. } => ErrorKind::MalformedPacket,
                ProtocolError::InvalidTime { .. } | ProtocolError::InvalidAddressType { .. } => {
                    ErrorKind::ProtocolViolation
                }
                ProtocolError::DelayedPacket { .. } => ErrorKind::ReplayOrDelay,
                ProtocolError::Timeout { .. } => ErrorKind::Timeout,
                // M2 NoSuchServer: the pinned server identity is not here
                ProtocolError::NoSuchServer { packet: "M2" } => ErrorKind::AuthenticationFailure,
                ProtocolError::NoSuchServer { .. } => ErrorKind::NoSuchServer,
                ProtocolError::UnexpectedServerKey | ProtocolError::ServerIdentityMismatch => {
                    ErrorKind::AuthenticationFailure
                }
                ProtocolError::UnknownProtocol { .. } => ErrorKind::UnknownProtocol,
            },
        }
    }

    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected a base64-encoded key of the documented size.",
                    field
                )
            }

            Self::Transport(TransportError::ConnectFailed { endpoint, .. }) => {
                format!(
                    "Could not connect to {}.\n  \
                    Check that the Salt Channel server is running and accessible.",
                    endpoint
                )
            }

            Self::Protocol(ProtocolError::Timeout { packet, millis }) => {
                format!(
                    "Timed out after {} ms waiting for {}.\n  \
                    The peer may not speak Salt Channel v2.",
                    millis, packet
                )
            }

            Self::Protocol(ProtocolError::UnexpectedServerKey) => {
                "Server identity does not match the pinned ServerKey.".to_string()
            }

            _ => format!("{}", self),
        }
    }

    /// Check if the session survives this error
    ///
    /// Only caller misuse detected before any I/O leaves the session usable.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidState | ErrorKind::InvalidArgument)
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Transport(_) => 3,
            Self::Protocol(_) => 4,
            Self::Crypto(_) => 5,
            Self::InvalidState { .. } | Self::InvalidArgument { .. } => 6,
        }
    }
}

/// Result type alias for Salt Channel operations
pub type Result<T> = std::result::Result<T, SaltChannelError>;
