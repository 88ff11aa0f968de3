//! Salt Channel server engine
//!
//! Drives the server side over one accepted transport:
//! - answers A1 discovery, or sniffs which protocol the first frame uses
//! - M1-M4 handshake, producing a `SessionChannel`
//!
//! Any failure closes the transport and leaves the engine in `Closed`.

use std::time::Duration;

use crate::channel::SessionChannel;
use crate::config::SessionConfig;
use crate::crypto::{ExchangeKeyPair, SigKeyPair};
use crate::error::{ProtocolError, Result, SaltChannelError, TransportError};
use crate::net::{expect_frame, ReceiveEvent, Transport};
use crate::protocol::discovery::{self, Inbound};
use crate::protocol::handshake::{HandshakeResult, ServerHandshake};
use crate::protocol::messages::{A2, M2};
use crate::protocol::session::{Role, SessionState};
use crate::protocol::time::{TimeChecker, TimeKeeper};

/// Result of `SaltServer::respond_discovery`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Nothing arrived within the wait time
    Idle,
    /// An A1 was answered with an A2
    Answered,
    /// The first frame belongs to `protocol`; the frame is kept for
    /// `take_first_message` or the handshake
    Selected { protocol: String },
}

impl DiscoveryOutcome {
    /// Selected protocol, if any
    pub fn protocol(&self) -> Option<&str> {
        match self {
            Self::Selected { protocol } => Some(protocol),
            _ => None,
        }
    }
}

/// Server side of a Salt Channel session
pub struct SaltServer<T: Transport> {
    transport: T,
    sig_keys: SigKeyPair,
    config: SessionConfig,
    time_keeper: Box<dyn TimeKeeper>,
    time_checker: Box<dyn TimeChecker>,
    state: SessionState,
    first_message: Option<Vec<u8>>,
}

impl<T: Transport> SaltServer<T> {
    /// Create a server with default settings
    pub fn new(transport: T, sig_keys: SigKeyPair) -> Self {
        Self::with_config(transport, sig_keys, SessionConfig::default())
    }

    /// Create a server with explicit settings
    pub fn with_config(transport: T, sig_keys: SigKeyPair, config: SessionConfig) -> Self {
        Self {
            time_keeper: config.time_keeper(),
            time_checker: config.time_checker(),
            transport,
            sig_keys,
            config,
            state: SessionState::Init,
            first_message: None,
        }
    }

    /// Replace the time keeper and checker
    pub fn with_time(
        mut self,
        time_keeper: Box<dyn TimeKeeper>,
        time_checker: Box<dyn TimeChecker>,
    ) -> Self {
        self.time_keeper = time_keeper;
        self.time_checker = time_checker;
        self
    }

    pub fn state(&self) -> SessionState {
        if self.transport.is_connecting() {
            SessionState::Waiting
        } else {
            self.state
        }
    }

    /// Handle the first inbound frame
    ///
    /// An A1 is answered with an A2 listing `protocols`, each padded with
    /// `-` to ten characters. Any other frame is matched against the
    /// protocol identifiers by prefix, first match wins; a frame matching
    /// none is an error.
    pub async fn respond_discovery<S: AsRef<str>>(
        &mut self,
        protocols: &[S],
        wait: Duration,
    ) -> Result<DiscoveryOutcome> {
        if self.state != SessionState::Init {
            return Err(SaltChannelError::InvalidState {
                operation: "respond to discovery",
                state: self.state,
            });
        }
        self.state = SessionState::A1A2;

        match self.run_discovery(protocols, wait).await {
            Ok(outcome) => {
                self.state = SessionState::Init;
                Ok(outcome)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn run_discovery<S: AsRef<str>>(
        &mut self,
        protocols: &[S],
        wait: Duration,
    ) -> Result<DiscoveryOutcome> {
        let message = match self.transport.receive(wait).await? {
            ReceiveEvent::Data(message) => message,
            ReceiveEvent::Timeout => return Ok(DiscoveryOutcome::Idle),
            ReceiveEvent::Closed => return Err(TransportError::Closed.into()),
        };

        match discovery::classify(protocols, &message)? {
            Inbound::Discovery(request) => {
                let response =
                    discovery::build_response(protocols, &request, &self.sig_keys.public_key());
                match response {
                    Ok(a2) => {
                        self.transport.send(&a2).await?;
                        tracing::debug!("Answered A1 with {} protocol(s)", protocols.len());
                        Ok(DiscoveryOutcome::Answered)
                    }
                    Err(err @ ProtocolError::NoSuchServer { .. }) => {
                        self.send_best_effort(&A2::no_such_server_bytes()).await;
                        Err(err.into())
                    }
                    Err(err) => Err(err.into()),
                }
            }
            Inbound::Protocol(protocol) => {
                tracing::debug!("First message selects protocol {}", protocol);
                let protocol = protocol.to_string();
                self.first_message = Some(message);
                Ok(DiscoveryOutcome::Selected { protocol })
            }
        }
    }

    /// Take the frame kept by sniffing, e.g. to hand it to another protocol
    pub fn take_first_message(&mut self) -> Option<Vec<u8>> {
        self.first_message.take()
    }

    /// Run the M1-M4 handshake
    ///
    /// A frame kept by `respond_discovery` is used as M1; otherwise M1 is
    /// read from the transport.
    pub async fn handshake(mut self, ephemeral: ExchangeKeyPair) -> Result<SessionChannel<T>> {
        if self.state != SessionState::Init {
            return Err(SaltChannelError::InvalidState {
                operation: "handshake",
                state: self.state,
            });
        }
        self.state = SessionState::Handshaking;

        match self.run_handshake(ephemeral).await {
            Ok(result) => Ok(SessionChannel::new(
                self.transport,
                result,
                Role::Server,
                self.time_keeper,
                self.time_checker,
            )),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn run_handshake(&mut self, ephemeral: ExchangeKeyPair) -> Result<HandshakeResult> {
        let wait = self.config.handshake_timeout;

        let m1 = match self.first_message.take() {
            Some(m1) => m1,
            None => expect_frame(&mut self.transport, wait, "M1").await?,
        };

        let m2_time = self.time_keeper.time();
        let m3_time = self.time_keeper.time();
        let accepted = ServerHandshake::new(self.sig_keys.clone(), ephemeral).process_m1(
            &m1,
            self.time_checker.as_mut(),
            m2_time,
            m3_time,
        );
        let awaiting = match accepted {
            Ok(awaiting) => awaiting,
            Err(err @ SaltChannelError::Protocol(ProtocolError::ServerIdentityMismatch)) => {
                self.send_best_effort(&M2::no_such_server_bytes()).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        self.transport.send(awaiting.m2_bytes()).await?;
        self.transport.send(awaiting.m3_bytes()).await?;

        let m4 = expect_frame(&mut self.transport, wait, "M4").await?;
        awaiting.process_m4(&m4, self.time_checker.as_mut())
    }

    /// Send an error notice; the session is failing anyway
    async fn send_best_effort(&mut self, frame: &[u8]) {
        if let Err(e) = self.transport.send(frame).await {
            tracing::debug!("Could not send error notice: {}", e);
        }
    }

    /// Close the transport and report the error
    async fn fail(&mut self, err: SaltChannelError) -> SaltChannelError {
        tracing::warn!("Server {} failed: {}", self.state, err);
        self.state = SessionState::Error;
        self.first_message = None;
        self.time_keeper.reset();
        self.time_checker.reset();
        self.transport.close().await;
        self.state = SessionState::Closed;
        err
    }
}
