//! Salt Channel client engine
//!
//! Drives the client side over a transport:
//! - optional A1/A2 discovery
//! - M1-M4 handshake, producing a `SessionChannel`
//!
//! Any failure closes the transport and leaves the engine in `Closed`.

use crate::channel::SessionChannel;
use crate::config::SessionConfig;
use crate::crypto::{ExchangeKeyPair, SigKeyPair};
use crate::error::{Result, SaltChannelError};
use crate::net::{expect_frame, Transport};
use crate::protocol::discovery;
use crate::protocol::handshake::{ClientHandshake, HandshakeResult};
use crate::protocol::messages::ProtocolEntry;
use crate::protocol::session::{Role, SessionState};
use crate::protocol::time::{TimeChecker, TimeKeeper};

/// Client side of a Salt Channel session
pub struct SaltClient<T: Transport> {
    transport: T,
    sig_keys: SigKeyPair,
    config: SessionConfig,
    time_keeper: Box<dyn TimeKeeper>,
    time_checker: Box<dyn TimeChecker>,
    state: SessionState,
}

impl<T: Transport> SaltClient<T> {
    /// Create a client with default settings
    pub fn new(transport: T, sig_keys: SigKeyPair) -> Self {
        Self::with_config(transport, sig_keys, SessionConfig::default())
    }

    /// Create a client with explicit settings
    pub fn with_config(transport: T, sig_keys: SigKeyPair, config: SessionConfig) -> Self {
        Self {
            time_keeper: config.time_keeper(),
            time_checker: config.time_checker(),
            transport,
            sig_keys,
            config,
            state: SessionState::Init,
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

    /// Ask the server which protocols it supports
    ///
    /// With `address` set, the request targets the server owning that
    /// signature key. On success the engine is back in `Init` and may run
    /// the handshake.
    pub async fn discover(&mut self, address: Option<[u8; 32]>) -> Result<Vec<ProtocolEntry>> {
        if self.state != SessionState::Init {
            return Err(SaltChannelError::InvalidState {
                operation: "discover",
                state: self.state,
            });
        }
        self.state = SessionState::A1A2;

        match self.run_discovery(address).await {
            Ok(entries) => {
                self.state = SessionState::Init;
                tracing::info!("Server offers {} protocol(s)", entries.len());
                Ok(entries)
            }
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn run_discovery(&mut self, address: Option<[u8; 32]>) -> Result<Vec<ProtocolEntry>> {
        self.transport
            .send(&discovery::build_request(address))
            .await?;
        let a2 = expect_frame(&mut self.transport, self.config.discovery_timeout, "A2").await?;
        Ok(discovery::parse_response(&a2)?)
    }

    /// Run the M1-M4 handshake
    ///
    /// `server_sig_key` pins the expected server identity; it is sent as a
    /// hint in M1 and checked against M3.
    pub async fn handshake(
        mut self,
        ephemeral: ExchangeKeyPair,
        server_sig_key: Option<[u8; 32]>,
    ) -> Result<SessionChannel<T>> {
        if self.state != SessionState::Init {
            return Err(SaltChannelError::InvalidState {
                operation: "handshake",
                state: self.state,
            });
        }
        self.state = SessionState::Handshaking;

        match self.run_handshake(ephemeral, server_sig_key).await {
            Ok(result) => Ok(SessionChannel::new(
                self.transport,
                result,
                Role::Client,
                self.time_keeper,
                self.time_checker,
            )),
            Err(err) => Err(self.fail(err).await),
        }
    }

    async fn run_handshake(
        &mut self,
        ephemeral: ExchangeKeyPair,
        server_sig_key: Option<[u8; 32]>,
    ) -> Result<HandshakeResult> {
        let wait = self.config.handshake_timeout;

        let hello = ClientHandshake::new(
            self.sig_keys.clone(),
            ephemeral,
            server_sig_key,
            self.time_keeper.time(),
        );
        self.transport.send(hello.m1_bytes()).await?;

        let m2 = expect_frame(&mut self.transport, wait, "M2").await?;
        let awaiting = hello.process_m2(&m2, self.time_checker.as_mut())?;

        let m3 = expect_frame(&mut self.transport, wait, "M3").await?;
        let m4_time = self.time_keeper.time();
        let (m4, result) = awaiting.process_m3(&m3, self.time_checker.as_mut(), m4_time)?;
        self.transport.send(&m4).await?;

        Ok(result)
    }

    /// Close the transport and report the error
    async fn fail(&mut self, err: SaltChannelError) -> SaltChannelError {
        tracing::warn!("Client {} failed: {}", self.state, err);
        self.state = SessionState::Error;
        self.time_keeper.reset();
        self.time_checker.reset();
        self.transport.close().await;
        self.state = SessionState::Closed;
        err
    }
}
