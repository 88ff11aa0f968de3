//! Established Salt Channel session
//!
//! A `SessionChannel` is produced by a successful client or server
//! handshake. It owns the transport, the session key and the time
//! helpers, and moves application messages in encrypted frames.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use crate::error::{ProtocolError, Result, SaltChannelError, TransportError};
use crate::net::{ReceiveEvent, Transport};
use crate::protocol::handshake::{HandshakeResult, Transcript};
use crate::protocol::messages::{AppPacket, MAX_MESSAGE_COUNT, MAX_MESSAGE_LEN};
use crate::protocol::session::{Role, SessionState};
use crate::protocol::time::{TimeChecker, TimeKeeper};
use crate::protocol::transport::SessionCrypto;

/// Result of `SessionChannel::receive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    /// The next application message, `None` if the wait elapsed
    pub message: Option<Vec<u8>>,
    /// The session closed while handling this call
    pub closed: bool,
}

/// Encrypted post-handshake session over a transport
pub struct SessionChannel<T: Transport> {
    transport: T,
    crypto: SessionCrypto,
    time_keeper: Box<dyn TimeKeeper>,
    time_checker: Box<dyn TimeChecker>,
    state: SessionState,
    queue: VecDeque<Vec<u8>>,
    role: Role,
    peer_sig_key: [u8; 32],
    transcript: Transcript,
}

impl<T: Transport> SessionChannel<T> {
    pub(crate) fn new(
        transport: T,
        result: HandshakeResult,
        role: Role,
        time_keeper: Box<dyn TimeKeeper>,
        time_checker: Box<dyn TimeChecker>,
    ) -> Self {
        tracing::info!(
            "Session ready ({}), peer {}",
            role,
            hex::encode(&result.peer_sig_key[..8])
        );

        Self {
            transport,
            crypto: result.crypto,
            time_keeper,
            time_checker,
            state: SessionState::Ready,
            queue: VecDeque::new(),
            role,
            peer_sig_key: result.peer_sig_key,
            transcript: result.transcript,
        }
    }

    /// Current session state
    ///
    /// Reports `Closed` once the transport has gone away, even before the
    /// next call notices.
    pub fn state(&self) -> SessionState {
        if self.transport.is_connecting() {
            SessionState::Waiting
        } else if self.transport.is_closed() && !self.state.is_terminal() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Verified signature key of the peer
    pub fn peer_sig_key(&self) -> &[u8; 32] {
        &self.peer_sig_key
    }

    /// Handshake transcript hashes
    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Send one or more application messages in a single frame
    ///
    /// One message goes out as App, several as MultiApp. With `last` set,
    /// the session closes after the frame is sent.
    pub async fn send<M: AsRef<[u8]>>(&mut self, last: bool, messages: &[M]) -> Result<()> {
        if !self.state.can_send() {
            return Err(SaltChannelError::InvalidState {
                operation: "send",
                state: self.state,
            });
        }
        validate_messages(messages)?;

        let time = self.time_keeper.time();
        let sent = self.send_frame(last, time, messages).await;
        if let Err(err) = sent {
            return Err(self.fail(err).await);
        }

        tracing::debug!(
            "Sent {} message(s){}",
            messages.len(),
            if last { ", last" } else { "" }
        );

        if last {
            self.state = SessionState::Last;
            self.close().await;
        }
        Ok(())
    }

    async fn send_frame<M: AsRef<[u8]>>(
        &mut self,
        last: bool,
        time: u32,
        messages: &[M],
    ) -> Result<()> {
        let clear = AppPacket::encode(time, messages)?;
        let envelope = self.crypto.encrypt(last, &clear)?;
        self.transport.send(&envelope).await?;
        Ok(())
    }

    /// Receive the next application message, waiting up to `wait`
    ///
    /// Messages left over from an earlier MultiApp frame are returned
    /// without touching the transport. A wait that elapses yields
    /// `message: None` and leaves the session open.
    pub async fn receive(&mut self, wait: Duration) -> Result<Received> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Last if !self.queue.is_empty() => {}
            state => {
                return Err(SaltChannelError::InvalidState {
                    operation: "receive",
                    state,
                })
            }
        }

        if self.queue.is_empty() {
            match self.receive_frame(wait).await {
                Ok(true) => {}
                Ok(false) => {
                    return Ok(Received {
                        message: None,
                        closed: false,
                    })
                }
                Err(err) => return Err(self.fail(err).await),
            }
        }

        let message = self.queue.pop_front();
        if self.state == SessionState::Last && self.queue.is_empty() {
            self.close().await;
        }

        Ok(Received {
            message,
            closed: self.state == SessionState::Closed,
        })
    }

    /// Wait for one frame and queue its messages; false on timeout
    async fn receive_frame(&mut self, wait: Duration) -> Result<bool> {
        let frame = match self.transport.receive(wait).await? {
            ReceiveEvent::Data(frame) => frame,
            ReceiveEvent::Timeout => return Ok(false),
            ReceiveEvent::Closed => return Err(TransportError::Closed.into()),
        };

        let decrypted = self.crypto.decrypt(&frame)?;
        let packet = AppPacket::decode(&decrypted.clear)?;

        if self.time_checker.is_delayed(packet.time) {
            return Err(ProtocolError::DelayedPacket {
                packet: "(Multi)AppPacket",
                time: packet.time,
            }
            .into());
        }

        tracing::debug!(
            "Received {} message(s){}",
            packet.messages.len(),
            if decrypted.last { ", last" } else { "" }
        );

        self.queue.extend(packet.messages);
        if decrypted.last {
            self.state = SessionState::Last;
        }
        Ok(true)
    }

    /// Close the session and release the transport
    ///
    /// Idempotent. Queued messages are discarded and the session key is
    /// wiped.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }

        self.time_keeper.reset();
        self.time_checker.reset();
        self.queue.clear();
        self.crypto.wipe();
        self.transport.close().await;
        self.state = SessionState::Closed;

        tracing::debug!("Session closed ({})", self.role);
    }

    /// Tear down after a fatal error and hand the error back
    async fn fail(&mut self, err: SaltChannelError) -> SaltChannelError {
        tracing::warn!("Session failed ({}): {}", self.role, err);
        self.state = SessionState::Error;
        self.close().await;
        err
    }

    /// Give the transport back, e.g. after a clean close
    pub fn into_transport(self) -> T {
        self.transport
    }
}

impl<T: Transport> fmt::Debug for SessionChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionChannel")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("queued", &self.queue.len())
            .field("peer_sig_key", &hex::encode(self.peer_sig_key))
            .finish_non_exhaustive()
    }
}

/// Caller-side checks done before any I/O
fn validate_messages<M: AsRef<[u8]>>(messages: &[M]) -> Result<()> {
    if messages.is_empty() {
        return Err(SaltChannelError::InvalidArgument {
            reason: "at least one message is required".to_string(),
        });
    }
    if messages.len() > MAX_MESSAGE_COUNT {
        return Err(SaltChannelError::InvalidArgument {
            reason: format!(
                "{} messages in one frame, at most {}",
                messages.len(),
                MAX_MESSAGE_COUNT
            ),
        });
    }
    if let Some((index, message)) = messages
        .iter()
        .enumerate()
        .find(|(_, m)| m.as_ref().len() > MAX_MESSAGE_LEN)
    {
        return Err(SaltChannelError::InvalidArgument {
            reason: format!(
                "message {} is {} bytes, at most {}",
                index,
                message.as_ref().len(),
                MAX_MESSAGE_LEN
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ExchangeKeyPair, SigKeyPair};
    use crate::error::ErrorKind;
    use crate::net::MemoryTransport;
    use crate::protocol::handshake::{ClientHandshake, ServerHandshake};
    use crate::protocol::time::{NullTimeChecker, NullTimeKeeper};

    const WAIT: Duration = Duration::from_millis(500);

    /// Run the handshake steps directly and wrap both ends in channels
    fn channels() -> (
        SessionChannel<MemoryTransport>,
        SessionChannel<MemoryTransport>,
    ) {
        let mut checker = NullTimeChecker;
        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            None,
            0,
        );
        let server = ServerHandshake::new(SigKeyPair::generate(), ExchangeKeyPair::generate())
            .process_m1(client.m1_bytes(), &mut checker, 0, 0)
            .unwrap();
        let client = client.process_m2(server.m2_bytes(), &mut checker).unwrap();
        let (m4, client_result) = client.process_m3(server.m3_bytes(), &mut checker, 0).unwrap();
        let server_result = server.process_m4(&m4, &mut checker).unwrap();

        let (a, b) = MemoryTransport::pair();
        (
            SessionChannel::new(
                a,
                client_result,
                Role::Client,
                Box::new(NullTimeKeeper),
                Box::new(NullTimeChecker),
            ),
            SessionChannel::new(
                b,
                server_result,
                Role::Server,
                Box::new(NullTimeKeeper),
                Box::new(NullTimeChecker),
            ),
        )
    }

    #[tokio::test]
    async fn test_single_message_both_ways() {
        let (mut client, mut server) = channels();

        client.send(false, &[b"hello"]).await.unwrap();
        let got = server.receive(WAIT).await.unwrap();
        assert_eq!(got.message.as_deref(), Some(&b"hello"[..]));
        assert!(!got.closed);

        server.send(false, &[b"world"]).await.unwrap();
        let got = client.receive(WAIT).await.unwrap();
        assert_eq!(got.message.as_deref(), Some(&b"world"[..]));
    }

    #[tokio::test]
    async fn test_multi_app_is_queued() {
        let (mut client, mut server) = channels();

        client
            .send(false, &[b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()])
            .await
            .unwrap();

        let mut got = Vec::new();
        for _ in 0..3 {
            got.push(server.receive(WAIT).await.unwrap().message.unwrap());
        }
        assert_eq!(got, vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]);

        // queue drained, nothing more on the wire
        let idle = server.receive(Duration::from_millis(10)).await.unwrap();
        assert_eq!(
            idle,
            Received {
                message: None,
                closed: false
            }
        );
        assert_eq!(server.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_last_message_closes_both_sides() {
        let (mut client, mut server) = channels();

        client.send(true, &[b"one".to_vec(), b"two".to_vec()]).await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);

        let first = server.receive(WAIT).await.unwrap();
        assert_eq!(first.message.as_deref(), Some(&b"one"[..]));
        assert!(!first.closed);
        assert_eq!(server.state(), SessionState::Last);

        let second = server.receive(WAIT).await.unwrap();
        assert_eq!(second.message.as_deref(), Some(&b"two"[..]));
        assert!(second.closed);
        assert_eq!(server.state(), SessionState::Closed);

        let err = server.receive(WAIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = client.receive(WAIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_send_after_close_is_invalid_state() {
        let (mut client, _server) = channels();

        client.close().await;
        client.close().await;

        let err = client.send(false, &[b"x"]).await.unwrap_err();
        assert!(matches!(
            err,
            SaltChannelError::InvalidState {
                operation: "send",
                state: SessionState::Closed
            }
        ));
    }

    #[tokio::test]
    async fn test_bad_arguments_do_not_close() {
        let (mut client, mut server) = channels();

        let empty: [&[u8]; 0] = [];
        let err = client.send(false, &empty).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let big = vec![0u8; MAX_MESSAGE_LEN + 1];
        let err = client.send(false, &[big]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.is_recoverable());

        assert_eq!(client.state(), SessionState::Ready);
        client.send(false, &[b"still fine"]).await.unwrap();
        assert!(server.receive(WAIT).await.unwrap().message.is_some());
    }

    #[tokio::test]
    async fn test_peer_vanishing_is_fatal() {
        let (mut client, server) = channels();
        drop(server);

        let err = client.receive(WAIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_delayed_app_packet_rejected() {
        use crate::protocol::time::{ManualClock, TypicalTimeChecker};
        use std::sync::Arc;

        let (mut client, mut server) = channels();

        let clock = Arc::new(ManualClock::new(0));
        let mut checker = TypicalTimeChecker::new(clock.clone(), Duration::from_millis(100));
        checker.report_first_time(1);
        server.time_checker = Box::new(checker);

        // the sender claims 50 ms since its epoch, we observed 10 s
        let frame = AppPacket::encode(50, &[b"stale"]).unwrap();
        let envelope = client.crypto.encrypt(false, &frame).unwrap();
        client.transport.send(&envelope).await.unwrap();
        clock.advance(Duration::from_secs(10));

        let err = server.receive(WAIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReplayOrDelay);
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_garbage_frame_fails_decryption() {
        let (mut client, mut server) = channels();

        client.transport.send(&[6, 0, 1, 2, 3]).await.unwrap();
        let err = server.receive(WAIT).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
        assert!(!err.is_recoverable());
    }
}
