//! Salt Channel v2 handshake
//!
//! Pure step logic for the M1-M4 exchange. Each step consumes the previous
//! one, so a handshake can only move forward. No I/O happens here; the
//! client and server engines move the produced bytes over a transport.
//!
//! ```text
//! Client                                   Server
//!   M1 (eph pub, time, [server key hint]) ->
//!                                        <- M2 (eph pub, time)
//!                                        <- Encrypted(M3: sig key, sig1)
//!   Encrypted(M4: sig key, sig2)         ->
//! ```

use crate::crypto::{hash, sign, ExchangeKeyPair, SigKeyPair};
use crate::error::{CryptoError, ProtocolError, SaltChannelError};
use crate::protocol::messages::{
    AuthMessage, PacketType, M1, M2, SIG1_PREFIX, SIG2_PREFIX,
};
use crate::protocol::session::Role;
use crate::protocol::time::TimeChecker;
use crate::protocol::transport::SessionCrypto;

/// Hashes of the raw M1 and M2 bytes, bound into both signatures
#[derive(Clone, PartialEq, Eq)]
pub struct Transcript {
    m1_hash: [u8; hash::HASH_LEN],
    m2_hash: [u8; hash::HASH_LEN],
}

impl Transcript {
    pub fn new(m1: &[u8], m2: &[u8]) -> Self {
        Self {
            m1_hash: hash::hash(m1),
            m2_hash: hash::hash(m2),
        }
    }

    pub fn m1_hash(&self) -> &[u8; hash::HASH_LEN] {
        &self.m1_hash
    }

    pub fn m2_hash(&self) -> &[u8; hash::HASH_LEN] {
        &self.m2_hash
    }

    /// `prefix || m1Hash || m2Hash`
    fn signed_message(&self, prefix: &[u8; 8]) -> Vec<u8> {
        let mut message = Vec::with_capacity(8 + 2 * hash::HASH_LEN);
        message.extend_from_slice(prefix);
        message.extend_from_slice(&self.m1_hash);
        message.extend_from_slice(&self.m2_hash);
        message
    }

    /// Sign the transcript under a domain separation prefix
    pub fn sign(&self, prefix: &[u8; 8], keys: &SigKeyPair) -> [u8; sign::SIGNATURE_LEN] {
        keys.sign(&self.signed_message(prefix))
    }

    /// Verify a transcript signature
    pub fn verify(
        &self,
        prefix: &[u8; 8],
        signature: &[u8; sign::SIGNATURE_LEN],
        public_key: &[u8; sign::PUBLIC_KEY_LEN],
    ) -> bool {
        sign::verify(&self.signed_message(prefix), signature, public_key)
    }
}

impl std::fmt::Debug for Transcript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transcript")
            .field("m1_hash", &hex::encode(&self.m1_hash[..8]))
            .field("m2_hash", &hex::encode(&self.m2_hash[..8]))
            .finish()
    }
}

/// Everything a finished handshake hands to the session channel
#[derive(Debug)]
pub struct HandshakeResult {
    pub crypto: SessionCrypto,
    pub transcript: Transcript,
    pub peer_sig_key: [u8; sign::PUBLIC_KEY_LEN],
}

/// Validate the time field of M1/M2 and start the checker epoch
fn check_first_time(
    packet: &'static str,
    time: u32,
    checker: &mut dyn TimeChecker,
) -> Result<(), ProtocolError> {
    match time {
        0 | 1 => {
            checker.report_first_time(time);
            Ok(())
        }
        value => Err(ProtocolError::InvalidTime { packet, value }),
    }
}

/// Decrypt and check an M3 or M4 envelope
fn open_auth_message(
    packet_type: PacketType,
    crypto: &mut SessionCrypto,
    envelope: &[u8],
    checker: &mut dyn TimeChecker,
) -> Result<AuthMessage, SaltChannelError> {
    let decrypted = crypto.decrypt(envelope)?;
    let message = AuthMessage::from_bytes(packet_type, &decrypted.clear)?;

    if checker.is_delayed(message.time) {
        return Err(ProtocolError::DelayedPacket {
            packet: packet_type.name(),
            time: message.time,
        }
        .into());
    }

    Ok(message)
}

/// Client step 1: M1 built, waiting for M2
pub struct ClientHandshake {
    sig_keys: SigKeyPair,
    ephemeral: ExchangeKeyPair,
    expected_server: Option<[u8; sign::PUBLIC_KEY_LEN]>,
    m1: Vec<u8>,
}

impl ClientHandshake {
    /// Build M1
    ///
    /// `time` comes from the client's TimeKeeper: 0 disables time
    /// tracking, 1 asks the server to start an epoch.
    pub fn new(
        sig_keys: SigKeyPair,
        ephemeral: ExchangeKeyPair,
        expected_server: Option<[u8; sign::PUBLIC_KEY_LEN]>,
        time: u32,
    ) -> Self {
        let m1 = M1 {
            time,
            client_ephemeral: ephemeral.public_key(),
            server_sig_key: expected_server,
        }
        .to_bytes();

        tracing::debug!(
            "M1 built: eph={} hint={}",
            hex::encode(&ephemeral.public_key()[..8]),
            expected_server.is_some()
        );

        Self {
            sig_keys,
            ephemeral,
            expected_server,
            m1,
        }
    }

    /// Raw M1 to send
    pub fn m1_bytes(&self) -> &[u8] {
        &self.m1
    }

    /// Process M2 and derive the session key
    pub fn process_m2(
        self,
        m2_bytes: &[u8],
        checker: &mut dyn TimeChecker,
    ) -> Result<ClientAwaitingM3, SaltChannelError> {
        let m2 = M2::from_bytes(m2_bytes)?;
        check_first_time("M2", m2.time, checker)?;

        let crypto = SessionCrypto::derive(Role::Client, &self.ephemeral, &m2.server_ephemeral)?;
        let transcript = Transcript::new(&self.m1, m2_bytes);

        tracing::debug!(
            "M2 accepted: server eph={} transcript={:?}",
            hex::encode(&m2.server_ephemeral[..8]),
            transcript
        );

        Ok(ClientAwaitingM3 {
            sig_keys: self.sig_keys,
            expected_server: self.expected_server,
            crypto,
            transcript,
        })
    }
}

/// Client step 2: session key known, waiting for M3
pub struct ClientAwaitingM3 {
    sig_keys: SigKeyPair,
    expected_server: Option<[u8; sign::PUBLIC_KEY_LEN]>,
    crypto: SessionCrypto,
    transcript: Transcript,
}

impl ClientAwaitingM3 {
    /// Decrypt M3, verify the server signature and build the encrypted M4
    ///
    /// `m4_time` comes from the client's TimeKeeper.
    pub fn process_m3(
        mut self,
        envelope: &[u8],
        checker: &mut dyn TimeChecker,
        m4_time: u32,
    ) -> Result<(Vec<u8>, HandshakeResult), SaltChannelError> {
        let m3 = open_auth_message(PacketType::M3, &mut self.crypto, envelope, checker)?;

        if !self.transcript.verify(&SIG1_PREFIX, &m3.signature, &m3.sig_key) {
            return Err(CryptoError::SignatureVerification { packet: "M3" }.into());
        }

        if let Some(expected) = &self.expected_server {
            if *expected != m3.sig_key {
                return Err(ProtocolError::UnexpectedServerKey.into());
            }
        }

        let m4 = AuthMessage {
            time: m4_time,
            sig_key: self.sig_keys.public_key(),
            signature: self.transcript.sign(&SIG2_PREFIX, &self.sig_keys),
        };
        let envelope = self
            .crypto
            .encrypt(false, &m4.to_bytes(PacketType::M4))?;

        tracing::debug!("M3 verified: server={}", hex::encode(&m3.sig_key[..8]));

        Ok((
            envelope,
            HandshakeResult {
                crypto: self.crypto,
                transcript: self.transcript,
                peer_sig_key: m3.sig_key,
            },
        ))
    }
}

/// Server side entry point: owns the keys until M1 arrives
pub struct ServerHandshake {
    sig_keys: SigKeyPair,
    ephemeral: ExchangeKeyPair,
}

impl ServerHandshake {
    pub fn new(sig_keys: SigKeyPair, ephemeral: ExchangeKeyPair) -> Self {
        Self {
            sig_keys,
            ephemeral,
        }
    }

    /// Validate M1, derive the session key and build M2 and the encrypted M3
    ///
    /// Fails with `ServerIdentityMismatch` when the client asked for a
    /// server key other than ours.
    pub fn process_m1(
        self,
        m1_bytes: &[u8],
        checker: &mut dyn TimeChecker,
        m2_time: u32,
        m3_time: u32,
    ) -> Result<ServerAwaitingM4, SaltChannelError> {
        let m1 = M1::from_bytes(m1_bytes)?;

        if let Some(requested) = &m1.server_sig_key {
            if *requested != self.sig_keys.public_key() {
                return Err(ProtocolError::ServerIdentityMismatch.into());
            }
        }

        check_first_time("M1", m1.time, checker)?;

        let m2 = M2 {
            time: m2_time,
            server_ephemeral: self.ephemeral.public_key(),
        }
        .to_bytes();

        let mut crypto =
            SessionCrypto::derive(Role::Server, &self.ephemeral, &m1.client_ephemeral)?;
        let transcript = Transcript::new(m1_bytes, &m2);

        let m3 = AuthMessage {
            time: m3_time,
            sig_key: self.sig_keys.public_key(),
            signature: transcript.sign(&SIG1_PREFIX, &self.sig_keys),
        };
        let m3 = crypto.encrypt(false, &m3.to_bytes(PacketType::M3))?;

        tracing::debug!(
            "M1 accepted: client eph={} transcript={:?}",
            hex::encode(&m1.client_ephemeral[..8]),
            transcript
        );

        Ok(ServerAwaitingM4 {
            crypto,
            transcript,
            m2,
            m3,
        })
    }
}

/// Server step 2: M2 and M3 ready to send, waiting for M4
pub struct ServerAwaitingM4 {
    crypto: SessionCrypto,
    transcript: Transcript,
    m2: Vec<u8>,
    m3: Vec<u8>,
}

impl ServerAwaitingM4 {
    pub fn m2_bytes(&self) -> &[u8] {
        &self.m2
    }

    /// Encrypted M3 envelope
    pub fn m3_bytes(&self) -> &[u8] {
        &self.m3
    }

    /// Decrypt M4 and verify the client signature
    pub fn process_m4(
        mut self,
        envelope: &[u8],
        checker: &mut dyn TimeChecker,
    ) -> Result<HandshakeResult, SaltChannelError> {
        let m4 = open_auth_message(PacketType::M4, &mut self.crypto, envelope, checker)?;

        if !self.transcript.verify(&SIG2_PREFIX, &m4.signature, &m4.sig_key) {
            return Err(CryptoError::SignatureVerification { packet: "M4" }.into());
        }

        tracing::debug!("M4 verified: client={}", hex::encode(&m4.sig_key[..8]));

        Ok(HandshakeResult {
            crypto: self.crypto,
            transcript: self.transcript,
            peer_sig_key: m4.sig_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::protocol::time::{ManualClock, NullTimeChecker, TypicalTimeChecker};
    use std::sync::Arc;
    use std::time::Duration;

    fn run(
        expected_server: Option<[u8; 32]>,
    ) -> Result<(HandshakeResult, HandshakeResult), SaltChannelError> {
        let client_keys = SigKeyPair::generate();
        let server_keys = SigKeyPair::generate();
        let expected = expected_server.or(Some(server_keys.public_key()));
        run_with(client_keys, server_keys, expected)
    }

    fn run_with(
        client_keys: SigKeyPair,
        server_keys: SigKeyPair,
        expected_server: Option<[u8; 32]>,
    ) -> Result<(HandshakeResult, HandshakeResult), SaltChannelError> {
        let mut checker = NullTimeChecker;

        let client = ClientHandshake::new(
            client_keys,
            ExchangeKeyPair::generate(),
            expected_server,
            0,
        );
        let server = ServerHandshake::new(server_keys, ExchangeKeyPair::generate());

        let server = server.process_m1(client.m1_bytes(), &mut checker, 0, 0)?;
        let client = client.process_m2(server.m2_bytes(), &mut checker)?;
        let (m4, client_result) = client.process_m3(server.m3_bytes(), &mut checker, 0)?;
        let server_result = server.process_m4(&m4, &mut checker)?;

        Ok((client_result, server_result))
    }

    #[test]
    fn test_full_handshake_agrees() {
        let (client, server) = run(None).unwrap();

        assert_eq!(client.transcript, server.transcript);
        assert_eq!(client.crypto.session_key(), server.crypto.session_key());
        // M3 and M4 consumed one nonce step in each direction
        assert_eq!(client.crypto.nonces().my_nonce().low_counter(), 3);
        assert_eq!(server.crypto.nonces().my_nonce().low_counter(), 4);
    }

    #[test]
    fn test_peer_keys_exchanged() {
        let client_keys = SigKeyPair::generate();
        let server_keys = SigKeyPair::generate();
        let (client, server) = run_with(client_keys.clone(), server_keys.clone(), None).unwrap();

        assert_eq!(client.peer_sig_key, server_keys.public_key());
        assert_eq!(server.peer_sig_key, client_keys.public_key());
    }

    #[test]
    fn test_hint_mismatch_rejected_by_server() {
        let err = match run(Some([0x42; 32])) {
            Err(err) => err,
            Ok(_) => panic!("handshake must fail"),
        };
        assert!(matches!(
            err,
            SaltChannelError::Protocol(ProtocolError::ServerIdentityMismatch)
        ));
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    }

    #[test]
    fn test_stripped_hint_breaks_transcript() {
        let mut checker = NullTimeChecker;
        let server_keys = SigKeyPair::generate();
        let pinned = [0x42; 32];

        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            Some(pinned),
            0,
        );
        let mut m1 = M1::from_bytes(client.m1_bytes()).unwrap();
        m1.server_sig_key = None;
        // server sees an M1 without hint, client hashes its own M1
        let server = ServerHandshake::new(server_keys, ExchangeKeyPair::generate())
            .process_m1(&m1.to_bytes(), &mut checker, 0, 0)
            .unwrap();
        let client = client.process_m2(server.m2_bytes(), &mut checker).unwrap();

        // transcripts differ, so the signature check fires first
        let err = client
            .process_m3(server.m3_bytes(), &mut checker, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    }

    #[test]
    fn test_client_rejects_unpinned_signer() {
        // A server ignoring the hint signs the real transcript with its own key
        let mut checker = NullTimeChecker;
        let impostor = SigKeyPair::generate();
        let server_eph = ExchangeKeyPair::generate();

        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            Some([0x42; 32]),
            0,
        );
        let m1 = M1::from_bytes(client.m1_bytes()).unwrap();
        assert_eq!(m1.server_sig_key, Some([0x42; 32]));

        let m2 = M2 {
            time: 0,
            server_ephemeral: server_eph.public_key(),
        }
        .to_bytes();
        let mut crypto =
            SessionCrypto::derive(Role::Server, &server_eph, &m1.client_ephemeral).unwrap();
        let transcript = Transcript::new(client.m1_bytes(), &m2);
        let m3 = AuthMessage {
            time: 0,
            sig_key: impostor.public_key(),
            signature: transcript.sign(&SIG1_PREFIX, &impostor),
        };
        let m3 = crypto.encrypt(false, &m3.to_bytes(PacketType::M3)).unwrap();

        let client = client.process_m2(&m2, &mut checker).unwrap();
        let err = match client.process_m3(&m3, &mut checker, 0) {
            Err(err) => err,
            Ok(_) => panic!("unpinned signer must be rejected"),
        };
        assert!(matches!(
            err,
            SaltChannelError::Protocol(ProtocolError::UnexpectedServerKey)
        ));
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailure);
    }

    #[test]
    fn test_delayed_m3_rejected() {
        let clock = Arc::new(ManualClock::new(5_000));
        let mut client_checker = TypicalTimeChecker::new(clock.clone(), Duration::from_millis(100));
        let mut server_checker = NullTimeChecker;

        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            None,
            1,
        );
        let server = ServerHandshake::new(SigKeyPair::generate(), ExchangeKeyPair::generate())
            .process_m1(client.m1_bytes(), &mut server_checker, 1, 2)
            .unwrap();
        let client = client
            .process_m2(server.m2_bytes(), &mut client_checker)
            .unwrap();

        clock.advance(Duration::from_millis(1_000));
        let err = match client.process_m3(server.m3_bytes(), &mut client_checker, 2) {
            Err(err) => err,
            Ok(_) => panic!("late M3 must be rejected"),
        };
        assert!(matches!(
            err,
            SaltChannelError::Protocol(ProtocolError::DelayedPacket { packet: "M3", time: 2 })
        ));
        assert_eq!(err.kind(), ErrorKind::ReplayOrDelay);
    }

    #[test]
    fn test_delayed_m4_rejected() {
        let clock = Arc::new(ManualClock::new(5_000));
        let mut client_checker = NullTimeChecker;
        let mut server_checker = TypicalTimeChecker::new(clock.clone(), Duration::from_millis(100));

        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            None,
            1,
        );
        let server = ServerHandshake::new(SigKeyPair::generate(), ExchangeKeyPair::generate())
            .process_m1(client.m1_bytes(), &mut server_checker, 1, 2)
            .unwrap();
        let client = client
            .process_m2(server.m2_bytes(), &mut client_checker)
            .unwrap();
        let (m4, _) = client
            .process_m3(server.m3_bytes(), &mut client_checker, 2)
            .unwrap();

        clock.advance(Duration::from_millis(1_000));
        let err = match server.process_m4(&m4, &mut server_checker) {
            Err(err) => err,
            Ok(_) => panic!("late M4 must be rejected"),
        };
        assert!(matches!(
            err,
            SaltChannelError::Protocol(ProtocolError::DelayedPacket { packet: "M4", time: 2 })
        ));
        assert_eq!(err.kind(), ErrorKind::ReplayOrDelay);
    }

    #[test]
    fn test_invalid_first_time_rejected() {
        let mut checker = NullTimeChecker;
        let client = ClientHandshake::new(
            SigKeyPair::generate(),
            ExchangeKeyPair::generate(),
            None,
            7,
        );
        let server = ServerHandshake::new(SigKeyPair::generate(), ExchangeKeyPair::generate());

        let err = match server.process_m1(client.m1_bytes(), &mut checker, 0, 0) {
            Err(err) => err,
            Ok(_) => panic!("time 7 must be rejected"),
        };
        assert!(matches!(
            err,
            SaltChannelError::Protocol(ProtocolError::InvalidTime { packet: "M1", value: 7 })
        ));
    }

    #[test]
    fn test_tampered_m3_fails_decryption() {
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

        let mut m3 = server.m3_bytes().to_vec();
        let last = m3.len() - 1;
        m3[last] ^= 0x01;

        let err = client.process_m3(&m3, &mut checker, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
    }

    #[test]
    fn test_transcript_signature_domains_differ() {
        let keys = SigKeyPair::generate();
        let transcript = Transcript::new(b"m1", b"m2");

        let sig1 = transcript.sign(&SIG1_PREFIX, &keys);
        assert!(transcript.verify(&SIG1_PREFIX, &sig1, &keys.public_key()));
        assert!(!transcript.verify(&SIG2_PREFIX, &sig1, &keys.public_key()));
    }
}
