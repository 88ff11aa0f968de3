//! Session encryption for Salt Channel
//!
//! Seals cleartext packets (M3, M4, App, MultiApp) into Encrypted envelopes
//! using the session key and the per-direction nonces.

use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{secretbox, ExchangeKeyPair};
use crate::error::{CryptoError, SaltChannelError};
use crate::protocol::messages::EncryptedHeader;
use crate::protocol::nonce::NonceSequencer;
use crate::protocol::session::Role;

/// Result of opening an Encrypted envelope
#[derive(Debug)]
pub struct Decrypted {
    /// Inner cleartext packet
    pub clear: Vec<u8>,
    /// Sender flagged this as the last frame of the session
    pub last: bool,
}

/// Session key plus nonce state for one session
pub struct SessionCrypto {
    key: Zeroizing<[u8; secretbox::KEY_LEN]>,
    nonces: NonceSequencer,
    wiped: bool,
}

impl SessionCrypto {
    /// Derive the session key from our ephemeral pair and the peer's
    /// ephemeral public key
    pub fn derive(
        role: Role,
        my_ephemeral: &ExchangeKeyPair,
        their_ephemeral: &[u8; 32],
    ) -> Result<Self, CryptoError> {
        let key = my_ephemeral.session_key(their_ephemeral)?;
        Ok(Self {
            key,
            nonces: NonceSequencer::new(role),
            wiped: false,
        })
    }

    /// Build from an already agreed key
    pub fn from_key(role: Role, key: [u8; secretbox::KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
            nonces: NonceSequencer::new(role),
            wiped: false,
        }
    }

    /// Encrypt a cleartext packet into a complete Encrypted envelope
    ///
    /// `my_nonce` advances by two only when sealing succeeds.
    pub fn encrypt(&mut self, last: bool, clear: &[u8]) -> Result<Vec<u8>, SaltChannelError> {
        if self.wiped {
            return Err(CryptoError::NoSessionKey.into());
        }

        let sealed = secretbox::seal(&self.key, self.nonces.my_nonce().as_bytes(), clear)?;
        self.nonces.advance_mine();

        let mut envelope = Vec::with_capacity(EncryptedHeader::SIZE + sealed.len());
        envelope.extend_from_slice(&EncryptedHeader::build(last));
        envelope.extend_from_slice(&sealed);
        Ok(envelope)
    }

    /// Validate the envelope header and decrypt its body
    ///
    /// `their_nonce` advances by two only when authentication succeeds.
    pub fn decrypt(&mut self, envelope: &[u8]) -> Result<Decrypted, SaltChannelError> {
        if self.wiped {
            return Err(CryptoError::NoSessionKey.into());
        }

        let (last, body) = EncryptedHeader::parse(envelope)?;
        let clear = secretbox::open(&self.key, self.nonces.their_nonce().as_bytes(), body)?;
        self.nonces.advance_theirs();

        Ok(Decrypted { clear, last })
    }

    pub fn nonces(&self) -> &NonceSequencer {
        &self.nonces
    }

    /// Overwrite the session key; later encrypt/decrypt calls fail
    pub fn wipe(&mut self) {
        self.key.zeroize();
        self.wiped = true;
    }

    #[cfg(test)]
    pub(crate) fn session_key(&self) -> &[u8; secretbox::KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCrypto")
            .field("nonces", &self.nonces)
            .field("wiped", &self.wiped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pair() -> (SessionCrypto, SessionCrypto) {
        let client_eph = ExchangeKeyPair::generate();
        let server_eph = ExchangeKeyPair::generate();
        let client =
            SessionCrypto::derive(Role::Client, &client_eph, &server_eph.public_key()).unwrap();
        let server =
            SessionCrypto::derive(Role::Server, &server_eph, &client_eph.public_key()).unwrap();
        (client, server)
    }

    #[test]
    fn test_both_sides_derive_same_key() {
        let (client, server) = pair();
        assert_eq!(client.session_key(), server.session_key());
    }

    #[test]
    fn test_encrypt_decrypt_both_directions() {
        let (mut client, mut server) = pair();

        let envelope = client.encrypt(false, b"ping").unwrap();
        assert_eq!(&envelope[..2], &[6, 0]);
        assert_eq!(envelope.len(), 2 + secretbox::TAG_LEN + 4);

        let opened = server.decrypt(&envelope).unwrap();
        assert_eq!(opened.clear, b"ping");
        assert!(!opened.last);

        let envelope = server.encrypt(true, b"pong").unwrap();
        assert_eq!(&envelope[..2], &[6, 128]);
        let opened = client.decrypt(&envelope).unwrap();
        assert_eq!(opened.clear, b"pong");
        assert!(opened.last);
    }

    #[test]
    fn test_nonce_advances_by_two() {
        let (mut client, _) = pair();
        for _ in 0..3 {
            client.encrypt(false, b"x").unwrap();
        }
        assert_eq!(client.nonces().my_nonce().low_counter(), 7);
        assert_eq!(client.nonces().their_nonce().low_counter(), 2);
    }

    #[test]
    fn test_any_bit_flip_fails() {
        let (mut client, server) = pair();
        let envelope = client.encrypt(false, b"integrity matters").unwrap();

        for index in EncryptedHeader::SIZE..envelope.len() {
            for bit in 0..8 {
                let mut tampered = envelope.clone();
                tampered[index] ^= 1 << bit;

                let mut receiver = SessionCrypto::from_key(Role::Server, *server.session_key());
                let err = receiver.decrypt(&tampered).unwrap_err();
                assert_eq!(err.kind(), ErrorKind::DecryptionFailed);
                assert_eq!(receiver.nonces().their_nonce().low_counter(), 1);
            }
        }
    }

    #[test]
    fn test_replayed_frame_fails() {
        let (mut client, mut server) = pair();
        let envelope = client.encrypt(false, b"once").unwrap();

        server.decrypt(&envelope).unwrap();
        assert!(server.decrypt(&envelope).is_err());
    }

    #[test]
    fn test_bad_header_rejected() {
        let (mut client, mut server) = pair();
        let mut envelope = client.encrypt(false, b"x").unwrap();
        envelope[1] = 1;

        let err = server.decrypt(&envelope).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPacket);
    }

    #[test]
    fn test_wiped_refuses() {
        let (mut client, _) = pair();
        client.wipe();
        assert_eq!(client.session_key(), &[0u8; 32]);
        assert!(client.encrypt(false, b"x").is_err());
    }
}
