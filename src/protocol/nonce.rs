//! Per-direction nonce counters
//!
//! Nonces are 24-byte little-endian integers. Each side steps both of its
//! counters by two after every frame, so the client's outgoing nonces stay
//! odd and the server's stay even.

use crate::error::CryptoError;
use crate::protocol::session::Role;

/// Nonce length of the secretbox construction
pub const NONCE_LEN: usize = 24;

/// Increment a little-endian integer of exactly `NONCE_LEN` bytes by one
pub fn advance(nonce: &mut [u8]) -> Result<(), CryptoError> {
    if nonce.len() != NONCE_LEN {
        return Err(CryptoError::InvalidNonce {
            expected: NONCE_LEN,
            got: nonce.len(),
        });
    }
    increment(nonce);
    Ok(())
}

/// Increment a little-endian integer of exactly `NONCE_LEN` bytes by two
pub fn advance_twice(nonce: &mut [u8]) -> Result<(), CryptoError> {
    advance(nonce)?;
    increment(nonce);
    Ok(())
}

fn increment(bytes: &mut [u8]) {
    for byte in bytes.iter_mut() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            break;
        }
    }
}

/// A 24-byte nonce
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_LEN]);

impl Nonce {
    /// Nonce holding a small counter value
    pub fn from_counter(value: u64) -> Self {
        let mut bytes = [0u8; NONCE_LEN];
        bytes[..8].copy_from_slice(&value.to_le_bytes());
        Self(bytes)
    }

    /// Nonce from raw bytes, which must be exactly 24 long
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; NONCE_LEN] = bytes.try_into().map_err(|_| CryptoError::InvalidNonce {
            expected: NONCE_LEN,
            got: bytes.len(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_LEN] {
        &self.0
    }

    /// Low 64 bits of the counter
    pub fn low_counter(&self) -> u64 {
        let mut low = [0u8; 8];
        low.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(low)
    }

    /// Step forward by one
    pub fn advance(&mut self) {
        increment(&mut self.0);
    }

    /// Step forward by two
    pub fn advance_twice(&mut self) {
        increment(&mut self.0);
        increment(&mut self.0);
    }
}

impl std::fmt::Debug for Nonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Nonce({})", hex::encode(self.0))
    }
}

/// The pair of nonces belonging to one session
#[derive(Debug, Clone)]
pub struct NonceSequencer {
    my_nonce: Nonce,
    their_nonce: Nonce,
}

impl NonceSequencer {
    /// Start both counters at the values fixed for `role`
    pub fn new(role: Role) -> Self {
        Self {
            my_nonce: Nonce::from_counter(role.initial_my_nonce()),
            their_nonce: Nonce::from_counter(role.initial_their_nonce()),
        }
    }

    /// Nonce for the next outgoing frame
    pub fn my_nonce(&self) -> &Nonce {
        &self.my_nonce
    }

    /// Nonce expected on the next incoming frame
    pub fn their_nonce(&self) -> &Nonce {
        &self.their_nonce
    }

    /// Called after a successful encrypt
    pub fn advance_mine(&mut self) {
        self.my_nonce.advance_twice();
    }

    /// Called after a successful decrypt
    pub fn advance_theirs(&mut self) {
        self.their_nonce.advance_twice();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_carries() {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[0] = 0xff;
        nonce[1] = 0xff;
        advance(&mut nonce).unwrap();
        assert_eq!(&nonce[..3], &[0, 0, 1]);
    }

    #[test]
    fn test_advance_wraps_at_top() {
        let mut nonce = [0xffu8; NONCE_LEN];
        advance(&mut nonce).unwrap();
        assert_eq!(nonce, [0u8; NONCE_LEN]);
    }

    #[test]
    fn test_advance_rejects_wrong_length() {
        let mut short = [0u8; 8];
        assert!(matches!(
            advance(&mut short),
            Err(CryptoError::InvalidNonce { expected: 24, got: 8 })
        ));
        assert!(Nonce::from_slice(&[0u8; 25]).is_err());
    }

    #[test]
    fn test_sequencer_initial_values() {
        let client = NonceSequencer::new(Role::Client);
        let server = NonceSequencer::new(Role::Server);

        assert_eq!(client.my_nonce(), server.their_nonce());
        assert_eq!(client.their_nonce(), server.my_nonce());
        assert_eq!(client.my_nonce().low_counter(), 1);
        assert_eq!(server.my_nonce().low_counter(), 2);
    }

    #[test]
    fn test_advance_twice_crosses_byte_boundary() {
        let mut nonce = Nonce::from_counter(0xff);
        nonce.advance_twice();
        assert_eq!(nonce.low_counter(), 0x101);

        let mut raw = *Nonce::from_counter(0xff).as_bytes();
        advance_twice(&mut raw).unwrap();
        assert_eq!(&raw, nonce.as_bytes());
    }

    mod prop {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn my_nonce_is_initial_plus_two_n(n in 0u64..5000) {
                let mut seq = NonceSequencer::new(Role::Client);
                for _ in 0..n {
                    seq.advance_mine();
                }
                prop_assert_eq!(seq.my_nonce().low_counter(), 1 + 2 * n);
            }

            #[test]
            fn directions_never_collide(a in 0u64..2000, b in 0u64..2000) {
                let mut client = NonceSequencer::new(Role::Client);
                let mut server = NonceSequencer::new(Role::Server);
                for _ in 0..a {
                    client.advance_mine();
                }
                for _ in 0..b {
                    server.advance_mine();
                }
                prop_assert_ne!(client.my_nonce(), server.my_nonce());
            }

            #[test]
            fn advance_matches_integer_increment(start in any::<u64>()) {
                let mut nonce = Nonce::from_counter(start);
                nonce.advance();
                let expected = start.wrapping_add(1);
                prop_assert_eq!(nonce.low_counter(), expected);
                // carry out of the low 64 bits lands in byte 8
                prop_assert_eq!(nonce.as_bytes()[8], u8::from(start == u64::MAX));
            }
        }
    }
}
