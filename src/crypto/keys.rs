//! Typed key pairs
//!
//! Key material is validated once, at construction. The engine only ever
//! reads these values.

use std::fmt;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use zeroize::Zeroizing;

use crate::crypto::{sign, x25519};
use crate::error::CryptoError;

/// Long-term Ed25519 identity key pair (32-byte public, 64-byte secret)
#[derive(Clone)]
pub struct SigKeyPair {
    signing: SigningKey,
}

impl SigKeyPair {
    /// Generate a fresh signature key pair
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build from a 32-byte seed
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Build from a 64-byte NaCl secret key (seed || public key)
    ///
    /// The embedded public half must match the seed.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CryptoError> {
        let bytes: &[u8; sign::SECRET_KEY_LEN] =
            secret
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    what: "signature secret key",
                    expected: sign::SECRET_KEY_LEN,
                    got: secret.len(),
                })?;

        let signing = SigningKey::from_keypair_bytes(bytes).map_err(|_| CryptoError::InvalidKey {
            what: "signature secret key does not match its public half",
        })?;

        Ok(Self { signing })
    }

    /// Build from separate public and secret halves, as handed over by callers
    pub fn from_parts(public: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        if public.len() != sign::PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                what: "signature public key",
                expected: sign::PUBLIC_KEY_LEN,
                got: public.len(),
            });
        }
        let pair = Self::from_secret_bytes(secret)?;
        if pair.public_key()[..] != *public {
            return Err(CryptoError::InvalidKey {
                what: "signature public key does not match secret key",
            });
        }
        Ok(pair)
    }

    /// Public signature key
    pub fn public_key(&self) -> [u8; sign::PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// 64-byte NaCl secret key (seed || public key)
    pub fn secret_bytes(&self) -> Zeroizing<[u8; sign::SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing.to_keypair_bytes())
    }

    /// Sign a message with this identity
    pub fn sign(&self, message: &[u8]) -> [u8; sign::SIGNATURE_LEN] {
        sign::sign(message, &self.signing)
    }
}

impl fmt::Debug for SigKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigKeyPair")
            .field("public", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Single-handshake X25519 key pair
pub struct ExchangeKeyPair {
    secret: Zeroizing<[u8; x25519::KEY_LEN]>,
    public: [u8; x25519::KEY_LEN],
}

impl ExchangeKeyPair {
    /// Generate a fresh ephemeral key pair
    pub fn generate() -> Self {
        let (secret, public) = x25519::generate_keypair();
        Self {
            secret: Zeroizing::new(secret),
            public,
        }
    }

    /// Build from a 32-byte secret key
    pub fn from_secret(secret: [u8; x25519::KEY_LEN]) -> Self {
        let public = x25519::public_key(&secret);
        Self {
            secret: Zeroizing::new(secret),
            public,
        }
    }

    /// Build from separate public and secret halves
    pub fn from_parts(public: &[u8], secret: &[u8]) -> Result<Self, CryptoError> {
        let secret: [u8; x25519::KEY_LEN] =
            secret
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    what: "exchange secret key",
                    expected: x25519::KEY_LEN,
                    got: secret.len(),
                })?;
        if public.len() != x25519::KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                what: "exchange public key",
                expected: x25519::KEY_LEN,
                got: public.len(),
            });
        }

        let pair = Self::from_secret(secret);
        if pair.public[..] != *public {
            return Err(CryptoError::InvalidKey {
                what: "exchange public key does not match secret key",
            });
        }
        Ok(pair)
    }

    /// Public exchange key
    pub fn public_key(&self) -> [u8; x25519::KEY_LEN] {
        self.public
    }

    /// Derive the session key shared with the owner of `their_public`
    pub fn session_key(
        &self,
        their_public: &[u8; x25519::KEY_LEN],
    ) -> Result<Zeroizing<[u8; x25519::KEY_LEN]>, CryptoError> {
        if !x25519::is_valid_public_key(their_public) {
            return Err(CryptoError::ZeroPeerKey);
        }
        Ok(x25519::session_key(&self.secret, their_public))
    }
}

impl fmt::Debug for ExchangeKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeKeyPair")
            .field("public", &hex::encode(self.public))
            .finish_non_exhaustive()
    }
}

/// Parse a 32-byte public key from a slice
pub fn public_key_from_slice(
    what: &'static str,
    bytes: &[u8],
) -> Result<[u8; sign::PUBLIC_KEY_LEN], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        what,
        expected: sign::PUBLIC_KEY_LEN,
        got: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_keypair_secret_roundtrip() {
        let pair = SigKeyPair::generate();
        let secret = pair.secret_bytes();

        assert_eq!(&secret[32..], &pair.public_key()[..]);

        let restored = SigKeyPair::from_secret_bytes(&secret[..]).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());
    }

    #[test]
    fn test_sig_keypair_rejects_bad_length() {
        let err = SigKeyPair::from_secret_bytes(&[0u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            CryptoError::InvalidKeyLength { expected: 64, got: 32, .. }
        ));
    }

    #[test]
    fn test_sig_keypair_rejects_mismatched_halves() {
        let pair = SigKeyPair::generate();
        let other = SigKeyPair::generate();

        let mut secret = *pair.secret_bytes();
        secret[32..].copy_from_slice(&other.public_key());
        assert!(SigKeyPair::from_secret_bytes(&secret).is_err());

        assert!(SigKeyPair::from_parts(&other.public_key(), &pair.secret_bytes()[..]).is_err());
    }

    #[test]
    fn test_exchange_keypair_from_parts() {
        let pair = ExchangeKeyPair::generate();
        let secret = *pair.secret;

        let restored = ExchangeKeyPair::from_parts(&pair.public_key(), &secret).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        assert!(ExchangeKeyPair::from_parts(&[0u8; 31], &secret).is_err());
        assert!(ExchangeKeyPair::from_parts(&[1u8; 32], &secret).is_err());
    }

    #[test]
    fn test_exchange_rejects_zero_peer_key() {
        let pair = ExchangeKeyPair::generate();
        assert!(matches!(
            pair.session_key(&[0u8; 32]),
            Err(CryptoError::ZeroPeerKey)
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let pair = SigKeyPair::from_seed(&[5u8; 32]);
        let text = format!("{:?}", pair);
        assert!(text.contains(&hex::encode(pair.public_key())));
        assert!(!text.contains(&hex::encode([5u8; 32])));
    }
}
