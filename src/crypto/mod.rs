//! Cryptographic primitives for Salt Channel
//!
//! Thin wrappers over the primitive libraries, byte-compatible with NaCl:
//! - SHA-512 transcript hashing (hash)
//! - Ed25519 signatures (sign)
//! - X25519 key agreement and session-key derivation (x25519)
//! - XSalsa20-Poly1305 authenticated encryption (secretbox)
//! - Typed, validated key pairs (keys)

pub mod hash;
pub mod keys;
pub mod secretbox;
pub mod sign;
pub mod x25519;

pub use keys::{ExchangeKeyPair, SigKeyPair};
