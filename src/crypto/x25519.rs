//! X25519 key agreement for Salt Channel
//!
//! Provides ephemeral key generation and derivation of the symmetric
//! session key (NaCl `box.before`: X25519 followed by HSalsa20).

use rand::rngs::OsRng;
use salsa20::cipher::consts::U10;
use salsa20::cipher::generic_array::GenericArray;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

/// Key length for X25519 (both secret and public keys are 32 bytes)
pub const KEY_LEN: usize = 32;

/// Generate a new X25519 keypair
///
/// Returns (secret_key, public_key)
pub fn generate_keypair() -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret.to_bytes(), public.to_bytes())
}

/// Derive public key from secret key
pub fn public_key(secret_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*secret_key);
    PublicKey::from(&secret).to_bytes()
}

/// Perform raw X25519 Diffie-Hellman
pub fn dh(secret_key: &[u8; KEY_LEN], public_key: &[u8; KEY_LEN]) -> [u8; KEY_LEN] {
    let secret = StaticSecret::from(*secret_key);
    let public = PublicKey::from(*public_key);
    secret.diffie_hellman(&public).to_bytes()
}

/// Derive the 32-byte session key shared by both peers
///
/// Equivalent to NaCl `crypto_box_beforenm`: HSalsa20 keyed with the
/// X25519 shared point over a zero 16-byte input.
pub fn session_key(
    my_secret: &[u8; KEY_LEN],
    their_public: &[u8; KEY_LEN],
) -> Zeroizing<[u8; KEY_LEN]> {
    let shared = Zeroizing::new(dh(my_secret, their_public));
    let derived = salsa20::hsalsa::<U10>(
        GenericArray::from_slice(&shared[..]),
        &GenericArray::default(),
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&derived);
    key
}

/// Check if a public key is usable (not all zeros)
pub fn is_valid_public_key(key: &[u8; KEY_LEN]) -> bool {
    !key.iter().all(|&b| b == 0)
}
