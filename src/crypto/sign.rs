//! Ed25519 signatures over handshake transcripts

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Ed25519 public key length
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 secret key length (seed followed by public key, NaCl layout)
pub const SECRET_KEY_LEN: usize = 64;

/// Ed25519 signature length
pub const SIGNATURE_LEN: usize = 64;

/// Sign a message (deterministic)
pub fn sign(message: &[u8], key: &SigningKey) -> [u8; SIGNATURE_LEN] {
    key.sign(message).to_bytes()
}

/// Verify a detached signature
///
/// Returns false for malformed public keys as well as bad signatures.
pub fn verify(
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
    public_key: &[u8; PUBLIC_KEY_LEN],
) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}
