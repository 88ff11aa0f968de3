//! SHA-512 transcript hashing

use sha2::{Digest, Sha512};

/// Length of a SHA-512 digest
pub const HASH_LEN: usize = 64;

/// SHA-512 hash of a single input
pub fn hash(data: &[u8]) -> [u8; HASH_LEN] {
    let digest = Sha512::digest(data);
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    out
}
