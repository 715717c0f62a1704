// Cryptographic hashing wrappers
use sha3::{Digest, Sha3_256};

pub const HASH_BYTES: usize = 32;

/// SHA3-256: used for transaction ids, proof of work and Merkle hashing
pub fn hash_sha3_256(data: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA3-256 concat: hashes a then b without allocating a temporary Vec
pub fn hash_sha3_256_concat(a: &[u8], b: &[u8]) -> [u8; HASH_BYTES] {
    let mut hasher = Sha3_256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha3_256_length() {
        let hash = hash_sha3_256(b"minichain");
        assert_eq!(hash.len(), 32);
    }

    #[test]
    fn test_concat_matches_joined() {
        let joined = hash_sha3_256(b"leftright");
        assert_eq!(hash_sha3_256_concat(b"left", b"right"), joined);
    }
}
