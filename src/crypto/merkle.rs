// Merkle tree over arbitrary byte sequences.
//
// The input is padded to the next power of two by duplicating the last
// element, so every level pairs up evenly. Leaves are SHA3-256 of the
// element bytes, internal nodes SHA3-256(left || right).

use crate::crypto::hash::{hash_sha3_256, hash_sha3_256_concat, HASH_BYTES};

pub fn next_power_of_two(n: usize) -> usize {
    let mut m = 1usize;
    while m < n {
        m <<= 1;
    }
    m
}

pub fn merkle_root<T: AsRef<[u8]>>(items: &[T]) -> [u8; HASH_BYTES] {
    if items.is_empty() {
        return [0u8; HASH_BYTES];
    }

    let mut level: Vec<[u8; HASH_BYTES]> =
        items.iter().map(|i| hash_sha3_256(i.as_ref())).collect();

    // Pad by duplicating the last leaf up to the next power of two.
    let target = next_power_of_two(level.len());
    while level.len() < target {
        let last = level[level.len() - 1];
        level.push(last);
    }

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len() / 2);
        for pair in level.chunks(2) {
            next.push(hash_sha3_256_concat(&pair[0], &pair[1]));
        }
        level = next;
    }
    level[0]
}
