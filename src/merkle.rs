//! Merkle commitment over a block's transactions

use crate::types::*;
use sha2::{Digest, Sha256};

/// MerkleRoot: 𝕊* → ℍ
///
/// For serialized transactions d₀..dₙ:
/// 1. Leaves are SHA256(dᵢ)
/// 2. Pair adjacent nodes and hash their concatenation
/// 3. An odd node at the end of a level is paired with itself
/// 4. Repeat until one node remains
///
/// An empty list commits to SHA256 of nothing.
pub fn merkle_root(data: &[ByteString]) -> Hash {
    if data.is_empty() {
        return sha256_hash(&[]);
    }

    let mut hashes: Vec<Hash> = data.iter().map(|d| sha256_hash(d)).collect();

    while hashes.len() > 1 {
        let mut next_level = Vec::with_capacity((hashes.len() + 1) / 2);

        for chunk in hashes.chunks(2) {
            let right = if chunk.len() == 2 { &chunk[1] } else { &chunk[0] };
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(&chunk[0]);
            combined.extend_from_slice(right);
            next_level.push(sha256_hash(&combined));
        }

        hashes = next_level;
    }

    hashes[0]
}

/// Simple SHA256 hash function
pub fn sha256_hash(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}
