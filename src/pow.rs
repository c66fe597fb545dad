//! Proof of Work engine: nonce search and validation over a block's committed fields

use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::merkle::{merkle_root, sha256_hash};
use crate::transaction;
use crate::types::*;
use tracing::debug;

/// Proof-of-work engine for a fixed difficulty.
///
/// The target is `2^(256 - bits)`; it never changes for the life of a network.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    bits: u32,
    target: U256,
}

impl ProofOfWork {
    pub fn new(bits: u32) -> Self {
        Self {
            bits,
            target: U256::one().shl(256 - bits.min(256)),
        }
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Prepare: ℬ × ℤ → 𝕊
    ///
    /// prevHash ‖ merkleRoot ‖ BE64(timestamp) ‖ BE64(bits) ‖ BE64(nonce)
    pub fn prepare(&self, block: &Block, nonce: i64) -> Result<ByteString> {
        let merkle = hash_transactions(&block.transactions)?;

        let mut data = Vec::with_capacity(block.prev_hash.len() + 32 + 24);
        data.extend_from_slice(&block.prev_hash);
        data.extend_from_slice(&merkle);
        data.extend_from_slice(&block.timestamp.to_be_bytes());
        data.extend_from_slice(&(self.bits as i64).to_be_bytes());
        data.extend_from_slice(&nonce.to_be_bytes());
        Ok(data)
    }

    /// Mine: ℬ → ℤ × ℍ
    ///
    /// Search nonces from 0 upward for the first SHA256(prepare(b, n)) < target.
    /// The header prefix is fixed, so only the nonce suffix is rewritten per attempt.
    pub fn mine(&self, block: &Block) -> Result<(i64, Hash)> {
        let mut data = self.prepare(block, 0)?;
        let nonce_at = data.len() - 8;

        let mut nonce: i64 = 0;
        while nonce < MAX_NONCE {
            data[nonce_at..].copy_from_slice(&nonce.to_be_bytes());
            let hash = sha256_hash(&data);

            if U256::from_be_bytes(&hash) < self.target {
                debug!(nonce, hash = %hex::encode(hash), "proof of work found");
                return Ok((nonce, hash));
            }
            nonce += 1;
        }

        Err(NodeError::NonceSpaceExhausted)
    }

    /// Validate: ℬ → {true, false}
    ///
    /// SHA256(prepare(b, b.nonce)) < target
    pub fn validate(&self, block: &Block) -> Result<bool> {
        let hash = self.compute_hash(block)?;
        Ok(U256::from_be_bytes(&hash) < self.target)
    }

    /// Hash of the block's committed fields at its stored nonce
    pub fn compute_hash(&self, block: &Block) -> Result<Hash> {
        let data = self.prepare(block, block.nonce)?;
        Ok(sha256_hash(&data))
    }
}

impl Default for ProofOfWork {
    fn default() -> Self {
        Self::new(TARGET_BITS)
    }
}

/// Merkle root over the serialized transactions of a block
pub fn hash_transactions(transactions: &[Transaction]) -> Result<Hash> {
    let serialized = transactions
        .iter()
        .map(transaction::serialize)
        .collect::<Result<Vec<_>>>()?;
    Ok(merkle_root(&serialized))
}

/// 256-bit unsigned integer for target comparisons
#[derive(Debug, Clone, PartialEq, Eq)]
struct U256([u64; 4]); // little-endian words

impl U256 {
    fn zero() -> Self {
        U256([0; 4])
    }

    fn one() -> Self {
        U256([1, 0, 0, 0])
    }

    #[cfg(test)]
    fn is_zero(&self) -> bool {
        self.0.iter().all(|&x| x == 0)
    }

    fn shl(&self, shift: u32) -> Self {
        if shift >= 256 {
            return U256::zero();
        }

        let mut result = U256::zero();
        let word_shift = (shift / 64) as usize;
        let bit_shift = shift % 64;

        for i in 0..4 {
            if i + word_shift < 4 {
                result.0[i + word_shift] |= self.0[i] << bit_shift;
                if bit_shift > 0 && i + word_shift + 1 < 4 {
                    result.0[i + word_shift + 1] |= self.0[i] >> (64 - bit_shift);
                }
            }
        }

        result
    }

    fn from_be_bytes(bytes: &[u8; 32]) -> Self {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            let start = (3 - i) * 8;
            let mut buf = [0u8; 8];
            buf.copy_from_slice(&bytes[start..start + 8]);
            *word = u64::from_be_bytes(buf);
        }
        U256(words)
    }
}

impl PartialOrd for U256 {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for U256 {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        for (a, b) in self.0.iter().rev().zip(other.0.iter().rev()) {
            match a.cmp(b) {
                std::cmp::Ordering::Equal => continue,
                other => return other,
            }
        }
        std::cmp::Ordering::Equal
    }
}
