//! Wallet collaborator: P-256 key pairs, public-key hashes and Base58Check addresses
//!
//! Key pairs live only in memory; persisting them is the caller's business.

use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::types::*;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

/// A P-256 key pair. `public_key` is the raw X‖Y concatenation (64 bytes).
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    public_key: ByteString,
}

impl Wallet {
    /// Generate a fresh key pair
    pub fn new() -> Self {
        Self::from_signing_key(SigningKey::random(&mut OsRng))
    }

    /// Restore a key pair from its 32-byte secret scalar
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|e| NodeError::InvalidKey(e.to_string()))?;
        Ok(Self::from_signing_key(signing_key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let point = signing_key.verifying_key().to_encoded_point(false);
        // drop the 0x04 SEC1 tag
        let public_key = point.as_bytes()[1..].to_vec();
        Self {
            signing_key,
            public_key,
        }
    }

    pub fn secret_bytes(&self) -> ByteString {
        self.signing_key.to_bytes().to_vec()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn pub_key_hash(&self) -> PubKeyHash {
        hash_pub_key(&self.public_key)
    }

    pub fn address(&self) -> String {
        address_of(&self.pub_key_hash())
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

/// HashPubKey: 𝕊 → ℍ₁₆₀
///
/// RIPEMD160(SHA256(pubkey))
pub fn hash_pub_key(public_key: &[u8]) -> PubKeyHash {
    let sha = Sha256::digest(public_key);
    Ripemd160::digest(sha).to_vec()
}

/// First four bytes of SHA256(SHA256(payload))
pub fn checksum(payload: &[u8]) -> [u8; ADDRESS_CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut out = [0u8; ADDRESS_CHECKSUM_LEN];
    out.copy_from_slice(&second[..ADDRESS_CHECKSUM_LEN]);
    out
}

/// Base58Check(version ‖ pubKeyHash ‖ checksum)
pub fn address_of(pub_key_hash: &[u8]) -> String {
    let mut payload = Vec::with_capacity(1 + pub_key_hash.len() + ADDRESS_CHECKSUM_LEN);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(pub_key_hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Inverse of [`address_of`], rejecting bad Base58, wrong length, wrong version or checksum
pub fn decode_address(address: &str) -> Result<PubKeyHash> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| NodeError::InvalidAddress(format!("{}: {}", address, e)))?;

    if bytes.len() != 1 + PUB_KEY_HASH_LEN + ADDRESS_CHECKSUM_LEN {
        return Err(NodeError::InvalidAddress(address.to_string()));
    }

    let (versioned, check) = bytes.split_at(bytes.len() - ADDRESS_CHECKSUM_LEN);
    if versioned[0] != ADDRESS_VERSION || checksum(versioned).as_slice() != check {
        return Err(NodeError::InvalidAddress(address.to_string()));
    }

    Ok(versioned[1..].to_vec())
}

pub fn validate_address(address: &str) -> bool {
    decode_address(address).is_ok()
}

/// Rebuild a P-256 verifying key from raw X‖Y bytes.
///
/// Coordinates shorter than 32 bytes are left-padded, so keys whose coordinates were
/// encoded without leading zeros still parse.
pub fn verifying_key_from_raw(raw: &[u8]) -> Result<VerifyingKey> {
    if raw.is_empty() || raw.len() % 2 != 0 || raw.len() > 64 {
        return Err(NodeError::InvalidKey(format!("public key length {}", raw.len())));
    }

    let half = raw.len() / 2;
    let mut sec1 = [0u8; 65];
    sec1[0] = 0x04;
    sec1[1 + 32 - half..33].copy_from_slice(&raw[..half]);
    sec1[33 + 32 - half..].copy_from_slice(&raw[half..]);

    VerifyingKey::from_sec1_bytes(&sec1).map_err(|e| NodeError::InvalidKey(e.to_string()))
}
