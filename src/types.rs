//! Core ledger types: blocks, transactions and their outputs

use serde::{Deserialize, Serialize};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// 20-byte RIPEMD160(SHA256(pubkey)) locking hash
pub type PubKeyHash = Vec<u8>;

/// Coin amount
pub type Amount = i64;

/// Transaction Input: ℐ = ℍ × ℤ × 𝕊 × 𝕊
///
/// References exactly one prior output by (`txid`, `vout`). A coinbase input carries an
/// empty `txid`, `vout == -1` and arbitrary data in `pub_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub txid: ByteString,
    pub vout: i64,
    pub signature: ByteString,
    pub pub_key: ByteString,
}

/// Transaction Output: 𝒯 = ℤ × ℍ₁₆₀
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    pub pub_key_hash: PubKeyHash,
}

impl TxOutput {
    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.as_slice() == pub_key_hash
    }
}

/// Transaction: 𝒯𝒳 = ℍ × ℐ* × 𝒯*
///
/// `id = SHA-256(serialize(tx with id and signatures cleared))`, taken before signing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: ByteString,
    pub vin: Vec<TxInput>,
    pub vout: Vec<TxOutput>,
}

/// Block: ℬ = ℤ × ℤ × 𝒯𝒳* × ℍ × ℍ × ℕ
///
/// An empty `prev_hash` marks the genesis block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub timestamp: i64,
    pub nonce: i64,
    pub transactions: Vec<Transaction>,
    pub prev_hash: ByteString,
    pub hash: ByteString,
    pub height: u64,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_empty()
    }
}

/// An unspent output remembered together with its position in the creating transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutput {
    pub index: i64,
    pub output: TxOutput,
}

/// The value stored per transaction id in the UTXO index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutputs {
    pub outputs: Vec<UnspentOutput>,
}

impl TxOutputs {
    /// Every output of `tx`, in order, tagged with its original index
    pub fn from_transaction(tx: &Transaction) -> Self {
        Self {
            outputs: tx
                .vout
                .iter()
                .enumerate()
                .map(|(index, output)| UnspentOutput {
                    index: index as i64,
                    output: output.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub fn total_value(&self) -> Amount {
        self.outputs.iter().map(|u| u.output.value).sum()
    }
}
