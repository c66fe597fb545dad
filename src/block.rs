//! Block construction and context-free block checks

use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::pow::ProofOfWork;
use crate::types::*;
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

/// NewBlock: 𝒯𝒳* × ℍ × ℕ → ℬ
///
/// 1. Stamp the block with the current time
/// 2. Run the proof-of-work search over its committed fields
/// 3. Store the winning nonce and hash
pub fn new_block(
    pow: &ProofOfWork,
    transactions: Vec<Transaction>,
    prev_hash: ByteString,
    height: u64,
) -> Result<Block> {
    let mut block = Block {
        timestamp: now(),
        nonce: 0,
        transactions,
        prev_hash,
        hash: Vec::new(),
        height,
    };

    let (nonce, hash) = pow.mine(&block)?;
    block.nonce = nonce;
    block.hash = hash.to_vec();
    Ok(block)
}

/// Genesis block: a single coinbase, no parent, height 0
pub fn new_genesis_block(pow: &ProofOfWork, coinbase: Transaction) -> Result<Block> {
    new_block(pow, vec![coinbase], Vec::new(), 0)
}

/// CheckProofOfWork: ℬ → {valid, invalid}
///
/// 1. SHA256(prepare(b, b.nonce)) < target
/// 2. The stored hash equals the recomputed one
pub fn check_proof_of_work(pow: &ProofOfWork, block: &Block) -> Result<()> {
    let computed = pow.compute_hash(block)?;
    if block.hash != computed.to_vec() {
        return Err(NodeError::InvalidProofOfWork(format!(
            "stored hash {} does not match {}",
            hex::encode(&block.hash),
            hex::encode(computed)
        )));
    }
    if !pow.validate(block)? {
        return Err(NodeError::InvalidProofOfWork(format!(
            "hash {} above target",
            hex::encode(&block.hash)
        )));
    }
    Ok(())
}

/// CheckBlockStructure: ℬ → {valid, invalid}
///
/// 1. At least one transaction; the first one is the only coinbase
/// 2. Coinbase issues no more than the subsidy
/// 3. Every transaction id matches its contents
/// 4. No transaction appears twice
/// 5. No output is consumed by two inputs of the block
pub fn check_block_structure(block: &Block) -> Result<()> {
    let coinbase = block
        .transactions
        .first()
        .ok_or_else(|| NodeError::BlockValidation("block has no transactions".to_string()))?;

    if !coinbase.is_coinbase() {
        return Err(NodeError::BlockValidation("first transaction must be coinbase".to_string()));
    }
    if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(NodeError::BlockValidation("more than one coinbase".to_string()));
    }

    let issued: Amount = coinbase.vout.iter().map(|o| o.value).sum();
    if issued > SUBSIDY {
        return Err(NodeError::BlockValidation(format!(
            "coinbase issues {} above subsidy {}",
            issued, SUBSIDY
        )));
    }

    let mut seen = HashSet::new();
    let mut consumed = HashSet::new();
    for tx in &block.transactions {
        if tx.id != tx.hash()? {
            return Err(NodeError::BlockValidation(format!(
                "transaction id {} does not match contents",
                hex::encode(&tx.id)
            )));
        }
        if !seen.insert(tx.id.clone()) {
            return Err(NodeError::BlockValidation(format!(
                "duplicate transaction {}",
                hex::encode(&tx.id)
            )));
        }
        if tx.is_coinbase() {
            continue;
        }
        for input in &tx.vin {
            if !consumed.insert((input.txid.clone(), input.vout)) {
                return Err(NodeError::BlockValidation(format!(
                    "output {}:{} spent twice in block",
                    hex::encode(&input.txid),
                    input.vout
                )));
            }
        }
    }

    Ok(())
}

pub fn serialize(block: &Block) -> Result<ByteString> {
    Ok(bincode::serialize(block)?)
}

pub fn deserialize(data: &[u8]) -> Result<Block> {
    Ok(bincode::deserialize(data)?)
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
