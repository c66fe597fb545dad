//! UTXO index: a derived cache of unspent outputs keyed by transaction id

use crate::blockchain::Blockchain;
use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::types::*;
use parking_lot::Mutex;
use sled::{Batch, Tree};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Unspent outputs per transaction id, stored in the `chainstate` tree next to the ledger.
///
/// Entries are replaced wholesale per transaction id; writers hold `write_lock` so a reindex
/// and an incremental update never interleave.
pub struct UtxoSet {
    blockchain: Arc<Blockchain>,
    tree: Tree,
    write_lock: Mutex<()>,
}

impl UtxoSet {
    pub fn new(blockchain: Arc<Blockchain>) -> Result<Self> {
        let tree = blockchain.open_tree(UTXO_TREE)?;
        Ok(Self {
            blockchain,
            tree,
            write_lock: Mutex::new(()),
        })
    }

    pub fn blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Reindex: ℒ → 𝒰𝒮
    ///
    /// 1. Replay the whole chain for unspent outputs
    /// 2. In one batch, drop every existing entry and write the replayed ones
    pub fn reindex(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        let unspent = self.blockchain.find_all_unspent()?;

        let mut batch = Batch::default();
        for key in self.tree.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outputs) in &unspent {
            let key = hex::decode(txid).map_err(|e| NodeError::UtxoNotFound(e.to_string()))?;
            batch.insert(key, bincode::serialize(outputs)?);
        }
        self.tree.apply_batch(batch)?;

        info!(transactions = unspent.len(), "reindexed UTXO set");
        Ok(())
    }

    /// Update: 𝒰𝒮 × ℬ → 𝒰𝒮
    ///
    /// For each transaction tx in the block:
    /// 1. If tx is not coinbase, remove each consumed output (by original index) from the
    ///    referenced entry; drop the entry once empty
    /// 2. Write tx's full output list as unspent
    ///
    /// Entries touched earlier in the same block are read back from the pending set, and the
    /// whole block lands in one batch.
    pub fn update(&self, block: &Block) -> Result<()> {
        let _guard = self.write_lock.lock();

        let mut pending: HashMap<ByteString, Option<TxOutputs>> = HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.vin {
                    let current = match pending.get(&input.txid) {
                        Some(entry) => entry.clone(),
                        None => self.get(&input.txid)?,
                    };
                    let mut outs = current.ok_or_else(|| {
                        NodeError::UtxoNotFound(format!("{}:{}", hex::encode(&input.txid), input.vout))
                    })?;

                    outs.outputs.retain(|u| u.index != input.vout);
                    let updated = if outs.is_empty() { None } else { Some(outs) };
                    pending.insert(input.txid.clone(), updated);
                }
            }

            let outs = TxOutputs::from_transaction(tx);
            if !outs.is_empty() {
                pending.insert(tx.id.clone(), Some(outs));
            }
        }

        let mut batch = Batch::default();
        for (key, entry) in &pending {
            match entry {
                Some(outs) => batch.insert(key.as_slice(), bincode::serialize(outs)?),
                None => batch.remove(key.as_slice()),
            }
        }
        self.tree.apply_batch(batch)?;

        debug!(
            hash = %hex::encode(&block.hash),
            entries = pending.len(),
            "updated UTXO set"
        );
        Ok(())
    }

    /// FindSpendableOutputs: ℍ₁₆₀ × ℤ → ℤ × (ℍ → ℕ*)
    ///
    /// First fit: accumulate outputs locked to `pub_key_hash` until `amount` is reached.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: Amount,
    ) -> Result<(Amount, BTreeMap<String, Vec<i64>>)> {
        let mut unspent: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        let mut accumulated: Amount = 0;

        'scan: for entry in self.tree.iter() {
            let (key, value) = entry?;
            let outs: TxOutputs = bincode::deserialize(&value)?;
            let txid = hex::encode(&key);

            for u in &outs.outputs {
                if accumulated >= amount {
                    break 'scan;
                }
                if u.output.is_locked_with_key(pub_key_hash) {
                    accumulated += u.output.value;
                    unspent.entry(txid.clone()).or_default().push(u.index);
                }
            }
        }

        Ok((accumulated, unspent))
    }

    /// Every unspent output locked to `pub_key_hash`
    pub fn find_utxo(&self, pub_key_hash: &[u8]) -> Result<Vec<TxOutput>> {
        let mut utxos = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry?;
            let outs: TxOutputs = bincode::deserialize(&value)?;
            utxos.extend(
                outs.outputs
                    .into_iter()
                    .filter(|u| u.output.is_locked_with_key(pub_key_hash))
                    .map(|u| u.output),
            );
        }
        Ok(utxos)
    }

    pub fn balance(&self, pub_key_hash: &[u8]) -> Result<Amount> {
        Ok(self.find_utxo(pub_key_hash)?.iter().map(|o| o.value).sum())
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> Result<usize> {
        let mut count = 0;
        for key in self.tree.iter().keys() {
            key?;
            count += 1;
        }
        Ok(count)
    }

    pub fn is_unspent(&self, txid: &[u8], vout: i64) -> Result<bool> {
        Ok(self
            .get(txid)?
            .map_or(false, |outs| outs.outputs.iter().any(|u| u.index == vout)))
    }

    /// The whole index as `txIdHex -> outputs`
    pub fn snapshot(&self) -> Result<HashMap<String, TxOutputs>> {
        let mut all = HashMap::new();
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            all.insert(hex::encode(&key), bincode::deserialize(&value)?);
        }
        Ok(all)
    }

    fn get(&self, txid: &[u8]) -> Result<Option<TxOutputs>> {
        match self.tree.get(txid)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}
