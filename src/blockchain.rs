//! Ledger store: the persisted, hash-linked chain of blocks and its tip pointer

use crate::block;
use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::pow::ProofOfWork;
use crate::transaction::{self, PrevTransactions};
use crate::types::*;
use p256::ecdsa::SigningKey;
use parking_lot::{Mutex, RwLock};
use sled::{Batch, Db, Tree};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A sled-backed chain of blocks.
///
/// The `blocks` tree maps `blockHash -> serializedBlock` plus the tip pointer under `"l"`.
/// Reads go straight to sled; appends are serialized by `append_lock` so the tip read,
/// the block write and the tip move happen as one step.
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    path: PathBuf,
    pow: ProofOfWork,
    tip: RwLock<ByteString>,
    append_lock: Mutex<()>,
}

impl Blockchain {
    /// Create a new ledger whose genesis block rewards `address`
    pub fn create(path: impl AsRef<Path>, address: &str, difficulty_bits: u32) -> Result<Self> {
        let coinbase = transaction::new_coinbase(address, GENESIS_COINBASE_DATA)?;
        Self::create_with_coinbase(path, coinbase, difficulty_bits)
    }

    /// Create: 𝒯𝒳 → ℒ
    ///
    /// 1. Fail if a ledger already exists at `path`
    /// 2. Mine a genesis block holding only `coinbase`
    /// 3. Persist it and point the tip at it in one batch
    pub fn create_with_coinbase(
        path: impl AsRef<Path>,
        coinbase: Transaction,
        difficulty_bits: u32,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if blocks.contains_key(TIP_KEY)? {
            return Err(NodeError::LedgerExists(path.display().to_string()));
        }

        let pow = ProofOfWork::new(difficulty_bits);
        let genesis = block::new_genesis_block(&pow, coinbase)?;

        let mut batch = Batch::default();
        batch.insert(genesis.hash.as_slice(), block::serialize(&genesis)?);
        batch.insert(TIP_KEY, genesis.hash.as_slice());
        blocks.apply_batch(batch)?;
        db.flush()?;

        info!(path = %path.display(), hash = %hex::encode(&genesis.hash), "created blockchain");

        Ok(Self {
            db,
            blocks,
            path,
            pow,
            tip: RwLock::new(genesis.hash),
            append_lock: Mutex::new(()),
        })
    }

    /// Open an existing ledger, failing if none exists at `path`
    pub fn open(path: impl AsRef<Path>, difficulty_bits: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(NodeError::LedgerMissing(path.display().to_string()));
        }

        let db = sled::open(&path)?;
        let blocks = db.open_tree(BLOCKS_TREE)?;
        let tip = blocks
            .get(TIP_KEY)?
            .ok_or_else(|| NodeError::LedgerMissing(path.display().to_string()))?
            .to_vec();

        debug!(path = %path.display(), tip = %hex::encode(&tip), "opened blockchain");

        Ok(Self {
            db,
            blocks,
            path,
            pow: ProofOfWork::new(difficulty_bits),
            tip: RwLock::new(tip),
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pow(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn tip_hash(&self) -> ByteString {
        self.tip.read().clone()
    }

    pub(crate) fn open_tree(&self, name: &str) -> Result<Tree> {
        Ok(self.db.open_tree(name)?)
    }

    /// Append (MineBlock): 𝒯𝒳* → ℬ
    ///
    /// 1. Verify every transaction against the chain; any failure aborts
    /// 2. Require every input to consume a distinct output unspent at the tip
    /// 3. Mine a block on top of the current tip
    /// 4. Persist the block and move the tip in one batch
    pub fn append(&self, transactions: Vec<Transaction>) -> Result<Block> {
        let _guard = self.append_lock.lock();
        let tip = self.tip_hash();

        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                return Err(NodeError::InvalidTransaction(hex::encode(&tx.id)));
            }
        }
        self.check_unspent(&tip, &transactions)?;

        let height = self.get_block(&tip)?.height + 1;
        let new_block = block::new_block(&self.pow, transactions, tip, height)?;
        self.store(&new_block, true)?;

        info!(
            height,
            hash = %hex::encode(&new_block.hash),
            txs = new_block.transactions.len(),
            "mined block"
        );
        Ok(new_block)
    }

    /// AddBlock: ℬ → {stored, ignored}
    ///
    /// For a block received from a peer:
    /// 1. Ignore it if already stored
    /// 2. Check proof of work and structure
    /// 3. Require a known parent and height = parent height + 1
    /// 4. Verify every transaction against the parent's chain, and every input against
    ///    the outputs unspent on that chain
    /// 5. Store it; move the tip only if its height exceeds the tip's
    ///
    /// Returns whether the tip moved.
    pub fn add_block(&self, new_block: &Block) -> Result<bool> {
        let _guard = self.append_lock.lock();

        if self.has_block(&new_block.hash)? {
            debug!(hash = %hex::encode(&new_block.hash), "block already stored");
            return Ok(false);
        }

        block::check_proof_of_work(&self.pow, new_block)?;
        block::check_block_structure(new_block)?;

        if new_block.is_genesis() {
            if new_block.height != 0 || new_block.transactions.len() != 1 {
                return Err(NodeError::BlockValidation(
                    "genesis must be height 0 with only a coinbase".to_string(),
                ));
            }
        } else {
            let parent = self.get_block(&new_block.prev_hash).map_err(|_| {
                NodeError::BlockValidation(format!(
                    "unknown parent {}",
                    hex::encode(&new_block.prev_hash)
                ))
            })?;
            if new_block.height != parent.height + 1 {
                return Err(NodeError::BlockValidation(format!(
                    "height {} does not follow parent height {}",
                    new_block.height, parent.height
                )));
            }

            for tx in new_block.transactions.iter().filter(|tx| !tx.is_coinbase()) {
                let prev_txs = self
                    .prev_transactions_from(&new_block.prev_hash, tx)
                    .map_err(|e| NodeError::BlockValidation(e.to_string()))?;
                let valid = tx
                    .verify(&prev_txs)
                    .map_err(|e| NodeError::BlockValidation(e.to_string()))?;
                if !valid {
                    return Err(NodeError::BlockValidation(format!(
                        "transaction {} failed verification",
                        hex::encode(&tx.id)
                    )));
                }
            }

            self.check_unspent(&new_block.prev_hash, &new_block.transactions)
                .map_err(|e| NodeError::BlockValidation(e.to_string()))?;
        }

        let tip_height = self.get_block(&self.tip_hash())?.height;
        let extends = new_block.height > tip_height;
        self.store(new_block, extends)?;

        info!(
            height = new_block.height,
            hash = %hex::encode(&new_block.hash),
            tip_moved = extends,
            "added block"
        );
        Ok(extends)
    }

    fn store(&self, new_block: &Block, move_tip: bool) -> Result<()> {
        let mut batch = Batch::default();
        batch.insert(new_block.hash.as_slice(), block::serialize(new_block)?);
        if move_tip {
            batch.insert(TIP_KEY, new_block.hash.as_slice());
        }
        self.blocks.apply_batch(batch)?;

        if move_tip {
            *self.tip.write() = new_block.hash.clone();
        }
        Ok(())
    }

    /// Blocks from the tip back to genesis
    pub fn iter(&self) -> BlockchainIterator<'_> {
        self.iter_from(self.tip_hash())
    }

    pub fn iter_from(&self, hash: ByteString) -> BlockchainIterator<'_> {
        BlockchainIterator {
            current_hash: Some(hash),
            blocks: &self.blocks,
        }
    }

    pub fn get_block(&self, hash: &[u8]) -> Result<Block> {
        let data = self
            .blocks
            .get(hash)?
            .ok_or_else(|| NodeError::BlockNotFound(hex::encode(hash)))?;
        block::deserialize(&data)
    }

    pub fn has_block(&self, hash: &[u8]) -> Result<bool> {
        if hash == TIP_KEY {
            return Ok(false);
        }
        Ok(self.blocks.contains_key(hash)?)
    }

    /// Number of blocks reachable from the tip
    pub fn best_height(&self) -> Result<u64> {
        Ok(self.get_block(&self.tip_hash())?.height + 1)
    }

    /// Hashes of every block from the tip back to genesis
    pub fn block_hashes(&self) -> Result<Vec<ByteString>> {
        self.iter().map(|b| b.map(|b| b.hash)).collect()
    }

    /// FindTransaction: ℍ → 𝒯𝒳
    ///
    /// Linear scan from the tip until a block holds a transaction with this id.
    pub fn find_transaction(&self, id: &[u8]) -> Result<Transaction> {
        self.find_transaction_from(self.tip_hash(), id)
    }

    fn find_transaction_from(&self, start: ByteString, id: &[u8]) -> Result<Transaction> {
        for b in self.iter_from(start) {
            if let Some(tx) = b?.transactions.into_iter().find(|tx| tx.id == id) {
                return Ok(tx);
            }
        }
        Err(NodeError::TransactionNotFound(hex::encode(id)))
    }

    fn prev_transactions_from(&self, start: &[u8], tx: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = PrevTransactions::new();
        for input in &tx.vin {
            let key = hex::encode(&input.txid);
            if prev_txs.contains_key(&key) {
                continue;
            }
            let prev = self
                .find_transaction_from(start.to_vec(), &input.txid)
                .map_err(|_| NodeError::MissingReferencedTransaction(key.clone()))?;
            prev_txs.insert(key, prev);
        }
        Ok(prev_txs)
    }

    /// Sign `tx` against the transactions its inputs reference in this chain
    pub fn sign_transaction(&self, tx: &mut Transaction, key: &SigningKey) -> Result<()> {
        let prev_txs = self.prev_transactions_from(&self.tip_hash(), tx)?;
        tx.sign(key, &prev_txs)
    }

    /// Verify `tx` against the transactions its inputs reference in this chain
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }
        let prev_txs = self.prev_transactions_from(&self.tip_hash(), tx)?;
        tx.verify(&prev_txs)
    }

    /// FindUTXO (full replay): ℒ → (ℍ → 𝒯*)
    pub fn find_all_unspent(&self) -> Result<HashMap<String, TxOutputs>> {
        self.find_unspent_from(self.tip_hash())
    }

    /// Unspent outputs of the chain ending at `start`.
    ///
    /// Walking back, every input marks (txid, vout) spent before the creating transaction
    /// is reached; whatever is left unmarked is unspent.
    pub fn find_unspent_from(&self, start: ByteString) -> Result<HashMap<String, TxOutputs>> {
        let mut unspent: HashMap<String, TxOutputs> = HashMap::new();
        let mut spent: HashMap<String, Vec<i64>> = HashMap::new();

        for b in self.iter_from(start) {
            // later transactions in a block may spend earlier ones
            for tx in b?.transactions.iter().rev() {
                let txid = hex::encode(&tx.id);

                let outputs: Vec<UnspentOutput> = TxOutputs::from_transaction(tx)
                    .outputs
                    .into_iter()
                    .filter(|u| !spent.get(&txid).map_or(false, |s| s.contains(&u.index)))
                    .collect();
                if !outputs.is_empty() {
                    unspent.insert(txid, TxOutputs { outputs });
                }

                if !tx.is_coinbase() {
                    for input in &tx.vin {
                        spent.entry(hex::encode(&input.txid)).or_default().push(input.vout);
                    }
                }
            }
        }

        Ok(unspent)
    }

    /// Every non-coinbase input must consume an output unspent on the chain ending at
    /// `start`, and no two inputs may consume the same one.
    fn check_unspent(&self, start: &[u8], transactions: &[Transaction]) -> Result<()> {
        if transactions.iter().all(|tx| tx.is_coinbase()) {
            return Ok(());
        }

        let unspent = self.find_unspent_from(start.to_vec())?;
        let mut claimed: HashSet<(String, i64)> = HashSet::new();

        for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            for input in &tx.vin {
                let txid = hex::encode(&input.txid);
                let available = unspent
                    .get(&txid)
                    .map_or(false, |outs| outs.outputs.iter().any(|u| u.index == input.vout));
                if !available || !claimed.insert((txid.clone(), input.vout)) {
                    return Err(NodeError::InvalidTransaction(format!(
                        "output {}:{} is already spent",
                        txid, input.vout
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Walks the chain from a starting hash back to genesis, one block per `next`
pub struct BlockchainIterator<'a> {
    current_hash: Option<ByteString>,
    blocks: &'a Tree,
}

impl<'a> Iterator for BlockchainIterator<'a> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current_hash.take()?;

        let data = match self.blocks.get(&hash) {
            Ok(Some(data)) => data,
            Ok(None) => return Some(Err(NodeError::BlockNotFound(hex::encode(&hash)))),
            Err(e) => return Some(Err(e.into())),
        };

        let b = match block::deserialize(&data) {
            Ok(b) => b,
            Err(e) => return Some(Err(e)),
        };

        if !b.is_genesis() {
            self.current_hash = Some(b.prev_hash.clone());
        }
        Some(Ok(b))
    }
}
