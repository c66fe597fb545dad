//! Peer protocol: wire messages and the node session that answers them
//!
//! Every message on the wire is a 12-byte null-padded command tag followed by the
//! bincode-encoded payload. Handlers never touch sockets; they return the messages to send
//! and leave delivery to the transport.

use crate::block;
use crate::constants::*;
use crate::error::{NodeError, Result};
use crate::transaction;
use crate::types::*;
use crate::utxo::UtxoSet;
use crate::wallet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

// ============================================================================
// WIRE MESSAGES
// ============================================================================

/// What an inventory or data request refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

/// Version handshake carrying the sender's chain length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMessage {
    pub version: i32,
    pub best_height: u64,
    pub addr_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetBlocksMessage {
    pub addr_from: String,
}

/// Inventory announcement: hashes without bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvMessage {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<ByteString>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDataMessage {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: ByteString,
}

/// A serialized block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMessage {
    pub addr_from: String,
    pub block: ByteString,
}

/// A serialized transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMessage {
    pub addr_from: String,
    pub transaction: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddrMessage {
    pub addr_list: Vec<String>,
}

/// NetworkMessage: one of the seven protocol commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    GetBlocks(GetBlocksMessage),
    Inv(InvMessage),
    GetData(GetDataMessage),
    Block(BlockMessage),
    Tx(TxMessage),
    Addr(AddrMessage),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::GetBlocks(_) => "getblocks",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Addr(_) => "addr",
        }
    }

    /// Encode: command tag ‖ bincode(payload)
    pub fn encode(&self) -> Result<ByteString> {
        let payload = match self {
            Message::Version(m) => bincode::serialize(m)?,
            Message::GetBlocks(m) => bincode::serialize(m)?,
            Message::Inv(m) => bincode::serialize(m)?,
            Message::GetData(m) => bincode::serialize(m)?,
            Message::Block(m) => bincode::serialize(m)?,
            Message::Tx(m) => bincode::serialize(m)?,
            Message::Addr(m) => bincode::serialize(m)?,
        };

        let mut data = Vec::with_capacity(COMMAND_LENGTH + payload.len());
        data.extend_from_slice(&command_to_bytes(self.command()));
        data.extend_from_slice(&payload);
        Ok(data)
    }

    /// Decode a full request; short input, an unknown tag or a bad payload is malformed
    pub fn decode(data: &[u8]) -> Result<Message> {
        if data.len() < COMMAND_LENGTH {
            return Err(NodeError::MalformedMessage(format!(
                "{} bytes is shorter than the command tag",
                data.len()
            )));
        }

        let command = bytes_to_command(&data[..COMMAND_LENGTH]);
        let payload = &data[COMMAND_LENGTH..];
        let malformed = |e: bincode::Error| NodeError::MalformedMessage(format!("{}: {}", command, e));

        let message = match command.as_str() {
            "version" => Message::Version(bincode::deserialize(payload).map_err(malformed)?),
            "getblocks" => Message::GetBlocks(bincode::deserialize(payload).map_err(malformed)?),
            "inv" => Message::Inv(bincode::deserialize(payload).map_err(malformed)?),
            "getdata" => Message::GetData(bincode::deserialize(payload).map_err(malformed)?),
            "block" => Message::Block(bincode::deserialize(payload).map_err(malformed)?),
            "tx" => Message::Tx(bincode::deserialize(payload).map_err(malformed)?),
            "addr" => Message::Addr(bincode::deserialize(payload).map_err(malformed)?),
            other => return Err(NodeError::MalformedMessage(format!("unknown command {:?}", other))),
        };
        Ok(message)
    }
}

/// ASCII command left-aligned in a zero-filled 12-byte field; longer commands are cut
pub fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    for (slot, b) in bytes.iter_mut().zip(command.bytes()) {
        *slot = b;
    }
    bytes
}

pub fn bytes_to_command(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// A message and the peer it goes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: String,
    pub message: Message,
}

impl Outbound {
    fn new(to: impl Into<String>, message: Message) -> Self {
        Self {
            to: to.into(),
            message,
        }
    }
}

// ============================================================================
// NODE SESSION
// ============================================================================

/// Known peers and the blocks still to fetch during sync
#[derive(Debug, Default)]
struct PeerBook {
    known: Vec<String>,
    in_transit: VecDeque<ByteString>,
}

impl PeerBook {
    fn add(&mut self, address: &str) -> bool {
        if self.known.iter().any(|a| a == address) {
            return false;
        }
        self.known.push(address.to_string());
        true
    }
}

/// State shared by every connection handler of one node process
pub struct Node {
    address: String,
    bootstrap_address: String,
    mining_address: Option<String>,
    utxo: Arc<UtxoSet>,
    mempool: Mutex<HashMap<String, Transaction>>,
    peers: Mutex<PeerBook>,
    mining_lock: Mutex<()>,
}

impl Node {
    /// Fails with `InvalidAddress` if a mining address is given and does not decode
    pub fn new(
        address: impl Into<String>,
        bootstrap_address: impl Into<String>,
        mining_address: Option<String>,
        utxo: Arc<UtxoSet>,
    ) -> Result<Self> {
        if let Some(mining) = &mining_address {
            if !wallet::validate_address(mining) {
                return Err(NodeError::InvalidAddress(mining.clone()));
            }
        }

        let bootstrap_address = bootstrap_address.into();
        let mut peers = PeerBook::default();
        peers.add(&bootstrap_address);

        Ok(Self {
            address: address.into(),
            bootstrap_address,
            mining_address,
            utxo,
            mempool: Mutex::new(HashMap::new()),
            peers: Mutex::new(peers),
            mining_lock: Mutex::new(()),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_bootstrap(&self) -> bool {
        self.address == self.bootstrap_address
    }

    pub fn mining_address(&self) -> Option<&str> {
        self.mining_address.as_deref()
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    pub fn known_peers(&self) -> Vec<String> {
        self.peers.lock().known.clone()
    }

    pub fn blocks_in_transit(&self) -> usize {
        self.peers.lock().in_transit.len()
    }

    pub fn mempool_len(&self) -> usize {
        self.mempool.lock().len()
    }

    pub fn mempool_contains(&self, id: &[u8]) -> bool {
        self.mempool.lock().contains_key(&hex::encode(id))
    }

    /// Opening message to the bootstrap peer; nothing when this node is the bootstrap
    pub fn handshake(&self) -> Result<Vec<Outbound>> {
        if self.is_bootstrap() {
            return Ok(Vec::new());
        }
        Ok(vec![Outbound::new(&self.bootstrap_address, self.version_message()?)])
    }

    fn version_message(&self) -> Result<Message> {
        Ok(Message::Version(VersionMessage {
            version: NODE_VERSION,
            best_height: self.utxo.blockchain().best_height()?,
            addr_from: self.address.clone(),
        }))
    }

    /// ProcessMessage: ℳ → ℳ*
    ///
    /// Dispatch one inbound message and return what must be sent in response.
    pub fn process_message(&self, message: Message) -> Result<Vec<Outbound>> {
        debug!(command = message.command(), "received command");
        match message {
            Message::Version(m) => self.handle_version(m),
            Message::GetBlocks(m) => self.handle_get_blocks(m),
            Message::Inv(m) => self.handle_inv(m),
            Message::GetData(m) => self.handle_get_data(m),
            Message::Block(m) => self.handle_block(m),
            Message::Tx(m) => self.handle_tx(m),
            Message::Addr(m) => self.handle_addr(m),
        }
    }

    /// 1. Peer is longer: ask for its blocks
    /// 2. We are longer: send our version so the peer pulls from us
    /// 3. Remember the peer
    fn handle_version(&self, m: VersionMessage) -> Result<Vec<Outbound>> {
        let my_height = self.utxo.blockchain().best_height()?;
        let mut out = Vec::new();

        if my_height < m.best_height {
            out.push(Outbound::new(
                &m.addr_from,
                Message::GetBlocks(GetBlocksMessage {
                    addr_from: self.address.clone(),
                }),
            ));
        } else if my_height > m.best_height {
            out.push(Outbound::new(&m.addr_from, self.version_message()?));
        }

        if self.peers.lock().add(&m.addr_from) {
            info!(peer = %m.addr_from, "registered peer");
        }
        Ok(out)
    }

    fn handle_get_blocks(&self, m: GetBlocksMessage) -> Result<Vec<Outbound>> {
        let hashes = self.utxo.blockchain().block_hashes()?;
        Ok(vec![Outbound::new(
            m.addr_from,
            Message::Inv(InvMessage {
                addr_from: self.address.clone(),
                kind: InvKind::Block,
                items: hashes,
            }),
        )])
    }

    /// Block inventory arrives tip-first; unknown hashes are queued oldest-first so each
    /// requested block's parent is already stored when it lands.
    fn handle_inv(&self, m: InvMessage) -> Result<Vec<Outbound>> {
        debug!(peer = %m.addr_from, kind = ?m.kind, items = m.items.len(), "received inventory");

        match m.kind {
            InvKind::Block => {
                let chain = self.utxo.blockchain();
                let mut missing = Vec::new();
                for hash in m.items.iter().rev() {
                    if !chain.has_block(hash)? {
                        missing.push(hash.clone());
                    }
                }

                let mut peers = self.peers.lock();
                peers.in_transit = missing.into();
                match peers.in_transit.pop_front() {
                    Some(first) => Ok(vec![self.get_data(&m.addr_from, InvKind::Block, first)]),
                    None => Ok(Vec::new()),
                }
            }
            InvKind::Tx => {
                let mempool = self.mempool.lock();
                Ok(m.items
                    .into_iter()
                    .filter(|id| !mempool.contains_key(&hex::encode(id)))
                    .map(|id| self.get_data(&m.addr_from, InvKind::Tx, id))
                    .collect())
            }
        }
    }

    fn get_data(&self, to: &str, kind: InvKind, id: ByteString) -> Outbound {
        Outbound::new(
            to,
            Message::GetData(GetDataMessage {
                addr_from: self.address.clone(),
                kind,
                id,
            }),
        )
    }

    fn handle_get_data(&self, m: GetDataMessage) -> Result<Vec<Outbound>> {
        match m.kind {
            InvKind::Block => {
                let found = match self.utxo.blockchain().get_block(&m.id) {
                    Ok(found) => found,
                    Err(NodeError::BlockNotFound(hash)) => {
                        debug!(peer = %m.addr_from, %hash, "requested block not found");
                        return Ok(Vec::new());
                    }
                    Err(e) => return Err(e),
                };
                Ok(vec![Outbound::new(
                    m.addr_from,
                    Message::Block(BlockMessage {
                        addr_from: self.address.clone(),
                        block: block::serialize(&found)?,
                    }),
                )])
            }
            InvKind::Tx => {
                let tx = self.mempool.lock().get(&hex::encode(&m.id)).cloned();
                match tx {
                    Some(tx) => Ok(vec![Outbound::new(
                        m.addr_from,
                        Message::Tx(TxMessage {
                            addr_from: self.address.clone(),
                            transaction: transaction::serialize(&tx)?,
                        }),
                    )]),
                    None => {
                        debug!(peer = %m.addr_from, id = %hex::encode(&m.id), "requested tx not in mempool");
                        Ok(Vec::new())
                    }
                }
            }
        }
    }

    /// 1. Add the block to the ledger; a rejected block is logged and dropped
    /// 2. Request the next block in transit, or reindex once none are left
    fn handle_block(&self, m: BlockMessage) -> Result<Vec<Outbound>> {
        let received = block::deserialize(&m.block)
            .map_err(|e| NodeError::MalformedMessage(format!("block: {}", e)))?;

        match self.utxo.blockchain().add_block(&received) {
            Ok(_) => {}
            Err(e) if e.class() == crate::error::ErrorClass::ConsensusRejection => {
                warn!(peer = %m.addr_from, hash = %hex::encode(&received.hash), error = %e, "rejected block");
            }
            Err(e) => return Err(e),
        }

        let next = self.peers.lock().in_transit.pop_front();
        match next {
            Some(hash) => Ok(vec![self.get_data(&m.addr_from, InvKind::Block, hash)]),
            None => {
                self.utxo.reindex()?;
                Ok(Vec::new())
            }
        }
    }

    /// 1. Verify the transaction; invalid ones never enter the mempool
    /// 2. The bootstrap relays its id to every other known peer
    /// 3. A mining node with enough pending transactions mines
    fn handle_tx(&self, m: TxMessage) -> Result<Vec<Outbound>> {
        let tx = transaction::deserialize(&m.transaction)
            .map_err(|e| NodeError::MalformedMessage(format!("tx: {}", e)))?;
        let txid = hex::encode(&tx.id);

        if let Err(e) = self.check_incoming(&tx) {
            warn!(peer = %m.addr_from, %txid, error = %e, "rejected transaction");
            return Ok(Vec::new());
        }

        let id = tx.id.clone();
        if self.mempool.lock().insert(txid.clone(), tx).is_some() {
            debug!(%txid, "transaction already in mempool");
            return Ok(Vec::new());
        }
        debug!(%txid, "added transaction to mempool");

        if self.is_bootstrap() {
            let inv = Message::Inv(InvMessage {
                addr_from: self.address.clone(),
                kind: InvKind::Tx,
                items: vec![id],
            });
            return Ok(self
                .known_peers()
                .into_iter()
                .filter(|peer| *peer != self.address && *peer != m.addr_from)
                .map(|peer| Outbound::new(peer, inv.clone()))
                .collect());
        }

        if self.mining_address.is_some() && self.mempool_len() >= MIN_MEMPOOL_TO_MINE {
            return self.mine_pending();
        }
        Ok(Vec::new())
    }

    /// Coinbase transactions only enter through mining; everything else must carry its own
    /// id and verify against the chain.
    fn check_incoming(&self, tx: &Transaction) -> Result<()> {
        if tx.is_coinbase() {
            return Err(NodeError::InvalidTransaction("coinbase outside a block".to_string()));
        }
        if tx.id != tx.hash()? {
            return Err(NodeError::InvalidTransaction("id does not match contents".to_string()));
        }
        if !self.utxo.blockchain().verify_transaction(tx)? {
            return Err(NodeError::InvalidTransaction("signature verification failed".to_string()));
        }
        Ok(())
    }

    /// Merge the addresses, then ask every known peer for its blocks
    fn handle_addr(&self, m: AddrMessage) -> Result<Vec<Outbound>> {
        let mut peers = self.peers.lock();
        for address in &m.addr_list {
            peers.add(address);
        }
        info!(known = peers.known.len(), "merged peer addresses");

        Ok(peers
            .known
            .iter()
            .filter(|peer| **peer != self.address)
            .map(|peer| {
                Outbound::new(
                    peer.as_str(),
                    Message::GetBlocks(GetBlocksMessage {
                        addr_from: self.address.clone(),
                    }),
                )
            })
            .collect())
    }

    // ========================================================================
    // MINING
    // ========================================================================

    /// MinePending: 𝓜 → ℬ*
    ///
    /// While at least two transactions are pending:
    /// 1. Pick every mempool transaction that verifies and spends only unspent outputs
    ///    not claimed by an earlier pick; drop the ones that can never be mined
    /// 2. Mine them with a coinbase to the mining address and update the index
    /// 3. Announce the block to every other known peer
    ///
    /// A failing round ends the loop; blocks mined before it are still announced.
    pub fn mine_pending(&self) -> Result<Vec<Outbound>> {
        let mining_address = match &self.mining_address {
            Some(address) => address.clone(),
            None => return Ok(Vec::new()),
        };
        let _guard = self.mining_lock.lock();
        Ok(self.drain_mempool(&mining_address, |reward, picked| self.mine_block(reward, picked)))
    }

    fn drain_mempool<F>(&self, mining_address: &str, mut mine: F) -> Vec<Outbound>
    where
        F: FnMut(&str, Vec<Transaction>) -> Result<Block>,
    {
        let mut out = Vec::new();

        while self.mempool_len() >= MIN_MEMPOOL_TO_MINE {
            let picked = match self.select_minable() {
                Ok(picked) => picked,
                Err(e) => {
                    error!(error = %e, "selecting transactions to mine failed");
                    break;
                }
            };
            if picked.is_empty() {
                info!("no minable transactions, waiting for new ones");
                break;
            }

            let mined = match mine(mining_address, picked) {
                Ok(mined) => mined,
                Err(e) => {
                    error!(error = %e, "mining round failed");
                    break;
                }
            };
            let inv = Message::Inv(InvMessage {
                addr_from: self.address.clone(),
                kind: InvKind::Block,
                items: vec![mined.hash.clone()],
            });
            out.extend(
                self.known_peers()
                    .into_iter()
                    .filter(|peer| *peer != self.address)
                    .map(|peer| Outbound::new(peer, inv.clone())),
            );
        }

        out
    }

    fn select_minable(&self) -> Result<Vec<Transaction>> {
        let pending: Vec<Transaction> = self.mempool.lock().values().cloned().collect();
        let chain = self.utxo.blockchain();

        let mut picked = Vec::new();
        let mut claimed: HashSet<(ByteString, i64)> = HashSet::new();
        let mut dead = Vec::new();

        for tx in pending {
            let valid = !tx.is_coinbase() && matches!(chain.verify_transaction(&tx), Ok(true));
            let mut unspent = true;
            for input in &tx.vin {
                if !self.utxo.is_unspent(&input.txid, input.vout)? {
                    unspent = false;
                    break;
                }
            }
            if !valid || !unspent {
                dead.push(hex::encode(&tx.id));
                continue;
            }

            let outpoints: Vec<(ByteString, i64)> =
                tx.vin.iter().map(|i| (i.txid.clone(), i.vout)).collect();
            if outpoints.iter().any(|o| claimed.contains(o)) {
                debug!(txid = %hex::encode(&tx.id), "skipping conflicting transaction");
                continue;
            }
            claimed.extend(outpoints);
            picked.push(tx);
        }

        if !dead.is_empty() {
            let mut mempool = self.mempool.lock();
            for txid in &dead {
                warn!(%txid, "dropping unminable transaction");
                mempool.remove(txid);
            }
        }

        Ok(picked)
    }

    fn mine_block(&self, reward_address: &str, transactions: Vec<Transaction>) -> Result<Block> {
        let mut all = vec![transaction::new_coinbase(reward_address, "")?];
        all.extend(transactions);

        let mined = self.utxo.blockchain().append(all)?;
        self.utxo.update(&mined)?;

        let mut mempool = self.mempool.lock();
        for tx in &mined.transactions {
            mempool.remove(&hex::encode(&tx.id));
        }
        info!(hash = %hex::encode(&mined.hash), height = mined.height, "new block is mined");
        Ok(mined)
    }

    // ========================================================================
    // LOCAL SUBMISSION
    // ========================================================================

    /// Verify locally and hand the transaction to the bootstrap peer
    pub fn send_transaction(&self, tx: &Transaction) -> Result<Vec<Outbound>> {
        if !self.utxo.blockchain().verify_transaction(tx)? {
            return Err(NodeError::InvalidTransaction(hex::encode(&tx.id)));
        }
        Ok(vec![Outbound::new(
            &self.bootstrap_address,
            Message::Tx(TxMessage {
                addr_from: self.address.clone(),
                transaction: transaction::serialize(tx)?,
            }),
        )])
    }

    /// Mine `transactions` right away with a coinbase to `reward_address`
    pub fn mine_transactions(&self, reward_address: &str, transactions: Vec<Transaction>) -> Result<Block> {
        let _guard = self.mining_lock.lock();
        self.mine_block(reward_address, transactions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::Blockchain;
    use crate::wallet::Wallet;
    use tempfile::TempDir;

    const TEST_BITS: u32 = 8;

    fn create_node(address: &str, mining: Option<&Wallet>) -> (TempDir, Wallet, Node) {
        let dir = TempDir::new().unwrap();
        let owner = Wallet::new();
        let chain = Blockchain::create(dir.path().join("chain.db"), &owner.address(), TEST_BITS).unwrap();
        let utxo = Arc::new(UtxoSet::new(Arc::new(chain)).unwrap());
        utxo.reindex().unwrap();
        let node = Node::new(address, BOOTSTRAP_ADDRESS, mining.map(|w| w.address()), utxo).unwrap();
        (dir, owner, node)
    }

    #[test]
    fn test_command_tag() {
        let bytes = command_to_bytes("getblocks");
        assert_eq!(bytes.len(), COMMAND_LENGTH);
        assert_eq!(&bytes[..9], b"getblocks");
        assert!(bytes[9..].iter().all(|&b| b == 0));
        assert_eq!(bytes_to_command(&bytes), "getblocks");
    }

    #[test]
    fn test_message_round_trip() {
        let message = Message::Inv(InvMessage {
            addr_from: "localhost:3001".to_string(),
            kind: InvKind::Block,
            items: vec![vec![1; 32], vec![2; 32]],
        });
        let encoded = message.encode().unwrap();
        assert_eq!(bytes_to_command(&encoded[..COMMAND_LENGTH]), "inv");
        assert_eq!(Message::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_decode_malformed() {
        assert!(matches!(Message::decode(b"short"), Err(NodeError::MalformedMessage(_))));

        let mut unknown = command_to_bytes("bogus").to_vec();
        unknown.push(0);
        assert!(matches!(Message::decode(&unknown), Err(NodeError::MalformedMessage(_))));

        let truncated = command_to_bytes("version").to_vec();
        let err = Message::decode(&truncated).unwrap_err();
        assert_eq!(err.class(), crate::error::ErrorClass::Recoverable);
    }

    #[test]
    fn test_invalid_mining_address() {
        let dir = TempDir::new().unwrap();
        let chain = Blockchain::create(dir.path().join("chain.db"), &Wallet::new().address(), TEST_BITS).unwrap();
        let utxo = Arc::new(UtxoSet::new(Arc::new(chain)).unwrap());
        let result = Node::new("localhost:3001", BOOTSTRAP_ADDRESS, Some("nope".to_string()), utxo);
        assert!(matches!(result, Err(NodeError::InvalidAddress(_))));
    }

    #[test]
    fn test_handshake() {
        let (_dir, _owner, hub) = create_node(BOOTSTRAP_ADDRESS, None);
        assert!(hub.is_bootstrap());
        assert!(hub.handshake().unwrap().is_empty());

        let (_dir, _owner, node) = create_node("localhost:3001", None);
        let out = node.handshake().unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, BOOTSTRAP_ADDRESS);
        match &out[0].message {
            Message::Version(v) => {
                assert_eq!(v.best_height, 1);
                assert_eq!(v.addr_from, "localhost:3001");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_registers_and_compares() {
        let (_dir, _owner, node) = create_node(BOOTSTRAP_ADDRESS, None);

        let taller = VersionMessage {
            version: NODE_VERSION,
            best_height: 5,
            addr_from: "localhost:3001".to_string(),
        };
        let out = node.process_message(Message::Version(taller)).unwrap();
        assert!(matches!(out[0].message, Message::GetBlocks(_)));
        assert!(node.known_peers().contains(&"localhost:3001".to_string()));

        let equal = VersionMessage {
            version: NODE_VERSION,
            best_height: 1,
            addr_from: "localhost:3001".to_string(),
        };
        assert!(node.process_message(Message::Version(equal)).unwrap().is_empty());
        assert_eq!(node.known_peers().len(), 2);
    }

    #[test]
    fn test_getblocks_lists_all_hashes() {
        let (_dir, _owner, node) = create_node(BOOTSTRAP_ADDRESS, None);
        let out = node
            .process_message(Message::GetBlocks(GetBlocksMessage {
                addr_from: "localhost:3001".to_string(),
            }))
            .unwrap();
        match &out[0].message {
            Message::Inv(inv) => {
                assert_eq!(inv.kind, InvKind::Block);
                assert_eq!(inv.items, node.utxo().blockchain().block_hashes().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_inv_skips_known_blocks() {
        let (_dir, _owner, node) = create_node("localhost:3001", None);
        let known = node.utxo().blockchain().tip_hash();
        let inv = InvMessage {
            addr_from: BOOTSTRAP_ADDRESS.to_string(),
            kind: InvKind::Block,
            items: vec![vec![3; 32], vec![2; 32], known],
        };

        let out = node.process_message(Message::Inv(inv)).unwrap();
        match &out[0].message {
            Message::GetData(get) => assert_eq!(get.id, vec![2; 32]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(node.blocks_in_transit(), 1);
    }

    #[test]
    fn test_getdata_unknown_tx_is_silent() {
        let (_dir, _owner, node) = create_node(BOOTSTRAP_ADDRESS, None);
        let out = node
            .process_message(Message::GetData(GetDataMessage {
                addr_from: "localhost:3001".to_string(),
                kind: InvKind::Tx,
                id: vec![1; 32],
            }))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_hub_relays_valid_tx() {
        let (_dir, owner, hub) = create_node(BOOTSTRAP_ADDRESS, None);
        hub.process_message(Message::Addr(AddrMessage {
            addr_list: vec!["localhost:3001".to_string(), "localhost:3002".to_string()],
        }))
        .unwrap();

        let tx = transaction::new_utxo_transaction(&owner, &Wallet::new().address(), 3, hub.utxo()).unwrap();
        let out = hub
            .process_message(Message::Tx(TxMessage {
                addr_from: "localhost:3001".to_string(),
                transaction: transaction::serialize(&tx).unwrap(),
            }))
            .unwrap();

        assert!(hub.mempool_contains(&tx.id));
        let targets: Vec<&str> = out.iter().map(|o| o.to.as_str()).collect();
        assert_eq!(targets, vec!["localhost:3002"]);
        assert!(matches!(&out[0].message, Message::Inv(inv) if inv.kind == InvKind::Tx));
    }

    #[test]
    fn test_invalid_tx_is_dropped() {
        let (_dir, owner, hub) = create_node(BOOTSTRAP_ADDRESS, None);
        let mut tx = transaction::new_utxo_transaction(&owner, &Wallet::new().address(), 3, hub.utxo()).unwrap();
        tx.vout[0].value = 9;

        let out = hub
            .process_message(Message::Tx(TxMessage {
                addr_from: "localhost:3001".to_string(),
                transaction: transaction::serialize(&tx).unwrap(),
            }))
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(hub.mempool_len(), 0);
    }

    #[test]
    fn test_failed_round_keeps_earlier_announcements() {
        let (_dir, owner, node) = create_node("localhost:3002", Some(&Wallet::new()));
        let miner = Wallet::new();
        let funded = Wallet::new();
        node.mine_transactions(&funded.address(), vec![]).unwrap();

        for (from, amount) in [(&owner, 3), (&funded, 4)] {
            let tx = transaction::new_utxo_transaction(from, &Wallet::new().address(), amount, node.utxo()).unwrap();
            node.mempool.lock().insert(hex::encode(&tx.id), tx);
        }

        // the first round stores a block but leaves the mempool alone, the second fails
        let mut rounds = 0;
        let out = node.drain_mempool(&miner.address(), |reward, _picked| {
            rounds += 1;
            if rounds == 1 {
                let coinbase = transaction::new_coinbase(reward, "")?;
                node.utxo().blockchain().append(vec![coinbase])
            } else {
                Err(NodeError::NonceSpaceExhausted)
            }
        });

        assert_eq!(rounds, 2);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, BOOTSTRAP_ADDRESS);
        match &out[0].message {
            Message::Inv(inv) => assert_eq!(inv.items, vec![node.utxo().blockchain().tip_hash()]),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(node.mempool_len(), 2);
    }

    #[test]
    fn test_send_transaction_targets_bootstrap() {
        let (_dir, owner, node) = create_node("localhost:3001", None);
        let tx = transaction::new_utxo_transaction(&owner, &Wallet::new().address(), 2, node.utxo()).unwrap();
        let out = node.send_transaction(&tx).unwrap();
        assert_eq!(out[0].to, BOOTSTRAP_ADDRESS);
        assert!(matches!(&out[0].message, Message::Tx(_)));
    }
}
