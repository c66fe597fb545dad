//! Ledger and protocol constants

/// Coinbase reward per block
pub const SUBSIDY: i64 = 10;

/// Proof-of-work difficulty: a valid hash is below 2^(256 - TARGET_BITS)
pub const TARGET_BITS: u32 = 20;

/// Upper bound of the nonce search
pub const MAX_NONCE: i64 = i64::MAX;

/// Width of the null-padded ASCII command tag on the wire
pub const COMMAND_LENGTH: usize = 12;

/// Largest request a peer may send in one connection
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// Protocol version announced in `version` messages
pub const NODE_VERSION: i32 = 1;

/// Key of the tip pointer in the blocks tree
pub const TIP_KEY: &[u8] = b"l";

/// Tree holding `blockHash -> serializedBlock`
pub const BLOCKS_TREE: &str = "blocks";

/// Tree holding `txId -> serializedOutputList`
pub const UTXO_TREE: &str = "chainstate";

/// Coinbase data of the genesis block
pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Default bootstrap (hub) node
pub const BOOTSTRAP_ADDRESS: &str = "localhost:3000";

/// Mempool size at which a mining node starts assembling a block
pub const MIN_MEMPOOL_TO_MINE: usize = 2;

/// Random bytes filled into an empty coinbase data field
pub const COINBASE_RANDOM_BYTES: usize = 20;

/// Version byte prepended to a public-key hash before Base58Check encoding
pub const ADDRESS_VERSION: u8 = 0x00;

/// Length of the address checksum
pub const ADDRESS_CHECKSUM_LEN: usize = 4;

/// Length of a public-key hash
pub const PUB_KEY_HASH_LEN: usize = 20;
