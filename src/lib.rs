//! # Consensus-Node
//!
//! A minimal proof-of-work cryptocurrency node.
//!
//! ## Architecture
//!
//! Leaves first:
//! - Merkle committer over serialized transactions
//! - Proof-of-work engine with a fixed target
//! - Transactions signed with ECDSA over P-256, one input unlocked at a time
//! - Ledger store: a sled-backed, hash-linked chain with a tip pointer
//! - UTXO index derived from the ledger, by full reindex or per-block update
//! - Peer protocol: version / getblocks / inv / getdata / block / tx / addr over TCP
//!
//! ## Usage
//!
//! ```no_run
//! use consensus_node::blockchain::Blockchain;
//! use consensus_node::transaction::new_utxo_transaction;
//! use consensus_node::utxo::UtxoSet;
//! use consensus_node::wallet::Wallet;
//! use std::sync::Arc;
//!
//! let alice = Wallet::new();
//! let bob = Wallet::new();
//!
//! let chain = Blockchain::create("blockchain_3000.db", &alice.address(), 20).unwrap();
//! let utxo = UtxoSet::new(Arc::new(chain)).unwrap();
//! utxo.reindex().unwrap();
//!
//! let tx = new_utxo_transaction(&alice, &bob.address(), 4, &utxo).unwrap();
//! ```

pub mod types;
pub mod constants;
pub mod merkle;
pub mod pow;
pub mod transaction;
pub mod wallet;
pub mod block;
pub mod blockchain;
pub mod utxo;
pub mod network;
pub mod server;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ErrorClass, NodeError, Result};
pub use blockchain::Blockchain;
pub use utxo::UtxoSet;
pub use network::{Message, Node};
pub use wallet::Wallet;
