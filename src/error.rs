//! Error types for the ledger, index and peer protocol

use thiserror::Error;

/// How a failure propagates.
///
/// `Fatal` aborts the operation in progress, `Recoverable` is logged and the item is dropped,
/// `ConsensusRejection` discards a block or transaction without penalizing its sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Fatal,
    Recoverable,
    ConsensusRejection,
}

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Blockchain already exists at {0}")]
    LedgerExists(String),

    #[error("No existing blockchain found at {0}, create one first")]
    LedgerMissing(String),

    #[error("Not enough funds: have {available}, need {required}")]
    InsufficientFunds { available: i64, required: i64 },

    #[error("Address is not valid: {0}")]
    InvalidAddress(String),

    #[error("Previous transaction is not correct: {0}")]
    MissingReferencedTransaction(String),

    #[error("Transaction is not found: {0}")]
    TransactionNotFound(String),

    #[error("Block is not found: {0}")]
    BlockNotFound(String),

    #[error("UTXO index is inconsistent: {0}")]
    UtxoNotFound(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Proof of work search exhausted the nonce space")]
    NonceSpaceExhausted,

    #[error("Invalid proof of work: {0}")]
    InvalidProofOfWork(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Block validation failed: {0}")]
    BlockValidation(String),

    #[error("Peer {0} is not available")]
    PeerUnreachable(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NodeError::PeerUnreachable(_) | NodeError::MalformedMessage(_) => ErrorClass::Recoverable,
            NodeError::InvalidProofOfWork(_)
            | NodeError::InvalidTransaction(_)
            | NodeError::BlockValidation(_) => ErrorClass::ConsensusRejection,
            _ => ErrorClass::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, NodeError>;
