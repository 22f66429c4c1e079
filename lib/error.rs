//! Errors produced by the workspace engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("This operation must be performed inside a transaction")]
    NotInTransaction,
    #[error("A transaction is already in progress")]
    TransactionInProgress,
    #[error("Unknown memory block \"{0}\"")]
    UnknownBlock(String),
    #[error("A memory block named \"{0}\" already exists")]
    DuplicateBlock(String),
    #[error("Address 0x{address:x} in block \"{block}\" is already defined")]
    Overlap { block: String, address: u64 },
    #[error("Range 0x{address:x}+0x{length:x} is outside of block \"{block}\"")]
    OutOfRange {
        block: String,
        address: u64,
        length: u64,
    },
    #[error("Address 0x{address:x} in block \"{block}\" is not defined")]
    NotDefined { block: String, address: u64 },
    #[error("Invalid reference: {0}")]
    InvalidReference(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unknown action \"{0}\"")]
    UnknownAction(String),
    #[error("Corrupt workspace state: {0}")]
    CorruptState(String),
    #[error("The workspace lock was poisoned by a panicking writer")]
    LockPoisoned,
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}
