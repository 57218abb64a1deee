//! Error types for woundwait-core

use thiserror::Error;

use crate::txn::{TxnId, TxnState};

/// Core error type for coordinator operations
///
/// Every variant but `InvariantViolation` is raised before the lock table or
/// the registry is touched, so a rejected operation leaves both unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The id was never begun
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(TxnId),

    /// The transaction is not in the state the operation requires
    #[error("Invalid state: {operation} on {txn} which is {state}")]
    InvalidState {
        txn: TxnId,
        state: TxnState,
        operation: &'static str,
    },

    /// `begin` on an id whose current incarnation has not committed
    #[error("Duplicate begin: {0} has not committed")]
    DuplicateBegin(TxnId),

    /// `restart` naming an incarnation that is not the current, aborted one
    #[error("No pending restart for {0}")]
    NoPendingRestart(TxnId),

    /// Lock table invariant broken; never recoverable
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type alias for woundwait-core operations
pub type Result<T> = std::result::Result<T, Error>;
