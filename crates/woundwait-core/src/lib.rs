//! Woundwait-core - lock manager and transaction coordinator
//!
//! This crate provides:
//! - Transaction records, ages and the transaction registry
//! - The lock table (shared/exclusive locks with wait queues)
//! - The coordinator applying wound-wait on every conflict
//! - A sequential replay driver and an async front-end for concurrent actors
//! - Notification types describing every decision

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod concurrent;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod lock;
pub mod replay;
pub mod txn;

pub use concurrent::{SharedCoordinator, Step};
pub use coordinator::{Coordinator, Operation, Outcome, RestartRequest};
pub use error::{Error, Result};
pub use events::{AbortReason, Notification, NotificationKind};
pub use lock::{Grant, LockEntry, LockMode, LockResponse, LockTable};
pub use replay::{ReplaySummary, Replayer, StepReport};
pub use txn::{Age, AgeClock, Incarnation, Transaction, TxnId, TxnRegistry, TxnState};
