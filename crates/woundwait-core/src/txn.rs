//! Transaction records, ages and the registry

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logical transaction identifier, stable across incarnations
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(u32);

impl TxnId {
    /// Create a new transaction ID
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw numeric id
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Creation timestamp. Lower is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Age(u64);

impl Age {
    /// Wrap a raw age; live ages come from [`AgeClock::tick`]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// True when `self` was assigned before `other`
    #[must_use]
    pub fn is_older_than(self, other: Self) -> bool {
        self < other
    }
}

impl std::fmt::Display for Age {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issues strictly increasing ages; never hands out the same value twice
#[derive(Debug, Clone, Default)]
pub struct AgeClock {
    last: u64,
}

impl AgeClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign the next age
    pub fn tick(&mut self) -> Age {
        self.last += 1;
        Age(self.last)
    }
}

/// One execution attempt of a logical transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Incarnation(u32);

impl Incarnation {
    /// The incarnation created by `begin`
    pub const FIRST: Self = Self(1);

    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Incarnation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of one incarnation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    /// Running, may issue operations
    Active,
    /// Suspended on a lock request
    Waiting,
    /// Wounded or aborted; waits for restart
    Aborted,
    /// Finished; locks released
    Committed,
}

impl std::fmt::Display for TxnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Waiting => write!(f, "waiting"),
            Self::Aborted => write!(f, "aborted"),
            Self::Committed => write!(f, "committed"),
        }
    }
}

impl TxnState {
    /// Check if this is a terminal state for the incarnation
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Aborted | Self::Committed)
    }

    /// Still holds or may acquire locks
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Active | Self::Waiting)
    }
}

/// A transaction incarnation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TxnId,
    pub incarnation: Incarnation,
    /// Assigned once, never changes for this incarnation
    pub age: Age,
    pub state: TxnState,
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{} age={} state={}",
            self.id, self.incarnation, self.age, self.state
        )
    }
}

/// Maps logical ids to their current incarnation
#[derive(Debug, Clone, Default)]
pub struct TxnRegistry {
    txns: HashMap<TxnId, Transaction>,
    clock: AgeClock,
}

impl TxnRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a first incarnation for `id`.
    ///
    /// A committed tombstone is replaced; anything else still occupying the id
    /// is a duplicate.
    pub fn create(&mut self, id: TxnId) -> Result<&Transaction> {
        if let Some(existing) = self.txns.get(&id) {
            if existing.state != TxnState::Committed {
                return Err(Error::DuplicateBegin(id));
            }
        }
        let txn = Transaction {
            id,
            incarnation: Incarnation::FIRST,
            age: self.clock.tick(),
            state: TxnState::Active,
        };
        self.txns.insert(id, txn);
        self.get(id)
    }

    /// Replace an aborted incarnation with the next one
    pub fn reincarnate(&mut self, id: TxnId) -> Result<&Transaction> {
        let age = {
            let current = self.get(id)?;
            if current.state != TxnState::Aborted {
                return Err(Error::InvalidState {
                    txn: id,
                    state: current.state,
                    operation: "restart",
                });
            }
            self.clock.tick()
        };
        let txn = self
            .txns
            .get_mut(&id)
            .ok_or(Error::UnknownTransaction(id))?;
        txn.incarnation = txn.incarnation.next();
        txn.age = age;
        txn.state = TxnState::Active;
        Ok(txn)
    }

    pub fn get(&self, id: TxnId) -> Result<&Transaction> {
        self.txns.get(&id).ok_or(Error::UnknownTransaction(id))
    }

    /// Look up `id` and check it is in `required` state
    pub fn expect_state(
        &self,
        id: TxnId,
        required: &[TxnState],
        operation: &'static str,
    ) -> Result<&Transaction> {
        let txn = self.get(id)?;
        if required.contains(&txn.state) {
            Ok(txn)
        } else {
            Err(Error::InvalidState {
                txn: id,
                state: txn.state,
                operation,
            })
        }
    }

    pub fn set_state(&mut self, id: TxnId, state: TxnState) -> Result<()> {
        let txn = self
            .txns
            .get_mut(&id)
            .ok_or(Error::UnknownTransaction(id))?;
        txn.state = state;
        Ok(())
    }

    pub fn age(&self, id: TxnId) -> Result<Age> {
        self.get(id).map(|t| t.age)
    }

    /// All records ordered by age, oldest first
    #[must_use]
    pub fn transactions(&self) -> Vec<&Transaction> {
        let mut all: Vec<&Transaction> = self.txns.values().collect();
        all.sort_by_key(|t| t.age);
        all
    }

    /// Ids currently in `state`
    #[must_use]
    pub fn in_state(&self, state: TxnState) -> Vec<TxnId> {
        self.transactions()
            .into_iter()
            .filter(|t| t.state == state)
            .map(|t| t.id)
            .collect()
    }
}
