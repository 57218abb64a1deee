//! Lock table: per-item holders, mode and wait queue

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::txn::{Age, TxnId};

/// Requested or held lock mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockMode {
    /// Read lock, compatible with other shared locks
    Shared,
    /// Write lock, compatible with nothing
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// How a grant came about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantKind {
    /// New holder added
    Acquired,
    /// Sole shared holder converted to exclusive in place
    Upgraded,
    /// Requester already held a covering lock
    AlreadyHeld,
}

/// A lock handed to a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub item: String,
    pub txn: TxnId,
    pub mode: LockMode,
    pub kind: GrantKind,
}

/// Answer to a lock request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockResponse {
    Granted(Grant),
    /// Every holder other than the requester, in id order
    Conflict(Vec<TxnId>),
}

/// A queued request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Waiter {
    pub txn: TxnId,
    pub mode: LockMode,
    /// Age of the requester when it queued
    pub age: Age,
}

/// Lock state of one item
///
/// `mode` is `None` exactly when `holders` is empty. An exclusive mode always
/// has a single holder. Waiters are kept oldest first and only exist while
/// the item is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockEntry {
    pub item: String,
    pub mode: Option<LockMode>,
    pub holders: BTreeSet<TxnId>,
    pub waiters: VecDeque<Waiter>,
}

impl LockEntry {
    fn new(item: &str) -> Self {
        Self {
            item: item.to_string(),
            mode: None,
            holders: BTreeSet::new(),
            waiters: VecDeque::new(),
        }
    }

    fn is_sole_holder(&self, txn: TxnId) -> bool {
        self.holders.len() == 1 && self.holders.contains(&txn)
    }

    fn others(&self, txn: TxnId) -> Vec<TxnId> {
        self.holders.iter().copied().filter(|h| *h != txn).collect()
    }

    /// Another transaction older than `age` is already queued
    fn older_waiter(&self, txn: TxnId, age: Age) -> bool {
        self.waiters
            .iter()
            .any(|w| w.txn != txn && w.age.is_older_than(age))
    }

    fn grant(&mut self, txn: TxnId, mode: LockMode) -> Option<Grant> {
        let kind = match (mode, self.mode) {
            (_, None) => {
                self.mode = Some(mode);
                self.holders.insert(txn);
                GrantKind::Acquired
            }
            (LockMode::Shared, Some(LockMode::Shared)) => {
                if self.holders.insert(txn) {
                    GrantKind::Acquired
                } else {
                    GrantKind::AlreadyHeld
                }
            }
            (_, Some(LockMode::Exclusive)) if self.is_sole_holder(txn) => GrantKind::AlreadyHeld,
            (LockMode::Exclusive, Some(LockMode::Shared)) if self.is_sole_holder(txn) => {
                self.mode = Some(LockMode::Exclusive);
                GrantKind::Upgraded
            }
            _ => return None,
        };
        Some(Grant {
            item: self.item.clone(),
            txn,
            mode,
            kind,
        })
    }

    fn verify(&self) -> Result<()> {
        match self.mode {
            None if !self.holders.is_empty() => Err(Error::InvariantViolation(format!(
                "{} is unlocked but has holders {:?}",
                self.item, self.holders
            ))),
            Some(_) if self.holders.is_empty() => Err(Error::InvariantViolation(format!(
                "{} is locked without holders",
                self.item
            ))),
            Some(LockMode::Exclusive) if self.holders.len() != 1 => {
                Err(Error::InvariantViolation(format!(
                    "{} is exclusively held by {} transactions",
                    self.item,
                    self.holders.len()
                )))
            }
            None if !self.waiters.is_empty() => Err(Error::InvariantViolation(format!(
                "{} is unlocked but has {} waiters",
                self.item,
                self.waiters.len()
            ))),
            _ if self
                .waiters
                .iter()
                .zip(self.waiters.iter().skip(1))
                .any(|(a, b)| b.age.is_older_than(a.age)) =>
            {
                Err(Error::InvariantViolation(format!(
                    "{} has waiters out of age order",
                    self.item
                )))
            }
            _ => Ok(()),
        }
    }
}

/// All lock entries, keyed by item name
#[derive(Debug, Clone, Default)]
pub struct LockTable {
    entries: BTreeMap<String, LockEntry>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take `item` in `mode` for `txn`, whose age is `age`.
    ///
    /// Never queues; on conflict the caller decides between waiting and
    /// wounding. A compatible request still conflicts while an older
    /// transaction is queued on the item, so no holder is ever younger than
    /// a waiter.
    pub fn request(&mut self, item: &str, txn: TxnId, mode: LockMode, age: Age) -> LockResponse {
        let entry = self
            .entries
            .entry(item.to_string())
            .or_insert_with(|| LockEntry::new(item));

        let grant = if entry.older_waiter(txn, age) {
            None
        } else {
            entry.grant(txn, mode)
        };
        match grant {
            Some(grant) => LockResponse::Granted(grant),
            None => LockResponse::Conflict(entry.others(txn)),
        }
    }

    /// Convert `txn`'s shared lock to exclusive.
    ///
    /// Succeeds in place when `txn` is the only reader, otherwise behaves as a
    /// fresh exclusive request against the other holders.
    pub fn upgrade(&mut self, item: &str, txn: TxnId, age: Age) -> LockResponse {
        self.request(item, txn, LockMode::Exclusive, age)
    }

    /// Queue a request behind every older waiter; a repeated request is ignored
    pub fn enqueue_wait(&mut self, item: &str, txn: TxnId, mode: LockMode, age: Age) {
        let entry = self
            .entries
            .entry(item.to_string())
            .or_insert_with(|| LockEntry::new(item));
        if entry.waiters.iter().any(|w| w.txn == txn && w.mode == mode) {
            return;
        }
        let position = entry
            .waiters
            .iter()
            .position(|w| age.is_older_than(w.age))
            .unwrap_or(entry.waiters.len());
        entry.waiters.insert(position, Waiter { txn, mode, age });
    }

    /// Drop every lock and queued request of `txn` and service freed items
    pub fn release_all(&mut self, txn: TxnId) -> Vec<Grant> {
        self.release(txn, None)
    }

    /// Like [`release_all`](Self::release_all) but leaves `item`'s queue
    /// untouched so the caller can take it first; call
    /// [`service`](Self::service) afterwards.
    pub fn release_all_deferring(&mut self, txn: TxnId, item: &str) -> Vec<Grant> {
        self.release(txn, Some(item))
    }

    fn release(&mut self, txn: TxnId, defer: Option<&str>) -> Vec<Grant> {
        let mut touched = Vec::new();
        for (item, entry) in &mut self.entries {
            let held = entry.holders.remove(&txn);
            let queued = entry.waiters.len();
            entry.waiters.retain(|w| w.txn != txn);
            if entry.holders.is_empty() {
                entry.mode = None;
            }
            if held || queued != entry.waiters.len() {
                touched.push(item.clone());
            }
        }

        touched
            .iter()
            .filter(|item| Some(item.as_str()) != defer)
            .flat_map(|item| self.service(item))
            .collect()
    }

    /// Grant the compatible requests at the head of `item`'s queue.
    ///
    /// The queue is served oldest first. Leading shared waiters are granted
    /// together; an exclusive waiter only when it is at the head and nobody
    /// else holds the item.
    pub fn service(&mut self, item: &str) -> Vec<Grant> {
        let mut granted = Vec::new();
        let Some(entry) = self.entries.get_mut(item) else {
            return granted;
        };

        while let Some(head) = entry.waiters.front().copied() {
            match entry.grant(head.txn, head.mode) {
                Some(grant) => {
                    entry.waiters.pop_front();
                    granted.push(grant);
                    if head.mode == LockMode::Exclusive {
                        break;
                    }
                }
                None => break,
            }
        }
        granted
    }

    #[must_use]
    pub fn entry(&self, item: &str) -> Option<&LockEntry> {
        self.entries.get(item)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LockEntry> {
        self.entries.values()
    }

    /// Mode `txn` currently holds on `item`
    #[must_use]
    pub fn held_mode(&self, item: &str, txn: TxnId) -> Option<LockMode> {
        self.entries
            .get(item)
            .filter(|e| e.holders.contains(&txn))
            .and_then(|e| e.mode)
    }

    /// Items held by `txn`, in item order
    #[must_use]
    pub fn held_by(&self, txn: TxnId) -> Vec<(&str, LockMode)> {
        self.entries
            .values()
            .filter(|e| e.holders.contains(&txn))
            .filter_map(|e| e.mode.map(|m| (e.item.as_str(), m)))
            .collect()
    }

    /// Whether `txn` sits in any wait queue
    #[must_use]
    pub fn is_queued(&self, txn: TxnId) -> bool {
        self.entries
            .values()
            .any(|e| e.waiters.iter().any(|w| w.txn == txn))
    }

    /// `waiter -> holder` pairs for every queued request
    #[must_use]
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        let mut edges = Vec::new();
        for entry in self.entries.values() {
            for waiter in &entry.waiters {
                edges.extend(
                    entry
                        .holders
                        .iter()
                        .filter(|h| **h != waiter.txn)
                        .map(|h| (waiter.txn, *h)),
                );
            }
        }
        edges
    }

    /// Check the per-item invariants
    pub fn verify(&self) -> Result<()> {
        self.entries.values().try_for_each(LockEntry::verify)
    }

    /// Owned copy of every entry, for logging
    #[must_use]
    pub fn snapshot(&self) -> Vec<LockEntry> {
        self.entries.values().cloned().collect()
    }
}
