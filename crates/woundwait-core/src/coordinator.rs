//! Transaction coordinator
//!
//! Resolves every lock conflict with wound-wait: an older requester aborts
//! (wounds) each younger holder, a younger requester waits for the older
//! ones. A wait-for edge therefore always points from a younger transaction
//! to an older one, so the wait-for graph can never contain a cycle.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::events::{AbortReason, Notification, NotificationKind};
use crate::lock::{Grant, GrantKind, LockMode, LockResponse, LockTable};
use crate::txn::{Age, Incarnation, Transaction, TxnId, TxnRegistry, TxnState};

/// One scheduled event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum Operation {
    Begin { txn: TxnId },
    Read { txn: TxnId, item: String },
    Write { txn: TxnId, item: String },
    Commit { txn: TxnId },
    Abort { txn: TxnId },
}

impl Operation {
    #[must_use]
    pub const fn txn(&self) -> TxnId {
        match self {
            Self::Begin { txn }
            | Self::Read { txn, .. }
            | Self::Write { txn, .. }
            | Self::Commit { txn }
            | Self::Abort { txn } => *txn,
        }
    }

    /// Reads and writes; the operations an incarnation replays after restart
    #[must_use]
    pub const fn is_access(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Begin { txn } => write!(f, "b{}", txn.get()),
            Self::Read { txn, item } => write!(f, "r{}({item})", txn.get()),
            Self::Write { txn, item } => write!(f, "w{}({item})", txn.get()),
            Self::Commit { txn } => write!(f, "e{}", txn.get()),
            Self::Abort { txn } => write!(f, "a{}", txn.get()),
        }
    }
}

/// Result of an accepted operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Began,
    /// Lock held, operation done
    Granted,
    /// Suspended until the release path grants the lock
    Waiting,
    Committed,
    Aborted,
}

/// An aborted incarnation waiting to be restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartRequest {
    pub txn: TxnId,
    /// The incarnation that was aborted
    pub incarnation: Incarnation,
}

/// Owns the lock table and the registry; every method is one critical step
#[derive(Debug, Default)]
pub struct Coordinator {
    registry: TxnRegistry,
    table: LockTable,
    /// Suspended requests keyed by (item, txn)
    suspended: BTreeMap<(String, TxnId), LockMode>,
    restarts: VecDeque<RestartRequest>,
    outbox: Vec<Notification>,
    next_seq: u64,
}

impl Coordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch one scheduled operation
    pub fn apply(&mut self, operation: &Operation) -> Result<Outcome> {
        match operation {
            Operation::Begin { txn } => self.begin(*txn).map(|_| Outcome::Began),
            Operation::Read { txn, item } => self.read(*txn, item),
            Operation::Write { txn, item } => self.write(*txn, item),
            Operation::Commit { txn } => self.commit(*txn).map(|()| Outcome::Committed),
            Operation::Abort { txn } => self.abort(*txn).map(|()| Outcome::Aborted),
        }
    }

    /// Start a transaction with a fresh age
    pub fn begin(&mut self, id: TxnId) -> Result<Transaction> {
        let txn = self.registry.create(id)?.clone();
        info!(txn = %id, age = %txn.age, "transaction began");
        self.emit(NotificationKind::Began {
            txn: id,
            incarnation: txn.incarnation,
            age: txn.age,
        });
        Ok(txn)
    }

    /// Take a shared lock on `item`
    pub fn read(&mut self, id: TxnId, item: &str) -> Result<Outcome> {
        self.access(id, item, LockMode::Shared, "read")
    }

    /// Take an exclusive lock on `item`, upgrading a held shared lock
    pub fn write(&mut self, id: TxnId, item: &str) -> Result<Outcome> {
        self.access(id, item, LockMode::Exclusive, "write")
    }

    /// Release everything and finish
    pub fn commit(&mut self, id: TxnId) -> Result<()> {
        let incarnation = self
            .registry
            .expect_state(id, &[TxnState::Active], "commit")?
            .incarnation;

        let grants = self.table.release_all(id);
        self.registry.set_state(id, TxnState::Committed)?;
        info!(txn = %id, "transaction committed");
        self.emit(NotificationKind::Committed {
            txn: id,
            incarnation,
        });
        self.resume(grants)
    }

    /// Abort on request; the transaction is queued for restart like a wounded one
    pub fn abort(&mut self, id: TxnId) -> Result<()> {
        self.abort_with(id, AbortReason::Requested, None)
    }

    /// Create the next incarnation for a restart request
    ///
    /// The request may come from [`Self::take_restart`] or still sit on the
    /// queue; either way it must name the current, aborted incarnation.
    pub fn restart(&mut self, request: RestartRequest) -> Result<Transaction> {
        let current = self.registry.get(request.txn)?;
        if current.state != TxnState::Aborted || current.incarnation != request.incarnation {
            return Err(Error::NoPendingRestart(request.txn));
        }
        let txn = self.registry.reincarnate(request.txn)?.clone();
        self.restarts.retain(|r| *r != request);

        info!(
            txn = %txn.id,
            from = %request.incarnation,
            to = %txn.incarnation,
            age = %txn.age,
            "transaction restarted"
        );
        self.emit(NotificationKind::Restarted {
            txn: txn.id,
            from: request.incarnation,
            to: txn.incarnation,
            age: txn.age,
        });
        Ok(txn)
    }

    /// Pop the oldest pending restart request
    pub fn take_restart(&mut self) -> Option<RestartRequest> {
        self.restarts.pop_front()
    }

    /// Pending restart request for `id`, if any
    #[must_use]
    pub fn pending_restart(&self, id: TxnId) -> Option<RestartRequest> {
        self.restarts.iter().copied().find(|r| r.txn == id)
    }

    /// Take every notification raised since the last drain
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    pub fn transaction(&self, id: TxnId) -> Result<&Transaction> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn state(&self, id: TxnId) -> Option<TxnState> {
        self.registry.get(id).ok().map(|t| t.state)
    }

    #[must_use]
    pub const fn registry(&self) -> &TxnRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn lock_table(&self) -> &LockTable {
        &self.table
    }

    /// `waiter -> holder` edges of the current wait-for graph
    #[must_use]
    pub fn wait_for_edges(&self) -> Vec<(TxnId, TxnId)> {
        self.table.wait_for_edges()
    }

    fn access(
        &mut self,
        id: TxnId,
        item: &str,
        mode: LockMode,
        operation: &'static str,
    ) -> Result<Outcome> {
        let requester = self
            .registry
            .expect_state(id, &[TxnState::Active], operation)?
            .age;
        let upgrading =
            mode == LockMode::Exclusive && self.table.held_mode(item, id) == Some(LockMode::Shared);
        let mut wounded_any = false;

        loop {
            let response = if upgrading {
                self.table.upgrade(item, id, requester)
            } else {
                self.table.request(item, id, mode, requester)
            };

            let holders = match response {
                LockResponse::Granted(grant) => {
                    debug!(txn = %id, item, %mode, kind = ?grant.kind, "lock granted");
                    self.emit(NotificationKind::LockGranted {
                        txn: id,
                        item: item.to_string(),
                        mode,
                        upgraded: grant.kind == GrantKind::Upgraded,
                    });
                    if wounded_any {
                        let grants = self.table.service(item);
                        self.resume(grants)?;
                    }
                    return Ok(Outcome::Granted);
                }
                LockResponse::Conflict(holders) if holders.is_empty() => {
                    return Err(Error::InvariantViolation(format!(
                        "{item} refused {id} while nobody holds it"
                    )));
                }
                LockResponse::Conflict(holders) => holders,
            };

            let mut older = Vec::new();
            for holder in holders {
                if requester.is_older_than(self.registry.age(holder)?) {
                    self.wound(id, holder, item)?;
                    wounded_any = true;
                } else {
                    older.push(holder);
                }
            }

            if !older.is_empty() {
                return self.suspend(id, requester, item, mode, older, wounded_any);
            }
        }
    }

    fn suspend(
        &mut self,
        id: TxnId,
        age: Age,
        item: &str,
        mode: LockMode,
        blocked_by: Vec<TxnId>,
        service_queue: bool,
    ) -> Result<Outcome> {
        debug!(txn = %id, item, %mode, ?blocked_by, "waiting for older holders");
        self.table.enqueue_wait(item, id, mode, age);
        self.registry.set_state(id, TxnState::Waiting)?;
        self.suspended.insert((item.to_string(), id), mode);
        self.emit(NotificationKind::WaitEntered {
            txn: id,
            item: item.to_string(),
            mode,
            blocked_by,
        });

        if service_queue {
            let grants = self.table.service(item);
            self.resume(grants)?;
        }

        if self.suspended.contains_key(&(item.to_string(), id)) {
            Ok(Outcome::Waiting)
        } else {
            Ok(Outcome::Granted)
        }
    }

    fn wound(&mut self, wounder: TxnId, victim: TxnId, item: &str) -> Result<()> {
        info!(%wounder, wounded = %victim, item, "wound-wait: aborting younger holder");
        self.emit(NotificationKind::Wounded {
            wounder,
            wounded: victim,
            item: item.to_string(),
        });
        self.abort_with(victim, AbortReason::Wounded { by: wounder }, Some(item))
    }

    fn abort_with(&mut self, id: TxnId, reason: AbortReason, defer: Option<&str>) -> Result<()> {
        let incarnation = self
            .registry
            .expect_state(id, &[TxnState::Active, TxnState::Waiting], "abort")?
            .incarnation;

        let grants = match defer {
            Some(item) => self.table.release_all_deferring(id, item),
            None => self.table.release_all(id),
        };
        self.suspended.retain(|(_, txn), _| *txn != id);
        self.registry.set_state(id, TxnState::Aborted)?;
        self.restarts.push_back(RestartRequest {
            txn: id,
            incarnation,
        });

        match reason {
            AbortReason::Requested => warn!(txn = %id, "transaction aborted on request"),
            AbortReason::Wounded { by } => info!(txn = %id, %by, "transaction wounded"),
        }
        self.emit(NotificationKind::Aborted {
            txn: id,
            incarnation,
            reason,
        });
        self.resume(grants)
    }

    /// Complete the suspended requests the release path just granted
    fn resume(&mut self, grants: Vec<Grant>) -> Result<()> {
        for grant in grants {
            if self
                .suspended
                .remove(&(grant.item.clone(), grant.txn))
                .is_none()
            {
                continue;
            }
            self.registry.set_state(grant.txn, TxnState::Active)?;
            debug!(txn = %grant.txn, item = %grant.item, mode = %grant.mode, "waiter resumed");
            self.emit(NotificationKind::Resumed {
                txn: grant.txn,
                item: grant.item,
                mode: grant.mode,
            });
        }
        Ok(())
    }

    fn emit(&mut self, kind: NotificationKind) {
        self.outbox.push(Notification::new(self.next_seq, kind));
        self.next_seq += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: u32) -> TxnId {
        TxnId::new(id)
    }

    fn kinds(coordinator: &mut Coordinator) -> Vec<NotificationKind> {
        coordinator
            .drain_notifications()
            .into_iter()
            .map(|n| n.kind)
            .collect()
    }

    #[test]
    fn test_operations_require_active_transaction() -> Result<()> {
        let mut c = Coordinator::new();
        assert_eq!(c.read(t(1), "x"), Err(Error::UnknownTransaction(t(1))));

        c.begin(t(1))?;
        c.commit(t(1))?;
        assert!(matches!(
            c.read(t(1), "x"),
            Err(Error::InvalidState {
                state: TxnState::Committed,
                operation: "read",
                ..
            })
        ));
        assert!(matches!(c.commit(t(1)), Err(Error::InvalidState { .. })));
        assert!(matches!(c.abort(t(1)), Err(Error::InvalidState { .. })));
        Ok(())
    }

    #[test]
    fn test_begin_twice_is_rejected_without_side_effects() -> Result<()> {
        let mut c = Coordinator::new();
        let first = c.begin(t(1))?;
        c.drain_notifications();

        assert_eq!(c.begin(t(1)), Err(Error::DuplicateBegin(t(1))));
        assert!(c.drain_notifications().is_empty());
        assert_eq!(c.transaction(t(1))?, &first);
        Ok(())
    }

    #[test]
    fn test_rejected_write_leaves_table_untouched() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.write(t(1), "x")?;
        c.begin(t(2))?;
        assert_eq!(c.write(t(2), "x")?, Outcome::Waiting);

        let before = c.lock_table().snapshot();
        assert!(matches!(c.write(t(2), "y"), Err(Error::InvalidState { .. })));
        assert_eq!(c.lock_table().snapshot(), before);
        Ok(())
    }

    #[test]
    fn test_older_writer_wounds_every_younger_reader() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.begin(t(2))?;
        c.begin(t(3))?;
        c.read(t(2), "x")?;
        c.read(t(3), "x")?;
        c.drain_notifications();

        assert_eq!(c.write(t(1), "x")?, Outcome::Granted);
        assert_eq!(c.state(t(2)), Some(TxnState::Aborted));
        assert_eq!(c.state(t(3)), Some(TxnState::Aborted));
        assert_eq!(c.lock_table().held_mode("x", t(1)), Some(LockMode::Exclusive));

        let notes = kinds(&mut c);
        let wounded: Vec<TxnId> = notes
            .iter()
            .filter_map(|k| match k {
                NotificationKind::Wounded { wounded, .. } => Some(*wounded),
                _ => None,
            })
            .collect();
        assert_eq!(wounded, vec![t(2), t(3)]);
        assert_eq!(c.take_restart().map(|r| r.txn), Some(t(2)));
        assert_eq!(c.take_restart().map(|r| r.txn), Some(t(3)));
        Ok(())
    }

    #[test]
    fn test_mixed_holders_wound_younger_then_wait_for_older() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.begin(t(2))?;
        c.begin(t(3))?;
        c.read(t(1), "x")?;
        c.read(t(3), "x")?;

        assert_eq!(c.write(t(2), "x")?, Outcome::Waiting);
        assert_eq!(c.state(t(3)), Some(TxnState::Aborted));
        assert_eq!(c.state(t(2)), Some(TxnState::Waiting));
        assert_eq!(c.wait_for_edges(), vec![(t(2), t(1))]);

        c.commit(t(1))?;
        assert_eq!(c.state(t(2)), Some(TxnState::Active));
        assert_eq!(c.lock_table().held_mode("x", t(2)), Some(LockMode::Exclusive));
        Ok(())
    }

    #[test]
    fn test_wounding_a_waiter_cancels_its_wait() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.begin(t(2))?;
        c.begin(t(3))?;
        c.write(t(2), "y")?;
        c.write(t(1), "x")?;
        assert_eq!(c.read(t(2), "x")?, Outcome::Waiting);
        assert_eq!(c.write(t(3), "y")?, Outcome::Waiting);

        // T1 needs y, held by the waiting T2
        assert_eq!(c.read(t(1), "y")?, Outcome::Granted);
        assert_eq!(c.state(t(2)), Some(TxnState::Aborted));
        assert!(!c.lock_table().is_queued(t(2)));
        assert!(c.lock_table().held_by(t(2)).is_empty());
        // T3 stays queued behind the new holder
        assert_eq!(c.wait_for_edges(), vec![(t(3), t(1))]);
        c.lock_table().verify()
    }

    #[test]
    fn test_wounder_takes_item_before_queued_waiters() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.begin(t(2))?;
        c.begin(t(3))?;
        c.write(t(2), "x")?;
        assert_eq!(c.write(t(3), "x")?, Outcome::Waiting);
        c.drain_notifications();

        assert_eq!(c.write(t(1), "x")?, Outcome::Granted);
        let notes = kinds(&mut c);
        assert!(!notes
            .iter()
            .any(|k| matches!(k, NotificationKind::Resumed { .. })));
        assert_eq!(c.state(t(3)), Some(TxnState::Waiting));
        Ok(())
    }

    #[test]
    fn test_younger_reader_queues_behind_older_writer() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.begin(t(2))?;
        c.begin(t(3))?;
        c.read(t(1), "x")?;
        assert_eq!(c.write(t(2), "x")?, Outcome::Waiting);

        // compatible with T1's read lock, but T2 queued first and is older
        assert_eq!(c.read(t(3), "x")?, Outcome::Waiting);
        assert_eq!(c.wait_for_edges(), vec![(t(2), t(1)), (t(3), t(1))]);
        c.lock_table().verify()?;

        c.commit(t(1))?;
        assert_eq!(c.state(t(2)), Some(TxnState::Active));
        assert_eq!(c.state(t(3)), Some(TxnState::Waiting));
        assert_eq!(c.lock_table().held_mode("x", t(2)), Some(LockMode::Exclusive));

        c.commit(t(2))?;
        assert_eq!(c.state(t(3)), Some(TxnState::Active));
        assert_eq!(c.lock_table().held_mode("x", t(3)), Some(LockMode::Shared));
        c.lock_table().verify()
    }

    #[test]
    fn test_restart_requires_pending_request() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        let bogus = RestartRequest {
            txn: t(1),
            incarnation: Incarnation::FIRST,
        };
        assert_eq!(c.restart(bogus), Err(Error::NoPendingRestart(t(1))));

        c.abort(t(1))?;
        let request = c.pending_restart(t(1)).ok_or(Error::NoPendingRestart(t(1)))?;
        let txn = c.restart(request)?;
        assert_eq!(txn.incarnation.get(), 2);
        assert_eq!(c.take_restart(), None);
        assert_eq!(c.restart(request), Err(Error::NoPendingRestart(t(1))));
        Ok(())
    }

    #[test]
    fn test_taken_request_can_still_be_restarted() -> Result<()> {
        let mut c = Coordinator::new();
        c.begin(t(1))?;
        c.abort(t(1))?;
        let request = c.take_restart().ok_or(Error::NoPendingRestart(t(1)))?;
        assert_eq!(c.pending_restart(t(1)), None);
        assert_eq!(c.restart(request)?.state, TxnState::Active);
        Ok(())
    }

    #[test]
    fn test_operation_display_round_trips_schedule_tokens() {
        let ops = [
            Operation::Begin { txn: t(1) },
            Operation::Read {
                txn: t(1),
                item: "x".into(),
            },
            Operation::Write {
                txn: t(12),
                item: "acct".into(),
            },
            Operation::Commit { txn: t(1) },
            Operation::Abort { txn: t(3) },
        ];
        let rendered: Vec<String> = ops.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["b1", "r1(x)", "w12(acct)", "e1", "a3"]);
    }
}
