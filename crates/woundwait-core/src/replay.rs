//! Sequential replay of an operation stream
//!
//! Operations addressed to a waiting transaction are held back and issued, in
//! order, once its lock is granted. A wounded transaction is restarted as soon
//! as the operation that wounded it completes and replays every read and write
//! of its aborted incarnation from `begin`.
//!
//! Resumptions and restarts go through an explicit ready queue, so a commit
//! that wakes a waiter which in turn commits never recurses.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, Operation, Outcome, RestartRequest};
use crate::error::Error;
use crate::events::{Notification, NotificationKind};
use crate::txn::{TxnId, TxnState};

/// Everything that happened while processing one scheduled operation
#[derive(Debug, Clone)]
pub struct StepReport {
    pub operation: Operation,
    /// `None` when the operation was held back behind a wait or rejected
    pub outcome: Option<Outcome>,
    /// Notifications in emission order, including replays it triggered
    pub notifications: Vec<Notification>,
    /// Rejected operations, the scheduled one or replayed ones
    pub rejected: Vec<(Operation, Error)>,
}

impl StepReport {
    fn new(operation: Operation) -> Self {
        Self {
            operation,
            outcome: None,
            notifications: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Held back because the transaction was waiting
    #[must_use]
    pub fn was_deferred(&self) -> bool {
        self.outcome.is_none() && self.rejected.iter().all(|(op, _)| *op != self.operation)
    }
}

/// Final state after the stream is exhausted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub operations: usize,
    pub committed: Vec<TxnId>,
    pub active: Vec<TxnId>,
    /// Never granted because an older holder never finished
    pub waiting: Vec<TxnId>,
    pub restarts: usize,
    pub rejected: usize,
    /// Operations still held back behind a wait
    pub deferred: usize,
}

/// Drives a [`Coordinator`] from a single ordered operation feed
#[derive(Debug, Default)]
pub struct Replayer {
    coordinator: Coordinator,
    deferred: HashMap<TxnId, VecDeque<Operation>>,
    /// Accesses issued by the current incarnation
    history: HashMap<TxnId, Vec<Operation>>,
    ready: VecDeque<TxnId>,
    operations: usize,
    restarts: usize,
    rejected: usize,
}

impl Replayer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Process one scheduled operation and everything it unblocks
    pub fn step(&mut self, operation: Operation) -> StepReport {
        self.operations += 1;
        let mut report = StepReport::new(operation.clone());
        let txn = operation.txn();

        let held_back = self.coordinator.state(txn) == Some(TxnState::Waiting)
            || self.deferred.get(&txn).is_some_and(|q| !q.is_empty());
        if held_back {
            debug!(%txn, op = %operation, "transaction waiting; operation deferred");
            self.deferred.entry(txn).or_default().push_back(operation);
        } else {
            report.outcome = self.issue(operation, &mut report);
        }

        self.settle(&mut report);
        report
    }

    /// Run a whole stream, returning one report per operation
    pub fn run<I>(&mut self, operations: I) -> Vec<StepReport>
    where
        I: IntoIterator<Item = Operation>,
    {
        operations.into_iter().map(|op| self.step(op)).collect()
    }

    #[must_use]
    pub fn finish(&self) -> ReplaySummary {
        let registry = self.coordinator.registry();
        ReplaySummary {
            operations: self.operations,
            committed: registry.in_state(TxnState::Committed),
            active: registry.in_state(TxnState::Active),
            waiting: registry.in_state(TxnState::Waiting),
            restarts: self.restarts,
            rejected: self.rejected,
            deferred: self.deferred.values().map(VecDeque::len).sum(),
        }
    }

    fn issue(&mut self, operation: Operation, report: &mut StepReport) -> Option<Outcome> {
        let txn = operation.txn();
        match self.coordinator.apply(&operation) {
            Ok(outcome) => {
                match &operation {
                    Operation::Begin { .. } | Operation::Commit { .. } => {
                        self.history.remove(&txn);
                    }
                    Operation::Read { .. } | Operation::Write { .. } => {
                        self.history.entry(txn).or_default().push(operation.clone());
                    }
                    Operation::Abort { .. } => {}
                }
                self.collect(report);
                Some(outcome)
            }
            Err(error) => {
                warn!(op = %operation, %error, "operation rejected");
                self.rejected += 1;
                report.rejected.push((operation, error));
                None
            }
        }
    }

    fn settle(&mut self, report: &mut StepReport) {
        loop {
            self.collect(report);
            if let Some(request) = self.coordinator.take_restart() {
                self.restart(request, report);
                continue;
            }
            let Some(txn) = self.ready.pop_front() else {
                break;
            };
            self.drain(txn, report);
        }
    }

    /// Issue held-back operations of `txn` until it blocks again
    fn drain(&mut self, txn: TxnId, report: &mut StepReport) {
        while self.coordinator.state(txn) == Some(TxnState::Active) {
            let Some(operation) = self.deferred.get_mut(&txn).and_then(VecDeque::pop_front) else {
                break;
            };
            self.issue(operation, report);
        }
        if self.deferred.get(&txn).is_some_and(VecDeque::is_empty) {
            self.deferred.remove(&txn);
        }
    }

    fn restart(&mut self, request: RestartRequest, report: &mut StepReport) {
        let txn = request.txn;
        if let Err(error) = self.coordinator.restart(request) {
            warn!(%txn, %error, "restart failed");
            self.rejected += 1;
            report.rejected.push((Operation::Begin { txn }, error));
            return;
        }
        self.restarts += 1;

        let mut replay: VecDeque<Operation> = self.history.remove(&txn).unwrap_or_default().into();
        replay.extend(self.deferred.remove(&txn).unwrap_or_default());
        debug!(%txn, operations = replay.len(), "replaying restarted transaction");
        self.deferred.insert(txn, replay);
        self.ready.push_back(txn);
    }

    fn collect(&mut self, report: &mut StepReport) {
        for note in self.coordinator.drain_notifications() {
            if let NotificationKind::Resumed { txn, .. } = note.kind {
                self.ready.push_back(txn);
            }
            report.notifications.push(note);
        }
    }
}
