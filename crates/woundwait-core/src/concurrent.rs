//! Async front-end for transactions running as concurrent actors
//!
//! Each call takes the single coordinator mutex for its whole
//! conflict-resolution sequence. A request that has to wait parks a oneshot
//! continuation keyed by `(item, txn)` and awaits it after the mutex is
//! released; the release path of another actor's commit or abort fires it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::debug;

use crate::coordinator::{Coordinator, Operation, Outcome};
use crate::error::{Error, Result};
use crate::events::{Notification, NotificationKind};
use crate::txn::{Transaction, TxnId, TxnState};

/// What an actor should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The operation completed
    Done,
    /// This incarnation was wounded; call [`SharedCoordinator::restart`]
    Wounded,
}

#[derive(Debug)]
enum Wakeup {
    Granted,
    Wounded,
}

#[derive(Debug)]
struct Shared {
    coordinator: Coordinator,
    parked: HashMap<(String, TxnId), oneshot::Sender<Wakeup>>,
    observer: Option<mpsc::UnboundedSender<Notification>>,
}

impl Shared {
    /// Route fresh notifications to parked actors and the observer
    fn dispatch(&mut self) {
        for note in self.coordinator.drain_notifications() {
            match &note.kind {
                NotificationKind::Resumed { txn, item, .. } => {
                    if let Some(waker) = self.parked.remove(&(item.clone(), *txn)) {
                        let _ = waker.send(Wakeup::Granted);
                    }
                }
                NotificationKind::Aborted { txn, .. } => {
                    let keys: Vec<(String, TxnId)> = self
                        .parked
                        .keys()
                        .filter(|(_, parked)| parked == txn)
                        .cloned()
                        .collect();
                    for key in keys {
                        if let Some(waker) = self.parked.remove(&key) {
                            let _ = waker.send(Wakeup::Wounded);
                        }
                    }
                }
                _ => {}
            }
            if let Some(observer) = &self.observer {
                let _ = observer.send(note);
            }
        }
    }
}

/// Cloneable handle shared by all actors
#[derive(Debug, Clone)]
pub struct SharedCoordinator {
    inner: Arc<Mutex<Shared>>,
}

impl SharedCoordinator {
    #[must_use]
    pub fn new(coordinator: Coordinator) -> Self {
        Self::build(coordinator, None)
    }

    /// Forward every notification to `observer`
    #[must_use]
    pub fn with_observer(
        coordinator: Coordinator,
        observer: mpsc::UnboundedSender<Notification>,
    ) -> Self {
        Self::build(coordinator, Some(observer))
    }

    fn build(coordinator: Coordinator, observer: Option<mpsc::UnboundedSender<Notification>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Shared {
                coordinator,
                parked: HashMap::new(),
                observer,
            })),
        }
    }

    pub async fn begin(&self, id: TxnId) -> Result<Transaction> {
        let mut shared = self.inner.lock().await;
        let txn = shared.coordinator.begin(id);
        shared.dispatch();
        txn
    }

    /// Shared lock; suspends while an older transaction holds `item`
    pub async fn read(&self, id: TxnId, item: &str) -> Result<Step> {
        let operation = Operation::Read {
            txn: id,
            item: item.to_string(),
        };
        self.access(item, operation).await
    }

    /// Exclusive lock; suspends while an older transaction holds `item`
    pub async fn write(&self, id: TxnId, item: &str) -> Result<Step> {
        let operation = Operation::Write {
            txn: id,
            item: item.to_string(),
        };
        self.access(item, operation).await
    }

    pub async fn commit(&self, id: TxnId) -> Result<Step> {
        let mut shared = self.inner.lock().await;
        if shared.coordinator.state(id) == Some(TxnState::Aborted) {
            return Ok(Step::Wounded);
        }
        let result = shared.coordinator.commit(id);
        shared.dispatch();
        result.map(|()| Step::Done)
    }

    pub async fn abort(&self, id: TxnId) -> Result<()> {
        let mut shared = self.inner.lock().await;
        let result = shared.coordinator.abort(id);
        shared.dispatch();
        result
    }

    /// Start the next incarnation of a wounded or aborted transaction
    pub async fn restart(&self, id: TxnId) -> Result<Transaction> {
        let mut shared = self.inner.lock().await;
        let request = shared
            .coordinator
            .pending_restart(id)
            .ok_or(Error::NoPendingRestart(id))?;
        let txn = shared.coordinator.restart(request);
        shared.dispatch();
        txn
    }

    /// Run `f` against a consistent view of the coordinator
    pub async fn inspect<R>(&self, f: impl FnOnce(&Coordinator) -> R) -> R {
        let shared = self.inner.lock().await;
        f(&shared.coordinator)
    }

    async fn access(&self, item: &str, operation: Operation) -> Result<Step> {
        let id = operation.txn();
        let parked = {
            let mut shared = self.inner.lock().await;
            if shared.coordinator.state(id) == Some(TxnState::Aborted) {
                return Ok(Step::Wounded);
            }
            let outcome = shared.coordinator.apply(&operation)?;
            if outcome == Outcome::Waiting {
                let (waker, parked) = oneshot::channel();
                shared.parked.insert((item.to_string(), id), waker);
                shared.dispatch();
                parked
            } else {
                shared.dispatch();
                return Ok(Step::Done);
            }
        };

        debug!(txn = %id, op = %operation, "actor suspended");
        match parked.await {
            Ok(Wakeup::Granted) => Ok(Step::Done),
            Ok(Wakeup::Wounded) | Err(_) => Ok(Step::Wounded),
        }
    }
}
