//! Scenario tests for the wound-wait coordinator
//!
//! Each test replays a short schedule against a fresh coordinator and checks
//! the decisions it made, the resulting lock table and the transaction states.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use woundwait_core::{
    AbortReason, Coordinator, Error, LockMode, NotificationKind, Outcome, TxnId, TxnState,
};

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

fn holders(coordinator: &Coordinator, item: &str) -> Vec<TxnId> {
    coordinator
        .lock_table()
        .entry(item)
        .map(|e| e.holders.iter().copied().collect())
        .unwrap_or_default()
}

/// Scenario: shared compatibility
///   Given T1 holds a read lock on x
///   When T2 reads x
///   Then both are granted immediately and nobody waits
#[test]
fn shared_readers_are_granted_together() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    assert_eq!(c.read(t(1), "x").unwrap(), Outcome::Granted);
    c.begin(t(2)).unwrap();
    assert_eq!(c.read(t(2), "x").unwrap(), Outcome::Granted);

    assert_eq!(holders(&c, "x"), vec![t(1), t(2)]);
    assert_eq!(c.lock_table().entry("x").unwrap().mode, Some(LockMode::Shared));
    assert!(c.wait_for_edges().is_empty());
    assert!(!kinds(&mut c)
        .iter()
        .any(|k| matches!(k, NotificationKind::WaitEntered { .. })));
}

/// Scenario: younger waits
///   Given T1 (older) holds a read lock on x
///   When the younger T2 writes x
///   Then T2 waits, and after T1 commits T2 holds x exclusively and is active
#[test]
fn younger_writer_waits_for_older_reader() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.read(t(1), "x").unwrap();
    c.begin(t(2)).unwrap();
    assert!(c
        .transaction(t(1))
        .unwrap()
        .age
        .is_older_than(c.transaction(t(2)).unwrap().age));

    assert_eq!(c.write(t(2), "x").unwrap(), Outcome::Waiting);
    assert_eq!(c.state(t(2)), Some(TxnState::Waiting));
    assert!(kinds(&mut c).contains(&NotificationKind::WaitEntered {
        txn: t(2),
        item: "x".to_string(),
        mode: LockMode::Exclusive,
        blocked_by: vec![t(1)],
    }));

    c.commit(t(1)).unwrap();
    assert_eq!(c.state(t(2)), Some(TxnState::Active));
    assert_eq!(c.lock_table().held_mode("x", t(2)), Some(LockMode::Exclusive));
    assert!(kinds(&mut c).contains(&NotificationKind::Resumed {
        txn: t(2),
        item: "x".to_string(),
        mode: LockMode::Exclusive,
    }));
}

/// Scenario: wound
///   Given T1 is older than T2 (T1 began first) and T2 holds a write lock on x
///   When T1 reads x
///   Then T2 is wounded immediately, releases x and is queued for restart
///   with a strictly greater age, and T1 is granted x shared
#[test]
fn older_reader_wounds_younger_writer() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.begin(t(2)).unwrap();
    c.write(t(2), "x").unwrap();
    let old_age = c.transaction(t(2)).unwrap().age;
    c.drain_notifications();

    assert_eq!(c.read(t(1), "x").unwrap(), Outcome::Granted);
    assert_eq!(c.state(t(2)), Some(TxnState::Aborted));
    assert!(c.lock_table().held_by(t(2)).is_empty());
    assert_eq!(holders(&c, "x"), vec![t(1)]);
    assert_eq!(c.lock_table().entry("x").unwrap().mode, Some(LockMode::Shared));

    let notes = kinds(&mut c);
    assert!(notes.contains(&NotificationKind::Wounded {
        wounder: t(1),
        wounded: t(2),
        item: "x".to_string(),
    }));
    assert!(notes.iter().any(|k| matches!(
        k,
        NotificationKind::Aborted {
            reason: AbortReason::Wounded { by },
            ..
        } if *by == t(1)
    )));

    let request = c.take_restart().unwrap();
    assert_eq!(request.txn, t(2));
    let reborn = c.restart(request).unwrap();
    assert_eq!(reborn.incarnation.get(), 2);
    assert_eq!(reborn.state, TxnState::Active);
    assert!(old_age.is_older_than(reborn.age));
    assert!(c.transaction(t(1)).unwrap().age.is_older_than(reborn.age));
}

/// Same tokens as the wound scenario but in begin order: T2 began first and is
/// therefore older, so T1 has to wait instead of wounding.
#[test]
fn begin_order_decides_age() {
    let mut c = Coordinator::new();
    c.begin(t(2)).unwrap();
    c.write(t(2), "x").unwrap();
    c.begin(t(1)).unwrap();

    assert_eq!(c.read(t(1), "x").unwrap(), Outcome::Waiting);
    assert_eq!(c.state(t(2)), Some(TxnState::Active));
    assert_eq!(c.wait_for_edges(), vec![(t(1), t(2))]);
}

/// Scenario: upgrade
///   Given T1 is the only reader of x
///   When T1 writes x
///   Then the lock is upgraded in place without any conflict
#[test]
fn sole_reader_upgrades_in_place() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.read(t(1), "x").unwrap();
    c.drain_notifications();

    assert_eq!(c.write(t(1), "x").unwrap(), Outcome::Granted);
    assert_eq!(
        kinds(&mut c),
        vec![NotificationKind::LockGranted {
            txn: t(1),
            item: "x".to_string(),
            mode: LockMode::Exclusive,
            upgraded: true,
        }]
    );
    assert_eq!(holders(&c, "x"), vec![t(1)]);
    assert_eq!(c.lock_table().held_mode("x", t(1)), Some(LockMode::Exclusive));
}

#[test]
fn upgrade_with_other_older_reader_waits() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.begin(t(2)).unwrap();
    c.read(t(1), "x").unwrap();
    c.read(t(2), "x").unwrap();

    assert_eq!(c.write(t(2), "x").unwrap(), Outcome::Waiting);
    // T2 keeps its read lock while it waits for the upgrade
    assert_eq!(c.lock_table().held_mode("x", t(2)), Some(LockMode::Shared));

    c.commit(t(1)).unwrap();
    assert_eq!(c.state(t(2)), Some(TxnState::Active));
    assert_eq!(c.lock_table().held_mode("x", t(2)), Some(LockMode::Exclusive));
    c.lock_table().verify().unwrap();
}

#[test]
fn upgrade_with_younger_reader_wounds_it() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.begin(t(2)).unwrap();
    c.read(t(1), "x").unwrap();
    c.read(t(2), "x").unwrap();

    assert_eq!(c.write(t(1), "x").unwrap(), Outcome::Granted);
    assert_eq!(c.state(t(2)), Some(TxnState::Aborted));
    assert_eq!(holders(&c, "x"), vec![t(1)]);
    assert_eq!(c.lock_table().held_mode("x", t(1)), Some(LockMode::Exclusive));
}

#[test]
fn aborted_transaction_holds_nothing() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.read(t(1), "a").unwrap();
    c.write(t(1), "b").unwrap();
    c.begin(t(2)).unwrap();
    c.write(t(2), "c").unwrap();
    c.read(t(2), "a").unwrap();

    c.abort(t(2)).unwrap();
    assert!(c.lock_table().held_by(t(2)).is_empty());
    assert!(!c.lock_table().is_queued(t(2)));
    assert!(kinds(&mut c).iter().any(|k| matches!(
        k,
        NotificationKind::Aborted {
            reason: AbortReason::Requested,
            ..
        }
    )));
    assert_eq!(c.pending_restart(t(2)).map(|r| r.txn), Some(t(2)));
}

#[test]
fn errors_are_distinct_from_wounds() {
    let mut c = Coordinator::new();
    assert_eq!(c.commit(t(9)), Err(Error::UnknownTransaction(t(9))));

    c.begin(t(1)).unwrap();
    c.begin(t(2)).unwrap();
    c.write(t(2), "x").unwrap();
    c.read(t(1), "x").unwrap();

    // The wounded incarnation rejects further work until restarted
    assert!(matches!(
        c.write(t(2), "y"),
        Err(Error::InvalidState {
            state: TxnState::Aborted,
            ..
        })
    ));
    assert_eq!(c.begin(t(2)), Err(Error::DuplicateBegin(t(2))));
}

#[test]
fn committed_id_can_begin_again() {
    let mut c = Coordinator::new();
    c.begin(t(1)).unwrap();
    c.commit(t(1)).unwrap();
    let again = c.begin(t(1)).unwrap();
    assert_eq!(again.state, TxnState::Active);
    assert_eq!(again.incarnation.get(), 1);
}
