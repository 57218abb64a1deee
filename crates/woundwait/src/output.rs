//! Rendering of decisions for the terminal
//!
//! Text mode prints one status line per notification in the classic
//! wound-wait trace style; JSON mode prints one [`Record`] per line.

use serde::Serialize;
use woundwait_core::{
    AbortReason, LockMode, Notification, NotificationKind, Operation, ReplaySummary, TxnId,
};

use crate::commands::simulate::SimulationSummary;

/// Width of the rule printed between schedule files
pub const SEPARATOR_WIDTH: usize = 148;

#[must_use]
pub fn separator() -> String {
    "=".repeat(SEPARATOR_WIDTH)
}

/// One line of `--json` output
#[derive(Debug, Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum Record<'a> {
    Notification(&'a Notification),
    Deferred {
        operation: &'a Operation,
    },
    Rejected {
        operation: &'a Operation,
        error: String,
    },
    Summary {
        file: String,
        #[serde(flatten)]
        summary: &'a ReplaySummary,
    },
    /// An actor gave up with an error
    Failed {
        txn: TxnId,
        error: String,
    },
    Simulation(&'a SimulationSummary),
}

fn lock_word(mode: LockMode) -> &'static str {
    match mode {
        LockMode::Shared => "read",
        LockMode::Exclusive => "write",
    }
}

fn join(ids: &[TxnId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Human-readable line for one notification
#[must_use]
pub fn status_line(kind: &NotificationKind) -> String {
    match kind {
        NotificationKind::Began { txn, age, .. } => {
            format!("{txn} begins ID={} TS={age} state=active", txn.get())
        }
        NotificationKind::LockGranted {
            txn,
            item,
            upgraded: true,
            ..
        } => format!("Read lock on {item} by {txn} is upgraded to write lock"),
        NotificationKind::LockGranted {
            txn, item, mode, ..
        } => format!("{item} is {} locked by {txn}", lock_word(*mode)),
        NotificationKind::WaitEntered {
            txn,
            item,
            mode,
            blocked_by,
        } => format!(
            "{txn} waits for {} lock on {item} as {txn} is younger than {} (following wound-wait)",
            lock_word(*mode),
            join(blocked_by)
        ),
        NotificationKind::Wounded {
            wounder, wounded, ..
        } => format!("Abort {wounded} as {wounded} is younger than {wounder} (following wound-wait)"),
        NotificationKind::Aborted {
            txn,
            incarnation,
            reason: AbortReason::Wounded { by },
        } => format!("{txn} {incarnation} is aborted and releases its locks to {by}"),
        NotificationKind::Aborted {
            txn,
            incarnation,
            reason: AbortReason::Requested,
        } => format!("{txn} {incarnation} is aborted on request"),
        NotificationKind::Resumed { txn, item, mode } => {
            format!("{txn} resumes: {item} is {} locked by {txn}", lock_word(*mode))
        }
        NotificationKind::Committed { txn, .. } => format!("{txn} is committed"),
        NotificationKind::Restarted { txn, to, age, .. } => {
            format!("Restarting {txn} as incarnation {to} with TS={age}")
        }
    }
}

#[must_use]
pub fn deferred_line(operation: &Operation) -> String {
    format!(
        "{operation} is held back as {} is waiting",
        operation.txn()
    )
}

#[must_use]
pub fn rejected_line(operation: &Operation, error: &woundwait_core::Error) -> String {
    format!("{operation} is rejected: {error}")
}

/// Closing lines for one schedule file
#[must_use]
pub fn summary_lines(file: &str, summary: &ReplaySummary) -> Vec<String> {
    let mut lines = vec![format!(
        "{file}: {} operations, {} committed, {} restarts, {} rejected",
        summary.operations,
        summary.committed.len(),
        summary.restarts,
        summary.rejected
    )];
    if !summary.active.is_empty() {
        lines.push(format!("Still active: {}", join(&summary.active)));
    }
    if !summary.waiting.is_empty() {
        lines.push(format!(
            "Still waiting: {} ({} operations held back)",
            join(&summary.waiting),
            summary.deferred
        ));
    }
    lines
}
