//! Concurrent simulation of a schedule
//!
//! Each transaction becomes a tokio task driving a shared coordinator. Ages
//! follow the order of the `b` operations in the file; everything after that
//! is decided by the scheduler, so output order varies from run to run.
//!
//! An actor that is wounded restarts and re-runs its program from the top.
//! An explicit `a<n>` ends the actor without a restart.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use woundwait_core::{
    Coordinator, Error, Notification, Operation, SharedCoordinator, Step, TxnId, TxnState,
};

use crate::commands::{load_schedule, schedule_files};
use crate::config::OutputFormat;
use crate::output::{self, Record};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct SimulateOptions {
    pub files: Vec<PathBuf>,
    pub input_dir: PathBuf,
    pub format: OutputFormat,
    /// Give up on actors that are still running after this long
    pub timeout: Duration,
}

/// One transaction's work: its accesses up to the first commit or abort
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub txn: TxnId,
    pub program: Vec<Operation>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub file: String,
    pub transactions: usize,
    pub committed: Vec<TxnId>,
    pub restarts: u32,
    /// Actors blocked behind a transaction that never finishes
    pub stalled: Vec<TxnId>,
    pub failed: Vec<TxnId>,
}

/// Split a schedule into actors, in the order their `b` operations appear
///
/// Operations of a transaction before its `b` or after its first `e`/`a`
/// are dropped.
#[must_use]
pub fn actors(operations: &[Operation]) -> Vec<Actor> {
    let mut order = Vec::new();
    let mut programs: BTreeMap<TxnId, (Vec<Operation>, bool)> = BTreeMap::new();

    for operation in operations {
        let txn = operation.txn();
        match (operation, programs.get_mut(&txn)) {
            (Operation::Begin { .. }, None) => {
                order.push(txn);
                programs.insert(txn, (Vec::new(), false));
            }
            (_, Some((program, finished))) if !*finished => {
                if matches!(operation, Operation::Begin { .. }) {
                    tracing::warn!(%txn, "begin of a running transaction ignored");
                    continue;
                }
                *finished = matches!(operation, Operation::Commit { .. } | Operation::Abort { .. });
                program.push(operation.clone());
            }
            _ => tracing::warn!(%txn, op = %operation, "operation outside a transaction ignored"),
        }
    }

    order
        .into_iter()
        .filter_map(|txn| {
            programs
                .remove(&txn)
                .map(|(program, _)| Actor { txn, program })
        })
        .collect()
}

/// Run one actor to completion; returns the number of incarnations used
async fn run_actor(shared: SharedCoordinator, actor: Actor) -> woundwait_core::Result<u32> {
    let txn = actor.txn;
    let mut attempts = 1;
    'attempt: loop {
        for operation in &actor.program {
            let step = match operation {
                Operation::Read { item, .. } => shared.read(txn, item).await?,
                Operation::Write { item, .. } => shared.write(txn, item).await?,
                Operation::Commit { .. } => shared.commit(txn).await?,
                Operation::Abort { .. } => {
                    return match shared.abort(txn).await {
                        Ok(())
                        | Err(Error::InvalidState {
                            state: TxnState::Aborted,
                            ..
                        }) => Ok(attempts),
                        Err(e) => Err(e),
                    };
                }
                Operation::Begin { .. } => continue,
            };
            if step == Step::Wounded {
                shared.restart(txn).await?;
                attempts += 1;
                continue 'attempt;
            }
            tokio::task::yield_now().await;
        }
        return Ok(attempts);
    }
}

/// Everything one simulation produced
#[derive(Debug)]
pub struct Simulation {
    pub summary: SimulationSummary,
    /// Notifications in coordinator order
    pub stream: Vec<Notification>,
    pub errors: Vec<(TxnId, Error)>,
}

/// Simulate one parsed schedule
///
/// # Errors
///
/// Returns error if a `b` operation is rejected or an actor task panics
pub async fn simulate(name: &str, operations: &[Operation], timeout: Duration) -> Result<Simulation> {
    let actors = actors(operations);
    let (observer, mut notes) = mpsc::unbounded_channel::<Notification>();
    let shared = SharedCoordinator::with_observer(Coordinator::new(), observer);

    // Begin sequentially so ages follow the schedule
    for actor in &actors {
        shared.begin(actor.txn).await?;
    }

    let mut summary = SimulationSummary {
        file: name.to_string(),
        transactions: actors.len(),
        ..SimulationSummary::default()
    };
    let mut running: BTreeSet<TxnId> = actors.iter().map(|a| a.txn).collect();
    let mut tasks = JoinSet::new();
    for actor in actors {
        let shared = shared.clone();
        tasks.spawn(async move {
            let txn = actor.txn;
            (txn, run_actor(shared, actor).await)
        });
    }

    let deadline = Instant::now() + timeout;
    let mut errors = Vec::new();
    while !running.is_empty() {
        match tokio::time::timeout(POLL_INTERVAL, tasks.join_next()).await {
            Ok(Some(Ok((txn, result)))) => {
                running.remove(&txn);
                match result {
                    Ok(attempts) => summary.restarts += attempts - 1,
                    Err(e) => {
                        tracing::warn!(%txn, error = %e, "actor failed");
                        summary.failed.push(txn);
                        errors.push((txn, e));
                    }
                }
            }
            Ok(Some(Err(join_error))) => anyhow::bail!("actor task failed: {join_error}"),
            Ok(None) => break,
            Err(_) => {
                // Nobody left to release the locks they wait for
                let stalled = shared
                    .inspect(|c| running.iter().all(|t| c.state(*t) == Some(TxnState::Waiting)))
                    .await;
                if stalled {
                    break;
                }
                if Instant::now() >= deadline {
                    tracing::error!(?running, "simulation timed out");
                    break;
                }
            }
        }
    }
    tasks.abort_all();

    summary.stalled = running.into_iter().collect();
    summary.committed = shared
        .inspect(|c| c.registry().in_state(TxnState::Committed))
        .await;
    drop(shared);

    let mut stream = Vec::new();
    while let Ok(note) = notes.try_recv() {
        stream.push(note);
    }
    stream.sort_by_key(|n| n.seq);

    Ok(Simulation {
        summary,
        stream,
        errors,
    })
}

fn print_simulation<W: Write>(simulation: &Simulation, format: OutputFormat, out: &mut W) -> Result<()> {
    let summary = &simulation.summary;
    match format {
        OutputFormat::Text => {
            for note in &simulation.stream {
                writeln!(out, "{}", output::status_line(&note.kind))?;
            }
            for (txn, error) in &simulation.errors {
                writeln!(out, "{txn} failed: {error}")?;
            }
            writeln!(
                out,
                "{}: {} transactions, {} committed, {} restarts",
                summary.file,
                summary.transactions,
                summary.committed.len(),
                summary.restarts
            )?;
            if !summary.stalled.is_empty() {
                let stalled: Vec<String> = summary.stalled.iter().map(ToString::to_string).collect();
                writeln!(out, "Stalled: {}", stalled.join(", "))?;
            }
            writeln!(out, "{}", output::separator())?;
        }
        OutputFormat::Json => {
            for note in &simulation.stream {
                writeln!(out, "{}", serde_json::to_string(&Record::Notification(note))?)?;
            }
            for (txn, error) in &simulation.errors {
                let record = Record::Failed {
                    txn: *txn,
                    error: error.to_string(),
                };
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
            }
            writeln!(out, "{}", serde_json::to_string(&Record::Simulation(summary))?)?;
        }
    }
    Ok(())
}

/// # Errors
///
/// Returns error if a schedule fails to parse or an actor task panics
pub async fn run(options: &SimulateOptions) -> Result<()> {
    let files = schedule_files(&options.files, &options.input_dir)?;
    for path in &files {
        let operations = load_schedule(path)?;
        let name = path.display().to_string();
        tracing::info!(file = %name, "simulating schedule");
        let simulation = simulate(&name, &operations, options.timeout).await?;
        let stdout = std::io::stdout();
        print_simulation(&simulation, options.format, &mut stdout.lock())?;
    }
    Ok(())
}
