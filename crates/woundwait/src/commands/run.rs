//! Sequential replay of schedule files
//!
//! Every file gets a fresh coordinator. Decisions are printed as they are
//! made and appended to the event log.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use woundwait_core::{Operation, ReplaySummary, Replayer, StepReport};

use crate::commands::{load_schedule, schedule_files};
use crate::config::OutputFormat;
use crate::event_log::{EventLog, LogLine};
use crate::output::{self, Record};

/// Run command options
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Schedules to replay; empty means every `*.txt` in `input_dir`
    pub files: Vec<PathBuf>,
    pub input_dir: PathBuf,
    pub format: OutputFormat,
    /// Event log path, `None` disables logging
    pub log_file: Option<PathBuf>,
    pub dump_tables: bool,
}

/// Replay every schedule, continuing past files that fail to parse
///
/// # Errors
///
/// Returns error if any file failed to parse or the log cannot be written
pub fn run(options: &RunOptions) -> Result<()> {
    let files = schedule_files(&options.files, &options.input_dir)?;
    let mut log = options
        .log_file
        .as_deref()
        .map(|path| EventLog::open(path, options.dump_tables))
        .transpose()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0usize;

    for path in &files {
        let name = path.display().to_string();
        let operations = match load_schedule(path) {
            Ok(operations) => operations,
            Err(e) => {
                tracing::error!(file = %name, error = %e, "skipping schedule");
                eprintln!("Error: {e:#}");
                failed += 1;
                continue;
            }
        };
        tracing::info!(file = %name, operations = operations.len(), "replaying schedule");
        replay_schedule(&name, operations, options.format, log.as_mut(), &mut out)?;
    }

    if let Some(log) = log.as_mut() {
        log.flush()?;
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} schedule file(s) failed to parse", files.len());
    }
    Ok(())
}

/// Replay one parsed schedule against a fresh coordinator
pub fn replay_schedule<W: Write>(
    name: &str,
    operations: Vec<Operation>,
    format: OutputFormat,
    mut log: Option<&mut EventLog>,
    out: &mut W,
) -> Result<ReplaySummary> {
    if let Some(log) = log.as_deref_mut() {
        log.write(&LogLine::Schedule {
            file: name,
            operations: operations.len(),
        })?;
    }

    let mut replayer = Replayer::new();
    for operation in operations {
        let report = replayer.step(operation);
        if let Some(log) = log.as_deref_mut() {
            log.write(&LogLine::Operation {
                operation: &report.operation,
            })?;
            log.notifications(&report.notifications)?;
            log.tables(replayer.coordinator())?;
        }
        print_report(&report, format, out)?;
    }

    let summary = replayer.finish();
    match format {
        OutputFormat::Text => {
            for line in output::summary_lines(name, &summary) {
                writeln!(out, "{line}")?;
            }
            writeln!(out, "{}", output::separator())?;
        }
        OutputFormat::Json => {
            let record = Record::Summary {
                file: name.to_string(),
                summary: &summary,
            };
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
        }
    }
    Ok(summary)
}

fn print_report<W: Write>(report: &StepReport, format: OutputFormat, out: &mut W) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if report.was_deferred() {
                writeln!(out, "{}", output::deferred_line(&report.operation))?;
            }
            for note in &report.notifications {
                writeln!(out, "{}", output::status_line(&note.kind))?;
            }
            for (operation, error) in &report.rejected {
                writeln!(out, "{}", output::rejected_line(operation, error))?;
            }
        }
        OutputFormat::Json => {
            let mut records = Vec::new();
            if report.was_deferred() {
                records.push(Record::Deferred {
                    operation: &report.operation,
                });
            }
            records.extend(report.notifications.iter().map(Record::Notification));
            records.extend(report.rejected.iter().map(|(operation, error)| {
                Record::Rejected {
                    operation,
                    error: error.to_string(),
                }
            }));
            for record in records {
                writeln!(out, "{}", serde_json::to_string(&record)?)?;
            }
        }
    }
    Ok(())
}
