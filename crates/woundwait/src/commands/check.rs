//! Parse schedules without running them

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use woundwait_core::Operation;

use crate::commands::{load_schedule, schedule_files};
use crate::config::OutputFormat;

#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub files: Vec<PathBuf>,
    pub input_dir: PathBuf,
    pub format: OutputFormat,
}

/// Outcome for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub file: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transactions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckReport {
    fn parsed(file: String, operations: &[Operation]) -> Self {
        let transactions: BTreeSet<_> = operations.iter().map(Operation::txn).collect();
        Self {
            file,
            ok: true,
            operations: Some(operations.len()),
            transactions: Some(transactions.len()),
            error: None,
        }
    }

    fn failed(file: String, error: &anyhow::Error) -> Self {
        Self {
            file,
            ok: false,
            operations: None,
            transactions: None,
            error: Some(format!("{error:#}")),
        }
    }
}

/// # Errors
///
/// Returns error if any schedule fails to parse
pub fn run(options: &CheckOptions) -> Result<()> {
    let files = schedule_files(&options.files, &options.input_dir)?;
    let reports: Vec<CheckReport> = files
        .iter()
        .map(|path| {
            let file = path.display().to_string();
            match load_schedule(path) {
                Ok(operations) => CheckReport::parsed(file, &operations),
                Err(e) => CheckReport::failed(file, &e),
            }
        })
        .collect();

    let stdout = std::io::stdout();
    print_reports(&reports, options.format, &mut stdout.lock())?;

    let failed = reports.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} schedule file(s) failed to parse", reports.len());
    }
    Ok(())
}

fn print_reports<W: Write>(reports: &[CheckReport], format: OutputFormat, out: &mut W) -> Result<()> {
    for report in reports {
        match format {
            OutputFormat::Json => writeln!(out, "{}", serde_json::to_string(report)?)?,
            OutputFormat::Text => match (&report.error, report.operations, report.transactions) {
                (Some(error), _, _) => writeln!(out, "✗ {error}")?,
                (None, Some(operations), Some(transactions)) => writeln!(
                    out,
                    "✓ {}: {operations} operations, {transactions} transactions",
                    report.file
                )?,
                (None, _, _) => writeln!(out, "✓ {}", report.file)?,
            },
        }
    }
    Ok(())
}
