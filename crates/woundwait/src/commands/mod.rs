//! Command implementations for the woundwait CLI
//!
//! `run` replays schedules sequentially, `check` only parses them and
//! `simulate` runs every transaction as a concurrent actor.

pub mod check;
pub mod run;
pub mod simulate;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use woundwait_core::Operation;

use crate::schedule;

/// Files named on the command line, or every `*.txt` in `input_dir` sorted by name
pub fn schedule_files(files: &[PathBuf], input_dir: &Path) -> Result<Vec<PathBuf>> {
    if !files.is_empty() {
        return Ok(files.to_vec());
    }

    let entries = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read input directory {}", input_dir.display()))?;
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "txt"))
        .collect();
    found.sort();

    if found.is_empty() {
        anyhow::bail!("No *.txt schedules found in {}", input_dir.display());
    }
    Ok(found)
}

/// Read and parse one schedule file
pub fn load_schedule(path: &Path) -> Result<Vec<Operation>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schedule {}", path.display()))?;
    schedule::parse(&text).with_context(|| format!("Invalid schedule {}", path.display()))
}
