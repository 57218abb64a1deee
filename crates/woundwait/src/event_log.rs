//! Append-only JSON-lines log of every decision
//!
//! Each line is a [`LogLine`]. With table dumps enabled the lock table and
//! the transaction table follow every scheduled operation.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use woundwait_core::{Coordinator, LockEntry, Notification, Operation, Transaction};

use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(tag = "log", rename_all = "snake_case")]
pub enum LogLine<'a> {
    /// Start of a schedule file
    Schedule { file: &'a str, operations: usize },
    Operation { operation: &'a Operation },
    Notification(&'a Notification),
    Tables {
        locks: Vec<LockEntry>,
        transactions: Vec<&'a Transaction>,
    },
}

#[derive(Debug)]
pub struct EventLog {
    writer: BufWriter<File>,
    dump_tables: bool,
}

impl EventLog {
    /// Open `path` for appending, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened
    pub fn open(path: &Path, dump_tables: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::Io(format!("Failed to open log {}: {e}", path.display())))?;
        Ok(Self {
            writer: BufWriter::new(file),
            dump_tables,
        })
    }

    pub fn write(&mut self, line: &LogLine<'_>) -> Result<()> {
        let json = serde_json::to_string(line)
            .map_err(|e| Error::Io(format!("Failed to encode log line: {e}")))?;
        writeln!(self.writer, "{json}").map_err(|e| Error::Io(format!("Failed to write log: {e}")))
    }

    pub fn notifications(&mut self, notifications: &[Notification]) -> Result<()> {
        notifications
            .iter()
            .try_for_each(|n| self.write(&LogLine::Notification(n)))
    }

    /// Dump both tables if enabled
    pub fn tables(&mut self, coordinator: &Coordinator) -> Result<()> {
        if !self.dump_tables {
            return Ok(());
        }
        self.write(&LogLine::Tables {
            locks: coordinator.lock_table().snapshot(),
            transactions: coordinator.registry().transactions(),
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .map_err(|e| Error::Io(format!("Failed to flush log: {e}")))
    }
}
