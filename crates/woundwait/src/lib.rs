//! Woundwait - replay transaction schedules through a wound-wait lock manager
//!
//! Parses `b1`, `r1(x)`, `w1(x)`, `e1` schedules, feeds them to
//! `woundwait-core` and reports every locking decision.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod event_log;
pub mod output;
pub mod schedule;

pub use error::{Error, Result};
