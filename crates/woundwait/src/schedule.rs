//! Schedule parser
//!
//! One or more operations per line, separated by whitespace or `;`:
//!
//! ```text
//! b1; r1(x)
//! b2 w2(x)
//! e1      # comment
//! e2
//! ```
//!
//! `a<n>` aborts transaction `n` on request.

use std::sync::OnceLock;

use regex::Regex;
use woundwait_core::{Operation, TxnId};

use crate::error::{Error, Result};

fn token_regex() -> Option<&'static Regex> {
    static TOKEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
    TOKEN_RE
        .get_or_init(|| {
            Regex::new(r"^(?P<op>[brwea])(?P<id>\d+)(?:\((?P<item>[A-Za-z_][A-Za-z0-9_]*)\))?$").ok()
        })
        .as_ref()
}

/// Parse a whole schedule, reporting the first malformed token
pub fn parse(text: &str) -> Result<Vec<Operation>> {
    let mut operations = Vec::new();
    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or_default();
        for token in line
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            operations.push(parse_token(token, index + 1)?);
        }
    }
    Ok(operations)
}

/// Parse one token such as `w3(acct)`
pub fn parse_token(token: &str, line: usize) -> Result<Operation> {
    let invalid = || Error::InvalidToken {
        line,
        token: token.to_string(),
    };
    let caps = token_regex()
        .and_then(|re| re.captures(token))
        .ok_or_else(invalid)?;

    let id: u32 = caps["id"].parse().map_err(|_| Error::InvalidId {
        line,
        token: token.to_string(),
    })?;
    let txn = TxnId::new(id);
    let item = caps.name("item").map(|m| m.as_str().to_string());

    match (&caps["op"], item) {
        ("r", Some(item)) => Ok(Operation::Read { txn, item }),
        ("w", Some(item)) => Ok(Operation::Write { txn, item }),
        ("r" | "w", None) => Err(Error::MissingItem {
            line,
            token: token.to_string(),
        }),
        (_, Some(_)) => Err(Error::UnexpectedItem {
            line,
            token: token.to_string(),
        }),
        ("b", None) => Ok(Operation::Begin { txn }),
        ("e", None) => Ok(Operation::Commit { txn }),
        ("a", None) => Ok(Operation::Abort { txn }),
        _ => Err(invalid()),
    }
}
