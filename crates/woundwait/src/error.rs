use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("line {line}: unrecognised operation '{token}'")]
    InvalidToken { line: usize, token: String },

    #[error("line {line}: '{token}' needs an item, e.g. r1(x)")]
    MissingItem { line: usize, token: String },

    #[error("line {line}: '{token}' does not take an item")]
    UnexpectedItem { line: usize, token: String },

    #[error("line {line}: transaction id in '{token}' is out of range")]
    InvalidId { line: usize, token: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, Error>;
