use thiserror::Error;

use crate::ids::Address;

pub type Result<T> = std::result::Result<T, Error>;

/// Contract violations. Expected command outcomes (stale revisions, missing
/// targets, no-op edits) are reported through [`crate::Outcome`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    #[error("command target {target} lies outside transaction scope {scope}")]
    OutOfScope { target: Address, scope: Address },
    #[error("transaction must contain at least one command")]
    EmptyTransaction,
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
}
