//! Error taxonomy of the engine.
//!
//! Every failure is classified once, at the layer that first observes it,
//! into one of the kinds below.  The facade and the CLIs never re-interpret
//! the underlying cause; they only map the kind to a process exit code.
//!
//! `Data` is the only recoverable kind: the extract/test loops trap it,
//! record it against the operation statistics, and continue with the next
//! entry.  Every other kind unwinds the current operation.

use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Error, Debug)]
pub enum ArchiveError {
    /// Bad argument or invariant breach surfaced from a library call.
    #[error("range error: {0}")]
    Range(String),

    /// Allocation failure (or a size that cannot fit in memory).
    #[error("memory exhausted: {0}")]
    Memory(String),

    /// Non-recoverable low-level I/O error.
    #[error("hardware or I/O error: {0}")]
    Hardware(String),

    /// Payload or checksum mismatch on a specific entry.
    #[error("data corruption: {0}")]
    Data(String),

    /// Unsupported format, edition, or option.
    #[error("unsupported feature: {0}")]
    Feature(String),

    /// The user refused a prompt.
    #[error("aborted on user request: {0}")]
    UserAbort(String),

    /// A between-slice hook or external restore command failed.
    #[error("external command failed: {0}")]
    Script(String),

    /// An invariant that must never hold did.  Always a defect in this crate.
    #[error("internal error (please report): {0}")]
    Bug(String),
}

/// Process exit codes, shared by both binaries.
pub mod exit {
    pub const OK: i32 = 0;
    pub const SYNTAX: i32 = 1;
    pub const OPERATION: i32 = 2;
    pub const BUG: i32 = 3;
    pub const USER_ABORT: i32 = 4;
    pub const DATA: i32 = 5;
    pub const SCRIPT: i32 = 6;
}

impl ArchiveError {
    /// Shorthand for the `Bug` kind used at internal-invariant checks.
    pub fn bug(what: impl Into<String>) -> Self {
        ArchiveError::Bug(what.into())
    }

    /// Exit code this error maps to when it reaches a `main`.
    pub fn exit_code(&self) -> i32 {
        match self {
            ArchiveError::Range(_) | ArchiveError::Memory(_) | ArchiveError::Hardware(_) => {
                exit::OPERATION
            }
            ArchiveError::Feature(_) => exit::OPERATION,
            ArchiveError::Data(_) => exit::DATA,
            ArchiveError::UserAbort(_) => exit::USER_ABORT,
            ArchiveError::Script(_) => exit::SCRIPT,
            ArchiveError::Bug(_) => exit::BUG,
        }
    }
}

impl From<io::Error> for ArchiveError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::OutOfMemory => ArchiveError::Memory(e.to_string()),
            _ => ArchiveError::Hardware(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_kind() {
        assert_eq!(ArchiveError::Range("x".into()).exit_code(), exit::OPERATION);
        assert_eq!(ArchiveError::Data("x".into()).exit_code(), exit::DATA);
        assert_eq!(ArchiveError::UserAbort("x".into()).exit_code(), exit::USER_ABORT);
        assert_eq!(ArchiveError::Script("x".into()).exit_code(), exit::SCRIPT);
        assert_eq!(ArchiveError::bug("x").exit_code(), exit::BUG);
    }
}
