//! User-interaction context.
//!
//! The engine never touches stdin/stdout directly: every prompt and warning
//! goes through an [`Interact`] handle threaded into the operations.  The
//! three prompt protocols are: no-space ("free some space and continue?"),
//! unknown-edition ("try reading anyway?"), and overwrite-on-extract.
//! Prompts have no timeout.

use crate::error::{ArchiveError, Result};
use std::io::{self, BufRead, Write};

pub trait Interact {
    /// Ask a yes/no question.  Returns the user's answer.
    fn pause(&self, message: &str) -> bool;

    /// Emit a non-fatal warning.
    fn warn(&self, message: &str);

    /// Like [`Interact::pause`] but a negative answer becomes `UserAbort`.
    fn pause_or_abort(&self, message: &str) -> Result<()> {
        if self.pause(message) {
            Ok(())
        } else {
            Err(ArchiveError::UserAbort(message.to_string()))
        }
    }
}

/// Terminal-backed implementation used by the CLIs.
pub struct TtyInteract;

impl Interact for TtyInteract {
    fn pause(&self, message: &str) -> bool {
        let stdin = io::stdin();
        loop {
            eprint!("{message} [y/n] ");
            let _ = io::stderr().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return false;
            }
            match line.trim() {
                "y" | "Y" | "yes" => return true,
                "n" | "N" | "no" => return false,
                _ => eprintln!("please answer y or n"),
            }
        }
    }

    fn warn(&self, message: &str) {
        eprintln!("{message}");
    }
}

/// Non-interactive policy: every question gets the same fixed answer.
/// Used by tests and by batch invocations that must never block.
pub struct FixedAnswer(pub bool);

impl Interact for FixedAnswer {
    fn pause(&self, _message: &str) -> bool {
        self.0
    }

    fn warn(&self, _message: &str) {}
}
