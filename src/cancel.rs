//! Cooperative cancellation.
//!
//! One flag per operation id.  The pipeline polls [`checkpoint`] at every
//! loop boundary (per entry, per block); observing a raised flag unwinds the
//! operation as `UserAbort`, the current slice is flushed by the normal
//! teardown path and the archive is left unterminated (no terminator means
//! the archive reads as incomplete).

use crate::error::{ArchiveError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

fn registry() -> &'static Mutex<HashMap<u64, Arc<AtomicBool>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<u64, Arc<AtomicBool>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

fn flag_for(op: u64) -> Arc<AtomicBool> {
    let mut map = registry().lock().unwrap_or_else(|p| p.into_inner());
    map.entry(op).or_insert_with(|| Arc::new(AtomicBool::new(false))).clone()
}

/// Request cancellation of operation `op`.  Safe from any thread, including
/// a signal-forwarding one.
pub fn request(op: u64) {
    flag_for(op).store(true, Ordering::SeqCst);
}

/// Clear any pending request for `op`.  Called when an operation id is reused.
pub fn clear(op: u64) {
    flag_for(op).store(false, Ordering::SeqCst);
}

/// Poll point.  Returns `UserAbort` once a request has been observed.
pub fn checkpoint(op: u64) -> Result<()> {
    if flag_for(op).load(Ordering::SeqCst) {
        Err(ArchiveError::UserAbort(format!("operation {op} cancelled")))
    } else {
        Ok(())
    }
}
