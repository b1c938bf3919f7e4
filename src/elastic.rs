//! Elastic end-padding.
//!
//! The cipher frame pads its final clear block to a whole block boundary
//! with an elastic run: a sequence whose layout encodes its own total length
//! near both ends, so a reader scanning forward from the pad start or
//! backward from the pad end recovers the true end of the clear data.
//!
//! Layout for a run of `n` bytes:
//!
//! ```text
//! n == 1      X
//! n == 2      > <
//! 3..=255     > len ...zeros... len <        (len byte shared when n == 3)
//! 256..       > 0 hi lo ...zeros... hi lo 0 <
//! ```
//!
//! The single-byte length is always nonzero in the 3..=255 form, so the zero
//! right after `>` (or right before `<`) unambiguously selects the u16 form.

use crate::error::{ArchiveError, Result};

pub const MARK_SINGLE: u8 = b'X';
pub const MARK_OPEN: u8 = b'>';
pub const MARK_CLOSE: u8 = b'<';

/// Largest run the u16 form can express.
pub const MAX_RUN: usize = u16::MAX as usize;

/// Build an elastic run of exactly `n` bytes.
pub fn build(n: usize) -> Result<Vec<u8>> {
    match n {
        0 => Err(ArchiveError::Range("elastic run cannot be empty".into())),
        1 => Ok(vec![MARK_SINGLE]),
        2 => Ok(vec![MARK_OPEN, MARK_CLOSE]),
        3 => Ok(vec![MARK_OPEN, 3, MARK_CLOSE]),
        4..=255 if n != MARK_OPEN as usize && n != MARK_CLOSE as usize => {
            let mut run = vec![0u8; n];
            run[0] = MARK_OPEN;
            run[1] = n as u8;
            run[n - 2] = n as u8;
            run[n - 1] = MARK_CLOSE;
            Ok(run)
        }
        // Runs whose length byte would collide with a mark, and all runs
        // past one byte of length, use the zero-escaped u16 form.
        4..=MAX_RUN => {
            let be = (n as u16).to_be_bytes();
            let mut run = vec![0u8; n];
            run[0] = MARK_OPEN;
            // run[1] is the 0 escape selecting the u16 form.
            run[2] = be[0];
            run[3] = be[1];
            run[n - 4] = be[0];
            run[n - 3] = be[1];
            // run[n - 2] is the trailing 0 escape.
            run[n - 1] = MARK_CLOSE;
            Ok(run)
        }
        _ => Err(ArchiveError::Range(format!(
            "elastic run of {n} bytes exceeds the supported maximum"
        ))),
    }
}

/// Decode the run length scanning forward: `buf` starts at the pad start.
pub fn read_forward(buf: &[u8]) -> Result<usize> {
    match buf.first() {
        Some(&MARK_SINGLE) => Ok(1),
        Some(&MARK_OPEN) => {
            if buf.len() >= 2 && buf[1] == MARK_CLOSE {
                return Ok(2);
            }
            let n = match buf.get(1) {
                Some(0) => {
                    let hi = *buf.get(2).ok_or_else(truncated)?;
                    let lo = *buf.get(3).ok_or_else(truncated)?;
                    u16::from_be_bytes([hi, lo]) as usize
                }
                Some(&len) => len as usize,
                None => return Err(truncated()),
            };
            check_close(buf, n)?;
            Ok(n)
        }
        _ => Err(malformed()),
    }
}

/// Decode the run length scanning backward: `buf` ends at the pad end.
pub fn read_backward(buf: &[u8]) -> Result<usize> {
    match buf.last() {
        Some(&MARK_SINGLE) => Ok(1),
        Some(&MARK_CLOSE) => {
            let end = buf.len();
            if end >= 2 && buf[end - 2] == MARK_OPEN {
                return Ok(2);
            }
            let n = match buf.get(end.wrapping_sub(2)) {
                Some(0) => {
                    if end < 4 {
                        return Err(truncated());
                    }
                    u16::from_be_bytes([buf[end - 4], buf[end - 3]]) as usize
                }
                Some(&len) => len as usize,
                None => return Err(truncated()),
            };
            if n > end {
                return Err(malformed());
            }
            if buf[end - n] != MARK_OPEN {
                return Err(malformed());
            }
            Ok(n)
        }
        _ => Err(malformed()),
    }
}

fn check_close(buf: &[u8], n: usize) -> Result<()> {
    if n < 3 || n > buf.len() {
        return Err(malformed());
    }
    if buf[n - 1] != MARK_CLOSE {
        return Err(malformed());
    }
    Ok(())
}

fn truncated() -> ArchiveError {
    ArchiveError::Data("truncated elastic run".into())
}

fn malformed() -> ArchiveError {
    ArchiveError::Data("malformed elastic run".into())
}
