//! Archive prologue and trailer.
//!
//! The header sits at logical offset 0 of the slice payload, on the raw
//! stream (never ciphered, never compressed — it is what tells the reader
//! which of those layers to build):
//!
//! ```text
//! edition(3 ASCII) ‖ algo(1) ‖ cmdline_len(counter) ‖ cmdline ‖ flag(1)
//! ```
//!
//! The flag byte exists since edition "02"; reading an edition "01" header
//! stops before it.  An edition above the build's maximum asks the user
//! whether to try anyway; refusal is a user abort.
//!
//! The terminator is the last thing in the archive: the catalogue-start
//! offset dumped **byte-reversed**, so a reader that only knows where the
//! file ends can walk backward, flip the tail, and re-parse the counter
//! without knowing its width in advance.

use crate::channel::{mem::MemChannel, Channel, Mode};
use crate::compress::CompressionAlgo;
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use crate::interact::Interact;

/// Highest archive edition this build reads and the one it writes.
pub const EDITION_CURRENT: [u8; 3] = *b"03\0";
/// First edition carrying the flag byte.
pub const EDITION_FLAGGED: [u8; 3] = *b"02\0";

/// Extended attributes of root-owned files are saved.
pub const FLAG_EA_ROOT: u8 = 0x80;
/// Extended attributes of user scope are saved.
pub const FLAG_EA_USER: u8 = 0x40;
/// Everything after the header went through a cipher frame.
pub const FLAG_CIPHERED: u8 = 0x20;

#[derive(Debug, Clone)]
pub struct ArchiveHeader {
    pub edition: [u8; 3],
    pub algo: CompressionAlgo,
    pub command_line: Vec<u8>,
    pub flag: u8,
}

impl ArchiveHeader {
    pub fn new(algo: CompressionAlgo, command_line: impl Into<Vec<u8>>, flag: u8) -> Self {
        ArchiveHeader {
            edition: EDITION_CURRENT,
            algo,
            command_line: command_line.into(),
            flag,
        }
    }

    pub fn write(&self, ch: &mut dyn Channel) -> Result<()> {
        ch.write_all(&self.edition)?;
        ch.write_all(&[self.algo.tag()])?;
        Counter::from(self.command_line.len()).dump(ch)?;
        ch.write_all(&self.command_line)?;
        ch.write_all(&[self.flag])?;
        Ok(())
    }

    pub fn read(ch: &mut dyn Channel, ui: &dyn Interact) -> Result<Self> {
        let mut edition = [0u8; 3];
        if ch.read(&mut edition)? != 3 {
            return Err(ArchiveError::Data("truncated archive header".into()));
        }
        if edition > EDITION_CURRENT {
            ui.pause_or_abort(
                "the archive edition is newer than this build supports — try reading anyway?",
            )?;
        }
        let mut tag = [0u8; 1];
        if ch.read(&mut tag)? != 1 {
            return Err(ArchiveError::Data("truncated archive header".into()));
        }
        let algo = CompressionAlgo::from_tag(tag[0])?;

        let len = Counter::read(ch)?
            .to_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| ArchiveError::Memory("command line too long".into()))?;
        let mut command_line = vec![0u8; len];
        if ch.read(&mut command_line)? != len {
            return Err(ArchiveError::Data("truncated archive header".into()));
        }

        let flag = if edition >= EDITION_FLAGGED {
            let mut f = [0u8; 1];
            if ch.read(&mut f)? != 1 {
                return Err(ArchiveError::Data("truncated archive header".into()));
            }
            f[0]
        } else {
            0
        };

        Ok(ArchiveHeader { edition, algo, command_line, flag })
    }

    pub fn is_ciphered(&self) -> bool {
        self.flag & FLAG_CIPHERED != 0
    }

    pub fn edition_str(&self) -> String {
        self.edition
            .iter()
            .take_while(|&&b| b != 0)
            .map(|&b| b as char)
            .collect()
    }
}

// ── Terminator ───────────────────────────────────────────────────────────────

/// Window cap while hunting for the terminator from end of file.
const LOCATE_CAP: u64 = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Terminator {
    catalogue_start: Counter,
}

impl Terminator {
    pub fn new(catalogue_start: Counter) -> Self {
        Terminator { catalogue_start }
    }

    pub fn catalogue_start(&self) -> &Counter {
        &self.catalogue_start
    }

    /// Append the byte-reversed counter at the current position.
    pub fn write(&self, ch: &mut dyn Channel) -> Result<()> {
        let mut staged = MemChannel::new(Mode::ReadWrite);
        self.catalogue_start.dump(&mut staged)?;
        let mut bytes = staged.into_vec();
        bytes.reverse();
        ch.write_all(&bytes)
    }

    /// Locate and parse the terminator by reading a growing tail window.
    /// Succeeding iff the archive was finalized is the point: an archive cut
    /// short has no parseable reversed counter at its end.
    pub fn read(ch: &mut dyn Channel) -> Result<Self> {
        ch.skip_to_eof()?;
        let end = ch.position()?;
        let total = end
            .to_u64()
            .ok_or_else(|| ArchiveError::Memory("archive tail beyond 2^64".into()))?;

        let mut window = 32u64;
        loop {
            let take = window.min(total);
            let mut start = end.clone();
            start.sub_assign(&Counter::from(take))?;
            if !ch.skip(&start)? {
                return Err(ArchiveError::Data("cannot reach the archive tail".into()));
            }
            let mut tail = vec![0u8; take as usize];
            if ch.read(&mut tail)? != tail.len() {
                return Err(ArchiveError::Data("short read in the archive tail".into()));
            }
            tail.reverse();

            let mut staged = MemChannel::from_vec(Mode::ReadOnly, tail);
            match Counter::read(&mut staged) {
                Ok(catalogue_start) => return Ok(Terminator { catalogue_start }),
                Err(ArchiveError::Data(_)) if take < total && window < LOCATE_CAP => {
                    window *= 2;
                }
                Err(ArchiveError::Data(e)) => {
                    return Err(ArchiveError::Data(format!(
                        "no terminator at end of archive ({e})"
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interact::FixedAnswer;

    #[test]
    fn header_roundtrip() {
        let h = ArchiveHeader::new(CompressionAlgo::Gzip, b"create -z /home".to_vec(), FLAG_EA_USER);
        let mut ch = MemChannel::new(Mode::ReadWrite);
        h.write(&mut ch).unwrap();
        ch.skip(&Counter::zero()).unwrap();
        let back = ArchiveHeader::read(&mut ch, &FixedAnswer(false)).unwrap();
        assert_eq!(back.edition, EDITION_CURRENT);
        assert_eq!(back.algo, CompressionAlgo::Gzip);
        assert_eq!(back.command_line, b"create -z /home");
        assert_eq!(back.flag, FLAG_EA_USER);
        assert_eq!(back.edition_str(), "03");
    }

    #[test]
    fn newer_edition_respects_the_prompt() {
        let mut h = ArchiveHeader::new(CompressionAlgo::None, Vec::new(), 0);
        h.edition = *b"09\0";
        let mut ch = MemChannel::new(Mode::ReadWrite);
        h.write(&mut ch).unwrap();

        ch.skip(&Counter::zero()).unwrap();
        assert!(matches!(
            ArchiveHeader::read(&mut ch, &FixedAnswer(false)),
            Err(ArchiveError::UserAbort(_))
        ));
        ch.skip(&Counter::zero()).unwrap();
        assert!(ArchiveHeader::read(&mut ch, &FixedAnswer(true)).is_ok());
    }

    #[test]
    fn terminator_found_after_arbitrary_payload() {
        // 29! as catalogue offset exercises the multi-group reversed parse.
        let mut big = Counter::from(1u64);
        for i in 2u64..30 {
            big = big.mul(&Counter::from(i));
        }
        let mut ch = MemChannel::new(Mode::ReadWrite);
        ch.write_all(&vec![0x5a; 700]).unwrap();
        Terminator::new(big.clone()).write(&mut ch).unwrap();

        let t = Terminator::read(&mut ch).unwrap();
        assert_eq!(t.catalogue_start(), &big);
    }

    #[test]
    fn unterminated_archive_is_rejected() {
        let mut ch = MemChannel::new(Mode::ReadWrite);
        ch.write_all(b"payload but no trailer").unwrap();
        // 0xff cannot be a counter marker (more than one bit set).
        ch.write_all(&[0xff; 8]).unwrap();
        assert!(matches!(Terminator::read(&mut ch), Err(ArchiveError::Data(_))));
    }
}
