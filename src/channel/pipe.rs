//! FIFO-pair channel, selected with the `-` basename.
//!
//! Archives streamed through pipes have no random access: forward seeks are
//! honored by reading and discarding, backward seeks are a feature error
//! unless the caller stays strictly sequential.

use super::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

pub struct PipeChannel {
    core: ChannelCore,
    input: Option<File>,
    output: Option<File>,
    pos: Counter,
}

impl PipeChannel {
    /// Open an already-created FIFO pair.  Either side may be absent for a
    /// one-directional stream.
    pub fn open(input: Option<&Path>, output: Option<&Path>) -> Result<Self> {
        let mode = match (&input, &output) {
            (Some(_), Some(_)) => Mode::ReadWrite,
            (Some(_), None) => Mode::ReadOnly,
            (None, Some(_)) => Mode::WriteOnly,
            (None, None) => {
                return Err(ArchiveError::Range(
                    "a pipe channel needs at least one side".into(),
                ))
            }
        };
        let input = match input {
            Some(p) => Some(File::open(p).map_err(|e| {
                ArchiveError::Hardware(format!("cannot open input pipe {}: {e}", p.display()))
            })?),
            None => None,
        };
        let output = match output {
            Some(p) => Some(OpenOptions::new().write(true).open(p).map_err(|e| {
                ArchiveError::Hardware(format!("cannot open output pipe {}: {e}", p.display()))
            })?),
            None => None,
        };
        Ok(PipeChannel { core: ChannelCore::new(mode), input, output, pos: Counter::zero() })
    }

    fn no_seek<T>(&self) -> Result<T> {
        Err(ArchiveError::Feature(
            "cannot seek backwards in a piped archive".into(),
        ))
    }
}

impl Channel for PipeChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let f = self
            .input
            .as_mut()
            .ok_or_else(|| ArchiveError::bug("reading a write-side pipe channel"))?;
        loop {
            match f.read(buf) {
                Ok(n) => {
                    self.pos.add_assign(&Counter::from(n));
                    return Ok(n);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ArchiveError::Hardware(format!("pipe read: {e}"))),
            }
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        let f = self
            .output
            .as_mut()
            .ok_or_else(|| ArchiveError::bug("writing a read-side pipe channel"))?;
        f.write_all(buf)
            .map_err(|e| ArchiveError::Hardware(format!("pipe write: {e}")))?;
        self.pos.add_assign(&Counter::from(buf.len()));
        Ok(())
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        if pos < &self.pos {
            return self.no_seek();
        }
        // Forward: consume and discard.
        let mut gap = pos.clone();
        gap.sub_assign(&self.pos)?;
        let mut sink = super::NullChannel::new(Mode::WriteOnly);
        let moved = self.copy_n_to(&mut sink, &gap)?;
        Ok(moved == gap)
    }

    fn skip_relative(&mut self, delta: i64) -> Result<bool> {
        if delta < 0 {
            return self.no_seek();
        }
        let mut target = self.pos.clone();
        target.add_assign(&Counter::from(delta as u64));
        self.skip(&target)
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        self.no_seek()
    }

    fn position(&mut self) -> Result<Counter> {
        Ok(self.pos.clone())
    }
}
