//! Uniform byte-channel abstraction.
//!
//! Every storage layer of the pipeline — plain files, slice sets, the cipher
//! frame, the compressor frame — speaks [`Channel`].  A channel has a fixed
//! access [`Mode`], an absolute position expressed as a [`Counter`], and an
//! optional rolling CRC that folds every byte read or written while active.
//!
//! Mode violations are not recoverable conditions: reading a write-only
//! channel, writing a read-only one, writing after `write_eof`, or resetting
//! the CRC twice without collecting it are `bug` errors.

use crate::counter::Counter;
use crate::crc::Crc;
use crate::error::{ArchiveError, Result};

pub mod file;
pub mod mem;
pub mod null;
pub mod pipe;

pub use file::FileChannel;
pub use mem::MemChannel;
pub use null::NullChannel;
pub use pipe::PipeChannel;

/// Transfer buffer used by the provided copy/diff helpers.
const COPY_BUFFER: usize = 100 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl Mode {
    pub fn readable(self) -> bool {
        matches!(self, Mode::ReadOnly | Mode::ReadWrite)
    }

    pub fn writable(self) -> bool {
        matches!(self, Mode::WriteOnly | Mode::ReadWrite)
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::ReadOnly => "read only",
            Mode::WriteOnly => "write only",
            Mode::ReadWrite => "read and write",
        }
    }
}

/// State every concrete channel embeds: the mode, the optional CRC
/// accumulator, and the end-of-file seal for write channels.
#[derive(Debug)]
pub struct ChannelCore {
    mode: Mode,
    crc: Option<Crc>,
    pub(crate) eof_written: bool,
}

impl ChannelCore {
    pub fn new(mode: Mode) -> Self {
        ChannelCore { mode, crc: None, eof_written: false }
    }
}

pub trait Channel {
    fn core(&self) -> &ChannelCore;
    fn core_mut(&mut self) -> &mut ChannelCore;

    /// One transfer attempt; may deliver fewer bytes than requested.
    /// Returns 0 only at end of stream.
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write the whole buffer (implementations retry internally; a channel
    /// that cannot is expected to fail, not short-write).
    fn write_raw(&mut self, buf: &[u8]) -> Result<()>;

    /// Absolute positioning.  Returns false when the target cannot be
    /// reached (e.g. past the end of a read stream).
    fn skip(&mut self, pos: &Counter) -> Result<bool>;

    /// Relative positioning; saturates at position 0 on under-run and
    /// reports the saturation by returning false.
    fn skip_relative(&mut self, delta: i64) -> Result<bool>;

    fn skip_to_eof(&mut self) -> Result<bool>;

    fn position(&mut self) -> Result<Counter>;

    /// Flush buffered state and seal the channel.  Implementations that
    /// buffer (cipher, compressor) override [`Channel::write_eof`] and call
    /// this afterwards.
    fn mark_eof_written(&mut self) {
        self.core_mut().eof_written = true;
    }

    fn write_eof(&mut self) -> Result<()> {
        self.mark_eof_written();
        Ok(())
    }

    // ── Provided surface ────────────────────────────────────────────────────

    fn mode(&self) -> Mode {
        self.core().mode
    }

    /// Read until `buf` is full or end of stream.  A short return means EOF,
    /// never an error.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.mode().readable() {
            return Err(ArchiveError::bug(format!(
                "reading a {} channel",
                self.mode().name()
            )));
        }
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_raw(&mut buf[done..])?;
            if n == 0 {
                break;
            }
            done += n;
        }
        if let Some(crc) = &mut self.core_mut().crc {
            crc.update(&buf[..done]);
        }
        Ok(done)
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if !self.mode().writable() {
            return Err(ArchiveError::bug(format!(
                "writing a {} channel",
                self.mode().name()
            )));
        }
        if self.core().eof_written {
            return Err(ArchiveError::bug("writing after end-of-file was sealed"));
        }
        self.write_raw(buf)?;
        if let Some(crc) = &mut self.core_mut().crc {
            crc.update(buf);
        }
        Ok(())
    }

    /// Install a rolling CRC of the given width.  Installing a second one
    /// before the first is collected is a bug.
    fn crc_reset(&mut self, width: usize) -> Result<()> {
        let core = self.core_mut();
        if core.crc.is_some() {
            return Err(ArchiveError::bug(
                "CRC reset while a previous CRC value was never read",
            ));
        }
        core.crc = Some(Crc::new(width));
        Ok(())
    }

    /// Detach and return the active CRC.
    fn crc_take(&mut self) -> Result<Crc> {
        self.core_mut()
            .crc
            .take()
            .ok_or_else(|| ArchiveError::bug("CRC requested but none was active"))
    }

    /// Step one byte back, read it, step back again.  Returns `None` at the
    /// start of the stream.
    fn read_back(&mut self) -> Result<Option<u8>> {
        if !self.skip_relative(-1)? {
            return Ok(None);
        }
        let mut b = [0u8; 1];
        if self.read(&mut b)? == 0 {
            return Ok(None);
        }
        self.skip_relative(-1)?;
        Ok(Some(b[0]))
    }

    /// Pipe everything from the current position into `other`.
    /// Returns the number of bytes moved.
    fn copy_to(&mut self, other: &mut dyn Channel) -> Result<Counter> {
        let mut buffer = vec![0u8; COPY_BUFFER];
        let mut moved = Counter::zero();
        loop {
            let n = self.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            other.write_all(&buffer[..n])?;
            moved.add_assign(&Counter::from(n));
        }
        Ok(moved)
    }

    /// Pipe at most `n` bytes into `other`.  The budget is a counter,
    /// unstacked into native-size passes.  Returns the bytes moved (short
    /// only on end of stream).
    fn copy_n_to(&mut self, other: &mut dyn Channel, n: &Counter) -> Result<Counter> {
        let mut buffer = vec![0u8; COPY_BUFFER];
        let mut moved = Counter::zero();
        let mut rest = n.clone();
        let mut pass = 0u64;
        rest.unstack(&mut pass);
        while pass > 0 {
            while pass > 0 {
                let want = (pass as usize).min(buffer.len());
                let got = self.read(&mut buffer[..want])?;
                if got == 0 {
                    return Ok(moved);
                }
                other.write_all(&buffer[..got])?;
                moved.add_assign(&Counter::from(got));
                pass -= got as u64;
            }
            rest.unstack(&mut pass);
        }
        Ok(moved)
    }

    /// Byte-by-byte comparison from position 0 of both channels.
    /// Returns true if any byte differs or the lengths differ.
    fn diff(&mut self, other: &mut dyn Channel) -> Result<bool> {
        if !self.mode().readable() || !other.mode().readable() {
            return Err(ArchiveError::bug("comparing channels that are not readable"));
        }
        self.skip(&Counter::zero())?;
        other.skip(&Counter::zero())?;
        let mut a = vec![0u8; COPY_BUFFER];
        let mut b = vec![0u8; COPY_BUFFER];
        loop {
            let na = self.read(&mut a)?;
            let nb = other.read(&mut b)?;
            if na != nb || a[..na] != b[..nb] {
                return Ok(true);
            }
            if na == 0 {
                return Ok(false);
            }
        }
    }
}
