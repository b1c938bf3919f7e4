//! Vec-backed channel.
//!
//! Used by the unit tests and as the staging buffer for the database's
//! inner stream before it is pushed through the gzip frame.

use super::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};

pub struct MemChannel {
    core: ChannelCore,
    data: Vec<u8>,
    pos: usize,
}

impl MemChannel {
    pub fn new(mode: Mode) -> Self {
        MemChannel { core: ChannelCore::new(mode), data: Vec::new(), pos: 0 }
    }

    pub fn from_vec(mode: Mode, data: Vec<u8>) -> Self {
        MemChannel { core: ChannelCore::new(mode), data, pos: 0 }
    }

    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

impl Channel for MemChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let avail = self.data.len().saturating_sub(self.pos);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        if self.pos > self.data.len() {
            self.data.resize(self.pos, 0);
        }
        let overlap = (self.data.len() - self.pos).min(buf.len());
        self.data[self.pos..self.pos + overlap].copy_from_slice(&buf[..overlap]);
        self.data.extend_from_slice(&buf[overlap..]);
        self.pos += buf.len();
        Ok(())
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        let p = pos
            .to_u64()
            .and_then(|v| usize::try_from(v).ok())
            .ok_or_else(|| ArchiveError::Memory("memory channel offset overflow".into()))?;
        self.pos = p;
        Ok(p <= self.data.len())
    }

    fn skip_relative(&mut self, delta: i64) -> Result<bool> {
        if delta >= 0 {
            self.pos = self.pos.saturating_add(delta as usize);
            Ok(true)
        } else {
            let back = delta.unsigned_abs() as usize;
            if back > self.pos {
                self.pos = 0;
                Ok(false)
            } else {
                self.pos -= back;
                Ok(true)
            }
        }
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        self.pos = self.data.len();
        Ok(true)
    }

    fn position(&mut self) -> Result<Counter> {
        Ok(Counter::from(self.pos))
    }
}
