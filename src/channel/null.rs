//! Bit-bucket channel: reads deliver nothing, writes are swallowed.
//!
//! Handy for measuring (write through it with a CRC active) and for walks
//! that must consume payload bytes without keeping them.

use super::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::error::Result;

pub struct NullChannel {
    core: ChannelCore,
    swallowed: Counter,
}

impl NullChannel {
    pub fn new(mode: Mode) -> Self {
        NullChannel { core: ChannelCore::new(mode), swallowed: Counter::zero() }
    }
}

impl Channel for NullChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        self.swallowed.add_assign(&Counter::from(buf.len()));
        Ok(())
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        Ok(pos.is_zero())
    }

    fn skip_relative(&mut self, _delta: i64) -> Result<bool> {
        Ok(false)
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        Ok(true)
    }

    fn position(&mut self) -> Result<Counter> {
        Ok(self.swallowed.clone())
    }
}
