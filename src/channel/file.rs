//! File-backed channel.
//!
//! Reads retry on interruption until the buffer is full or EOF.  Writes
//! honor the no-space protocol: on `ENOSPC` the channel pauses through the
//! user-interaction handle ("free some space and continue?") and retries the
//! same write on an affirmative answer.  Without a handle the condition is a
//! hardware error.

use super::{Channel, ChannelCore, Mode};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use crate::interact::Interact;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;

pub struct FileChannel {
    core: ChannelCore,
    file: File,
    interact: Option<Arc<dyn Interact>>,
}

impl FileChannel {
    pub fn open(path: &Path, mode: Mode) -> Result<Self> {
        let file = match mode {
            Mode::ReadOnly => OpenOptions::new().read(true).open(path),
            Mode::WriteOnly => OpenOptions::new().write(true).create(true).open(path),
            Mode::ReadWrite => {
                OpenOptions::new().read(true).write(true).create(true).open(path)
            }
        }
        .map_err(|e| {
            ArchiveError::Hardware(format!("cannot open {}: {e}", path.display()))
        })?;
        Ok(FileChannel { core: ChannelCore::new(mode), file, interact: None })
    }

    /// Attach the prompt handle used by the no-space protocol.
    pub fn with_interact(mut self, interact: Arc<dyn Interact>) -> Self {
        self.interact = Some(interact);
        self
    }

    pub fn from_file(file: File, mode: Mode) -> Self {
        FileChannel { core: ChannelCore::new(mode), file, interact: None }
    }

    pub fn len(&mut self) -> Result<Counter> {
        let meta = self.file.metadata()?;
        Ok(Counter::from(meta.len()))
    }
}

impl Channel for FileChannel {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            match self.file.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ArchiveError::Hardware(format!("read error: {e}")))
                }
            }
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.file.write(&buf[done..]) {
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::StorageFull => {
                    match &self.interact {
                        Some(ui) => ui.pause_or_abort(
                            "no space left on device; free some space — continue?",
                        )?,
                        None => {
                            return Err(ArchiveError::Hardware(
                                "no space left on device".into(),
                            ))
                        }
                    }
                }
                Err(e) => {
                    return Err(ArchiveError::Hardware(format!("write error: {e}")))
                }
            }
        }
        Ok(())
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        // Seek to 0 then forward in native-size steps, unstacking the
        // counter so positions beyond u64 are still expressible.
        self.file.seek(SeekFrom::Start(0))?;
        let mut rest = pos.clone();
        let mut step = 0u64;
        rest.unstack(&mut step);
        while step > 0 {
            self.file.seek(SeekFrom::Current(step as i64))?;
            step = 0;
            rest.unstack(&mut step);
        }
        Ok(true)
    }

    fn skip_relative(&mut self, delta: i64) -> Result<bool> {
        if delta >= 0 {
            self.file.seek(SeekFrom::Current(delta))?;
            return Ok(true);
        }
        let here = self.file.stream_position()?;
        let back = delta.unsigned_abs();
        if back > here {
            self.file.seek(SeekFrom::Start(0))?;
            Ok(false)
        } else {
            self.file.seek(SeekFrom::Start(here - back))?;
            Ok(true)
        }
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        self.file.seek(SeekFrom::End(0))?;
        Ok(true)
    }

    fn position(&mut self) -> Result<Counter> {
        Ok(Counter::from(self.file.stream_position()?))
    }
}
