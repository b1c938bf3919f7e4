//! Slice set: one logical byte stream over numbered slice files.
//!
//! # On-disk layout per slice
//!
//! ```text
//! Offset  Size  Field
//!    0      3   magic  = "VRC"
//!    3      5   slice index, counter wire form (single 4-byte group)
//!    8      1   flag   bit 0x01 = terminal slice (end of archive)
//! ```
//!
//! Slices are named `<basename>.<N>.<extension>` with `N` starting at 1 and
//! zero-padded to a configurable minimum width.  Every slice except the last
//! holds exactly `slice_size - 9` payload bytes; the last may be shorter and
//! is the only one whose flag carries the terminal bit.  Readers refuse to
//! read past a terminal slice; a missing successor of a non-terminal slice
//! is data corruption.
//!
//! A slice index wider than one counter group would change the header size;
//! sets are therefore capped at 2^32 - 1 slices.
//!
//! When a slice is closed the optional between-slice hook runs (failure is a
//! `script` error) and, if enabled, a BLAKE3 companion `<slice>.b3` is
//! written next to it.

use crate::channel::{Channel, ChannelCore, FileChannel, Mode};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use crate::interact::Interact;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const SLICE_MAGIC: &[u8; 3] = b"VRC";
/// Fixed header size: magic(3) + index(5) + flag(1).
pub const SLICE_HEADER_LEN: u64 = 9;
/// Terminal-slice bit of the header flag byte.
pub const FLAG_TERMINAL: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct SliceConfig {
    pub dir: PathBuf,
    pub basename: String,
    pub extension: String,
    /// Total bytes per slice file (header included); 0 means unsplit.
    pub slice_size: u64,
    pub min_digits: usize,
    /// Shell command run after each intermediate slice is closed.
    pub between_slice_hook: Option<String>,
    /// Write a BLAKE3 companion file next to every closed slice.
    pub hash_slices: bool,
    /// FIFO to read the archive from when the basename is `-`.
    pub pipe_input: Option<PathBuf>,
    /// FIFO to write the archive to when the basename is `-`.
    pub pipe_output: Option<PathBuf>,
}

impl SliceConfig {
    pub fn new(dir: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        SliceConfig {
            dir: dir.into(),
            basename: basename.into(),
            extension: "vrc".into(),
            slice_size: 0,
            min_digits: 1,
            between_slice_hook: None,
            hash_slices: false,
            pipe_input: None,
            pipe_output: None,
        }
    }

    /// The `-` basename streams through FIFOs instead of slice files.
    pub fn is_piped(&self) -> bool {
        self.basename == "-"
    }

    pub fn slice_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!(
            "{}.{:0width$}.{}",
            self.basename,
            index,
            self.extension,
            width = self.min_digits
        ))
    }

    fn payload_per_slice(&self) -> Result<Option<u64>> {
        match self.slice_size {
            0 => Ok(None),
            s if s <= SLICE_HEADER_LEN => Err(ArchiveError::Range(format!(
                "slice size {s} does not even hold the slice header"
            ))),
            s => Ok(Some(s - SLICE_HEADER_LEN)),
        }
    }
}

struct OpenSlice {
    file: FileChannel,
    index: u64,
    flag: u8,
    /// Payload bytes consumed/produced in this slice so far.
    intra: u64,
}

pub struct SliceSet {
    core: ChannelCore,
    cfg: SliceConfig,
    interact: Option<Arc<dyn Interact>>,
    current: Option<OpenSlice>,
    /// Absolute logical (payload) position.
    logical: Counter,
    /// Payload capacity of non-terminal slices; `None` when unsplit or not
    /// yet known (single-slice read set).
    payload_per: Option<u64>,
}

impl SliceSet {
    // ── Construction ────────────────────────────────────────────────────────

    pub fn create(cfg: SliceConfig, interact: Option<Arc<dyn Interact>>) -> Result<Self> {
        let payload_per = cfg.payload_per_slice()?;
        let mut set = SliceSet {
            core: ChannelCore::new(Mode::WriteOnly),
            cfg,
            interact,
            current: None,
            logical: Counter::zero(),
            payload_per,
        };
        set.open_slice_for_write(1)?;
        Ok(set)
    }

    pub fn open(cfg: SliceConfig, interact: Option<Arc<dyn Interact>>) -> Result<Self> {
        let mut set = SliceSet {
            core: ChannelCore::new(Mode::ReadOnly),
            cfg,
            interact,
            current: None,
            logical: Counter::zero(),
            payload_per: None,
        };
        let first = set.open_slice_for_read(1)?;
        // A non-terminal first slice fixes the common slice size; probe its
        // file length once.
        if first.flag & FLAG_TERMINAL == 0 {
            let mut f = FileChannel::open(&set.cfg.slice_path(1), Mode::ReadOnly)?;
            let len = f
                .len()?
                .to_u64()
                .ok_or_else(|| ArchiveError::Memory("slice longer than 2^64".into()))?;
            if len <= SLICE_HEADER_LEN {
                return Err(ArchiveError::Data("first slice holds no payload".into()));
            }
            set.payload_per = Some(len - SLICE_HEADER_LEN);
        }
        set.current = Some(first);
        Ok(set)
    }

    pub fn config(&self) -> &SliceConfig {
        &self.cfg
    }

    // ── Slice file management ───────────────────────────────────────────────

    fn write_header(file: &mut FileChannel, index: u64, flag: u8) -> Result<()> {
        file.write_all(SLICE_MAGIC)?;
        Counter::from(index).dump(file)?;
        file.write_all(&[flag])?;
        Ok(())
    }

    fn read_header(file: &mut FileChannel) -> Result<(u64, u8)> {
        let mut magic = [0u8; 3];
        if file.read(&mut magic)? != 3 || &magic != SLICE_MAGIC {
            return Err(ArchiveError::Data("bad slice magic".into()));
        }
        let index = Counter::read(file)?
            .to_u64()
            .ok_or_else(|| ArchiveError::Data("slice index out of range".into()))?;
        let mut flag = [0u8; 1];
        if file.read(&mut flag)? != 1 {
            return Err(ArchiveError::Data("truncated slice header".into()));
        }
        Ok((index, flag[0]))
    }

    fn open_slice_for_write(&mut self, index: u64) -> Result<()> {
        if index > u64::from(u32::MAX) {
            return Err(ArchiveError::Range("too many slices".into()));
        }
        let path = self.cfg.slice_path(index);
        let _ = std::fs::remove_file(&path);
        let mut file = FileChannel::open(&path, Mode::WriteOnly)?;
        if let Some(ui) = &self.interact {
            file = file.with_interact(ui.clone());
        }
        Self::write_header(&mut file, index, 0)?;
        self.current = Some(OpenSlice { file, index, flag: 0, intra: 0 });
        Ok(())
    }

    fn open_slice_for_read(&mut self, index: u64) -> Result<OpenSlice> {
        let path = self.cfg.slice_path(index);
        let mut file = FileChannel::open(&path, Mode::ReadOnly)?;
        let (stored, flag) = Self::read_header(&mut file)?;
        if stored != index {
            return Err(ArchiveError::Data(format!(
                "slice {} declares index {stored}",
                path.display()
            )));
        }
        Ok(OpenSlice { file, index, flag, intra: 0 })
    }

    /// Close the current write slice: optionally mark it terminal, run the
    /// between-slice hook, write the hash companion.
    fn close_write_slice(&mut self, terminal: bool) -> Result<()> {
        let slice = match self.current.take() {
            Some(s) => s,
            None => return Ok(()),
        };
        let index = slice.index;
        let mut file = slice.file;
        if terminal {
            // Patch the flag byte in place.
            file.skip(&Counter::from(SLICE_HEADER_LEN - 1))?;
            file.write_all(&[FLAG_TERMINAL])?;
        }
        drop(file);

        let path = self.cfg.slice_path(index);
        if self.cfg.hash_slices {
            let bytes = std::fs::read(&path)?;
            let digest = blake3::hash(&bytes);
            std::fs::write(path.with_extension(format!("{}.b3", self.cfg.extension)), {
                let mut line = digest.to_hex().to_string();
                line.push('\n');
                line
            })?;
        }

        if let Some(hook) = &self.cfg.between_slice_hook {
            let status = std::process::Command::new("sh")
                .arg("-c")
                .arg(hook)
                .env("VARC_SLICE_NUMBER", index.to_string())
                .env("VARC_SLICE_PATH", &path)
                .status()
                .map_err(|e| ArchiveError::Script(format!("cannot run slice hook: {e}")))?;
            if !status.success() {
                return Err(ArchiveError::Script(format!(
                    "slice hook failed with {status} after slice {index}"
                )));
            }
        }
        Ok(())
    }

    /// Locate the last slice of a read set by probing file names.
    fn last_slice_index(&self) -> Result<u64> {
        let mut index = 1u64;
        while self.cfg.slice_path(index + 1).exists() {
            index += 1;
        }
        Ok(index)
    }
}

impl Channel for SliceSet {
    fn core(&self) -> &ChannelCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ChannelCore {
        &mut self.core
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let slice = match &mut self.current {
                Some(s) => s,
                None => return Err(ArchiveError::bug("slice set has no open slice")),
            };
            let n = slice.file.read_raw(buf)?;
            if n > 0 {
                slice.intra += n as u64;
                self.logical.add_assign(&Counter::from(n));
                return Ok(n);
            }
            // Slice exhausted: the terminal one ends the stream, any other
            // must have a successor.
            if slice.flag & FLAG_TERMINAL != 0 {
                return Ok(0);
            }
            let next = slice.index + 1;
            if !self.cfg.slice_path(next).exists() {
                return Err(ArchiveError::Data(format!(
                    "slice {} is not terminal and slice {next} is missing",
                    slice.index
                )));
            }
            self.current = Some(self.open_slice_for_read(next)?);
        }
    }

    fn write_raw(&mut self, buf: &[u8]) -> Result<()> {
        let mut rest = buf;
        while !rest.is_empty() {
            let (room, next_index) = {
                let slice = self
                    .current
                    .as_ref()
                    .ok_or_else(|| ArchiveError::bug("slice set has no open slice"))?;
                let room = match self.payload_per {
                    Some(per) => per.saturating_sub(slice.intra),
                    None => u64::MAX,
                };
                (room, slice.index + 1)
            };
            if room == 0 {
                self.close_write_slice(false)?;
                self.open_slice_for_write(next_index)?;
                continue;
            }
            let take = (room.min(rest.len() as u64)) as usize;
            let slice = self.current.as_mut().expect("slice present");
            slice.file.write_raw(&rest[..take])?;
            slice.intra += take as u64;
            self.logical.add_assign(&Counter::from(take));
            rest = &rest[take..];
        }
        Ok(())
    }

    fn write_eof(&mut self) -> Result<()> {
        self.close_write_slice(true)?;
        self.mark_eof_written();
        Ok(())
    }

    fn skip(&mut self, pos: &Counter) -> Result<bool> {
        if self.mode() != Mode::ReadOnly {
            return Err(ArchiveError::Feature(
                "a write slice set is sequential".into(),
            ));
        }
        let (index, intra) = match self.payload_per {
            None => {
                let intra = pos
                    .to_u64()
                    .ok_or_else(|| ArchiveError::Data("offset beyond single slice".into()))?;
                (1u64, intra)
            }
            Some(per) => {
                let (q, r) = Counter::euclide(pos, &Counter::from(per))?;
                let index = q
                    .to_u64()
                    .ok_or_else(|| ArchiveError::Range("too many slices".into()))?
                    + 1;
                let intra = r.to_u64().expect("remainder below a u64 divisor");
                (index, intra)
            }
        };

        let reopen = match &self.current {
            Some(s) => s.index != index,
            None => true,
        };
        if reopen {
            if !self.cfg.slice_path(index).exists() {
                return Ok(false);
            }
            self.current = Some(self.open_slice_for_read(index)?);
        }
        let slice = self.current.as_mut().expect("slice present");
        slice.file.skip(&Counter::from(SLICE_HEADER_LEN + intra))?;
        slice.intra = intra;
        self.logical = pos.clone();
        Ok(true)
    }

    fn skip_relative(&mut self, delta: i64) -> Result<bool> {
        let mut target = self.logical.clone();
        if delta >= 0 {
            target.add_assign(&Counter::from(delta as u64));
            self.skip(&target)
        } else {
            let back = Counter::from(delta.unsigned_abs());
            if target < back {
                self.skip(&Counter::zero())?;
                Ok(false)
            } else {
                target.sub_assign(&back)?;
                self.skip(&target)
            }
        }
    }

    fn skip_to_eof(&mut self) -> Result<bool> {
        if self.mode() != Mode::ReadOnly {
            return Ok(true);
        }
        let last = self.last_slice_index()?;
        let mut slice = self.open_slice_for_read(last)?;
        if slice.flag & FLAG_TERMINAL == 0 {
            return Err(ArchiveError::Data(format!(
                "last slice {last} does not carry the terminal mark"
            )));
        }
        let len = FileChannel::open(&self.cfg.slice_path(last), Mode::ReadOnly)?
            .len()?
            .to_u64()
            .ok_or_else(|| ArchiveError::Memory("slice longer than 2^64".into()))?;
        let payload = len.saturating_sub(SLICE_HEADER_LEN);
        slice.file.skip_to_eof()?;
        slice.intra = payload;
        self.current = Some(slice);

        self.logical = match self.payload_per {
            Some(per) => {
                let mut l = Counter::from(per).mul(&Counter::from(last - 1));
                l.add_assign(&Counter::from(payload));
                l
            }
            None => Counter::from(payload),
        };
        Ok(true)
    }

    fn position(&mut self) -> Result<Counter> {
        Ok(self.logical.clone())
    }
}
