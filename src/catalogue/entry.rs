//! Catalogue entries: kinds, signatures, and their wire bodies.
//!
//! Every serialized entry starts with the common prefix
//! `name_len(counter) ‖ name ‖ signature(1)`; the signature byte doubles as
//! the in-memory discriminator.  Signatures:
//!
//! | byte | kind            | byte | kind              |
//! |------|-----------------|------|-------------------|
//! | `d`  | directory       | `s`  | unix socket       |
//! | `f`  | plain file      | `m`  | hard-link mirage  |
//! | `l`  | symlink         | `x`  | deleted marker    |
//! | `c`  | char device     | `i`  | ignored           |
//! | `b`  | block device    | `j`  | ignored directory |
//! | `p`  | named pipe      | `z`  | end of directory  |
//!
//! `e` is the legacy file-with-etiquette framing: accepted on read, never
//! written.  Names never contain `/` and are empty only on the root
//! directory and the EOD marker.

use super::hardlink::{Mirage, Star};
use crate::channel::Channel;
use crate::compress::CompressionAlgo;
use crate::counter::Counter;
use crate::crc::Crc;
use crate::error::{ArchiveError, Result};
use byteorder::{BigEndian, ByteOrder};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const SIG_DIRECTORY: u8 = b'd';
pub const SIG_FILE: u8 = b'f';
pub const SIG_SYMLINK: u8 = b'l';
pub const SIG_CHAR_DEVICE: u8 = b'c';
pub const SIG_BLOCK_DEVICE: u8 = b'b';
pub const SIG_PIPE: u8 = b'p';
pub const SIG_SOCKET: u8 = b's';
pub const SIG_MIRAGE: u8 = b'm';
pub const SIG_DELETED: u8 = b'x';
pub const SIG_IGNORED: u8 = b'i';
pub const SIG_IGNORED_DIR: u8 = b'j';
pub const SIG_EOD: u8 = b'z';
pub const SIG_LEGACY_ETIQUETTE: u8 = b'e';

/// Mirage framing byte: first occurrence, inode payload follows.
pub const MIRAGE_WITH_INODE: u8 = b'>';
/// Mirage framing byte: later occurrence, etiquette reference only.
pub const MIRAGE_ALONE: u8 = b'X';

// ── Saved status ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavedStatus {
    /// Data and metadata are in this archive.
    Saved,
    /// Only the inode metadata changed; no data payload stored.
    InodeOnly,
    /// Unchanged against the reference; nothing stored.
    NotSaved,
    /// A binary delta against the reference is stored.
    Delta,
    /// Placeholder recorded without touching the filesystem.
    Fake,
}

impl SavedStatus {
    pub fn tag(self) -> u8 {
        match self {
            SavedStatus::Saved => b'S',
            SavedStatus::InodeOnly => b'I',
            SavedStatus::NotSaved => b'N',
            SavedStatus::Delta => b'D',
            SavedStatus::Fake => b'F',
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            b'S' => Ok(SavedStatus::Saved),
            b'I' => Ok(SavedStatus::InodeOnly),
            b'N' => Ok(SavedStatus::NotSaved),
            b'D' => Ok(SavedStatus::Delta),
            b'F' => Ok(SavedStatus::Fake),
            other => Err(ArchiveError::Data(format!(
                "unknown saved-status tag {:?}",
                other as char
            ))),
        }
    }

    /// Whether a data payload exists in the archive for this status.
    pub fn has_data(self) -> bool {
        matches!(self, SavedStatus::Saved | SavedStatus::Delta)
    }
}

// ── Extended attributes ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EaBlock {
    pub pairs: Vec<(Vec<u8>, Vec<u8>)>,
}

impl EaBlock {
    /// XOR-fold over the serialized pairs; the diff tie-breaker.
    pub fn fingerprint(&self) -> Crc {
        let mut crc = Crc::new(2);
        for (name, value) in &self.pairs {
            crc.update(name);
            crc.update(value);
        }
        crc
    }

    fn write(&self, ch: &mut dyn Channel) -> Result<()> {
        Counter::from(self.pairs.len()).dump(ch)?;
        for (name, value) in &self.pairs {
            Counter::from(name.len()).dump(ch)?;
            ch.write_all(name)?;
            Counter::from(value.len()).dump(ch)?;
            ch.write_all(value)?;
        }
        Ok(())
    }

    fn read(ch: &mut dyn Channel) -> Result<Self> {
        let count = read_len(ch, "EA pair count")?;
        let mut pairs = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let name = read_bytes(ch, "EA name")?;
            let value = read_bytes(ch, "EA value")?;
            pairs.push((name, value));
        }
        Ok(EaBlock { pairs })
    }
}

// ── Inode ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InodeCommon {
    pub uid: u32,
    pub gid: u32,
    pub perm: u32,
    pub atime: u64,
    pub mtime: u64,
    pub ctime: u64,
    pub saved: SavedStatus,
    pub ea: Option<EaBlock>,
}

impl InodeCommon {
    pub fn write(&self, ch: &mut dyn Channel) -> Result<()> {
        ch.write_all(&[self.saved.tag()])?;
        let mut ids = [0u8; 12];
        BigEndian::write_u32(&mut ids[0..4], self.uid);
        BigEndian::write_u32(&mut ids[4..8], self.gid);
        BigEndian::write_u32(&mut ids[8..12], self.perm);
        ch.write_all(&ids)?;
        Counter::from(self.atime).dump(ch)?;
        Counter::from(self.mtime).dump(ch)?;
        Counter::from(self.ctime).dump(ch)?;
        match &self.ea {
            None => ch.write_all(&[0])?,
            Some(ea) => {
                ch.write_all(&[1])?;
                ea.write(ch)?;
            }
        }
        Ok(())
    }

    pub fn read(ch: &mut dyn Channel) -> Result<Self> {
        let saved = SavedStatus::from_tag(read_u8(ch, "saved status")?)?;
        let mut ids = [0u8; 12];
        if ch.read(&mut ids)? != 12 {
            return Err(truncated("inode ids"));
        }
        let uid = BigEndian::read_u32(&ids[0..4]);
        let gid = BigEndian::read_u32(&ids[4..8]);
        let perm = BigEndian::read_u32(&ids[8..12]);
        let atime = read_time(ch, "atime")?;
        let mtime = read_time(ch, "mtime")?;
        let ctime = read_time(ch, "ctime")?;
        let ea = match read_u8(ch, "EA presence")? {
            0 => None,
            1 => Some(EaBlock::read(ch)?),
            other => {
                return Err(ArchiveError::Data(format!(
                    "bad EA presence byte {other:#04x}"
                )))
            }
        };
        Ok(InodeCommon { uid, gid, perm, atime, mtime, ctime, saved, ea })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileData {
    pub size: Counter,
    /// Compressor boundary where the payload starts; zero when no payload.
    pub data_offset: Counter,
    /// Payload checksum, present whenever data is stored.
    pub crc: Option<Crc>,
    /// Per-entry algorithm; `None` marks the compression opt-out.
    pub algo: CompressionAlgo,
    /// Opaque delta signature slot: (offset, length).
    pub delta_sig: Option<(Counter, Counter)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InodePayload {
    File(FileData),
    Symlink { target: Vec<u8> },
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
    Pipe,
    Socket,
}

/// A non-directory inode.  Directories are their own entry kind, which is
/// also what structurally upholds "a star never hosts a directory".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    pub common: InodeCommon,
    pub payload: InodePayload,
}

impl Inode {
    pub fn signature(&self) -> u8 {
        match &self.payload {
            InodePayload::File(_) => SIG_FILE,
            InodePayload::Symlink { .. } => SIG_SYMLINK,
            InodePayload::CharDevice { .. } => SIG_CHAR_DEVICE,
            InodePayload::BlockDevice { .. } => SIG_BLOCK_DEVICE,
            InodePayload::Pipe => SIG_PIPE,
            InodePayload::Socket => SIG_SOCKET,
        }
    }

    pub fn write_body(&self, ch: &mut dyn Channel) -> Result<()> {
        self.common.write(ch)?;
        match &self.payload {
            InodePayload::File(f) => {
                f.size.dump(ch)?;
                ch.write_all(&[f.algo.tag()])?;
                f.data_offset.dump(ch)?;
                match &f.crc {
                    None => ch.write_all(&[0])?,
                    Some(crc) => {
                        ch.write_all(&[1])?;
                        Counter::from(crc.width()).dump(ch)?;
                        ch.write_all(crc.bytes())?;
                    }
                }
                match &f.delta_sig {
                    None => ch.write_all(&[0])?,
                    Some((off, len)) => {
                        ch.write_all(&[1])?;
                        off.dump(ch)?;
                        len.dump(ch)?;
                    }
                }
            }
            InodePayload::Symlink { target } => {
                Counter::from(target.len()).dump(ch)?;
                ch.write_all(target)?;
            }
            InodePayload::CharDevice { major, minor }
            | InodePayload::BlockDevice { major, minor } => {
                let mut nums = [0u8; 8];
                BigEndian::write_u32(&mut nums[0..4], *major);
                BigEndian::write_u32(&mut nums[4..8], *minor);
                ch.write_all(&nums)?;
            }
            InodePayload::Pipe | InodePayload::Socket => {}
        }
        Ok(())
    }

    pub fn read_body(signature: u8, ch: &mut dyn Channel) -> Result<Self> {
        let common = InodeCommon::read(ch)?;
        let payload = match signature {
            SIG_FILE => {
                let size = Counter::read(ch)?;
                let algo = CompressionAlgo::from_tag(read_u8(ch, "file algo")?)?;
                let data_offset = Counter::read(ch)?;
                let crc = match read_u8(ch, "CRC presence")? {
                    0 => None,
                    1 => {
                        let width = read_len(ch, "CRC width")?;
                        let mut bytes = vec![0u8; width];
                        if ch.read(&mut bytes)? != width {
                            return Err(truncated("CRC bytes"));
                        }
                        Some(reconstruct_crc(width, &bytes))
                    }
                    other => {
                        return Err(ArchiveError::Data(format!(
                            "bad CRC presence byte {other:#04x}"
                        )))
                    }
                };
                let delta_sig = match read_u8(ch, "delta presence")? {
                    0 => None,
                    1 => Some((Counter::read(ch)?, Counter::read(ch)?)),
                    other => {
                        return Err(ArchiveError::Data(format!(
                            "bad delta presence byte {other:#04x}"
                        )))
                    }
                };
                InodePayload::File(FileData { size, data_offset, crc, algo, delta_sig })
            }
            SIG_SYMLINK => InodePayload::Symlink { target: read_bytes(ch, "symlink target")? },
            SIG_CHAR_DEVICE | SIG_BLOCK_DEVICE => {
                let mut nums = [0u8; 8];
                if ch.read(&mut nums)? != 8 {
                    return Err(truncated("device numbers"));
                }
                let major = BigEndian::read_u32(&nums[0..4]);
                let minor = BigEndian::read_u32(&nums[4..8]);
                if signature == SIG_CHAR_DEVICE {
                    InodePayload::CharDevice { major, minor }
                } else {
                    InodePayload::BlockDevice { major, minor }
                }
            }
            SIG_PIPE => InodePayload::Pipe,
            SIG_SOCKET => InodePayload::Socket,
            other => {
                return Err(ArchiveError::Data(format!(
                    "signature {:?} does not name an inode kind",
                    other as char
                )))
            }
        };
        Ok(Inode { common, payload })
    }
}

// ── Directory and the entry enum ─────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct SubtreeInfo {
    /// Any entry below carries data or an inode change.
    changed: bool,
    /// Sum of the file sizes below.
    size: Counter,
}

#[derive(Debug, Clone)]
pub struct Directory {
    pub name: Vec<u8>,
    pub common: InodeCommon,
    children: Vec<Entry>,
    /// Name → position in `children`; shadows the ordered list for lookups.
    index: HashMap<Vec<u8>, usize>,
    /// Computed on first query, dropped on mutation.
    subtree: RefCell<Option<SubtreeInfo>>,
}

impl Directory {
    pub fn new(name: Vec<u8>, common: InodeCommon) -> Self {
        Directory {
            name,
            common,
            children: Vec::new(),
            index: HashMap::new(),
            subtree: RefCell::new(None),
        }
    }

    /// Insertion keeps arrival order; a duplicate child name is refused.
    pub fn add(&mut self, child: Entry) -> Result<()> {
        let name = child.name().to_vec();
        if name.is_empty() {
            return Err(ArchiveError::Range("a child entry needs a name".into()));
        }
        if name.contains(&b'/') {
            return Err(ArchiveError::Range(format!(
                "entry name {:?} contains a path separator",
                String::from_utf8_lossy(&name)
            )));
        }
        if self.index.contains_key(&name) {
            return Err(ArchiveError::Range(format!(
                "duplicate entry {:?} in directory {:?}",
                String::from_utf8_lossy(&name),
                String::from_utf8_lossy(&self.name)
            )));
        }
        self.index.insert(name, self.children.len());
        self.children.push(child);
        *self.subtree.borrow_mut() = None;
        Ok(())
    }

    pub fn children(&self) -> &[Entry] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Entry] {
        *self.subtree.borrow_mut() = None;
        &mut self.children
    }

    pub fn child(&self, name: &[u8]) -> Option<&Entry> {
        self.index.get(name).map(|&i| &self.children[i])
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    fn subtree_info(&self) -> SubtreeInfo {
        if let Some(info) = self.subtree.borrow().as_ref() {
            return info.clone();
        }
        let mut info = SubtreeInfo::default();
        for child in &self.children {
            match child {
                Entry::Directory(sub) => {
                    let below = sub.subtree_info();
                    info.changed |= below.changed;
                    info.size.add_assign(&below.size);
                }
                Entry::Deleted { .. } => info.changed = true,
                Entry::Ignored { .. } | Entry::IgnoredDir { .. } => {}
                other => {
                    let _ = other.with_inode(|inode| {
                        if inode.common.saved != SavedStatus::NotSaved {
                            info.changed = true;
                        }
                        if let InodePayload::File(f) = &inode.payload {
                            info.size.add_assign(&f.size);
                        }
                    });
                }
            }
        }
        *self.subtree.borrow_mut() = Some(info.clone());
        info
    }

    /// Whether anything below holds data or an inode change; computed
    /// lazily and cached until the next mutation.
    pub fn subtree_changed(&self) -> bool {
        self.subtree_info().changed
    }

    /// Cached sum of the file sizes below.
    pub fn subtree_size(&self) -> Counter {
        self.subtree_info().size
    }
}

impl PartialEq for Directory {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.common == other.common
            && self.children == other.children
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Directory(Directory),
    /// A named inode with no hard-link sharing.
    Node { name: Vec<u8>, inode: Inode },
    Mirage(Mirage),
    Deleted { name: Vec<u8>, of_signature: u8, when: u64 },
    /// Diff-time sentinel, never serialized as itself.
    Ignored { name: Vec<u8> },
    /// Diff-time sentinel; serializes as a childless directory.
    IgnoredDir { name: Vec<u8>, common: InodeCommon },
}

impl Entry {
    pub fn name(&self) -> &[u8] {
        match self {
            Entry::Directory(d) => &d.name,
            Entry::Node { name, .. } => name,
            Entry::Mirage(m) => &m.name,
            Entry::Deleted { name, .. } => name,
            Entry::Ignored { name } => name,
            Entry::IgnoredDir { name, .. } => name,
        }
    }

    pub fn signature(&self) -> u8 {
        match self {
            Entry::Directory(_) => SIG_DIRECTORY,
            Entry::Node { inode, .. } => inode.signature(),
            Entry::Mirage(_) => SIG_MIRAGE,
            Entry::Deleted { .. } => SIG_DELETED,
            Entry::Ignored { .. } => SIG_IGNORED,
            Entry::IgnoredDir { .. } => SIG_IGNORED_DIR,
        }
    }

    /// Run `f` against the inode behind this entry, when it has one.
    /// Mirages resolve through their star.
    pub fn with_inode<R>(&self, f: impl FnOnce(&Inode) -> R) -> Option<R> {
        match self {
            Entry::Node { inode, .. } => Some(f(inode)),
            Entry::Mirage(m) => Some(f(&m.star.borrow().inode)),
            _ => None,
        }
    }
}

// ── Wire helpers ─────────────────────────────────────────────────────────────

pub(super) fn write_name(ch: &mut dyn Channel, name: &[u8]) -> Result<()> {
    Counter::from(name.len()).dump(ch)?;
    ch.write_all(name)
}

pub(super) fn read_u8(ch: &mut dyn Channel, what: &str) -> Result<u8> {
    let mut b = [0u8; 1];
    if ch.read(&mut b)? != 1 {
        return Err(truncated(what));
    }
    Ok(b[0])
}

pub(super) fn read_len(ch: &mut dyn Channel, what: &str) -> Result<usize> {
    Counter::read(ch)?
        .to_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ArchiveError::Memory(format!("{what} out of range")))
}

fn read_time(ch: &mut dyn Channel, what: &str) -> Result<u64> {
    Counter::read(ch)?
        .to_u64()
        .ok_or_else(|| ArchiveError::Data(format!("{what} out of range")))
}

pub(super) fn read_bytes(ch: &mut dyn Channel, what: &str) -> Result<Vec<u8>> {
    let len = read_len(ch, what)?;
    let mut bytes = vec![0u8; len];
    if ch.read(&mut bytes)? != len {
        return Err(truncated(what));
    }
    Ok(bytes)
}

pub(super) fn truncated(what: &str) -> ArchiveError {
    ArchiveError::Data(format!("truncated catalogue field: {what}"))
}

fn reconstruct_crc(width: usize, bytes: &[u8]) -> Crc {
    // Feeding the stored bytes into a fresh accumulator reproduces the
    // value: XOR against zeros is the identity.
    let mut crc = Crc::new(width);
    crc.update(bytes);
    crc
}

// ── Serialization of whole entries ───────────────────────────────────────────

/// Per-dump state: which etiquettes already carried their inode.
#[derive(Default)]
pub struct DumpState {
    dumped_stars: std::collections::HashSet<u64>,
}

/// Dump a directory entry: prefix, body, children, closing EOD.
pub fn write_directory(dir: &Directory, ch: &mut dyn Channel, state: &mut DumpState) -> Result<()> {
    write_name(ch, &dir.name)?;
    ch.write_all(&[SIG_DIRECTORY])?;
    dir.common.write(ch)?;
    for child in &dir.children {
        write_entry(child, ch, state)?;
    }
    write_eod(ch)
}

pub fn write_entry(entry: &Entry, ch: &mut dyn Channel, state: &mut DumpState) -> Result<()> {
    match entry {
        Entry::Directory(dir) => {
            write_directory(dir, ch, state)?;
        }
        Entry::Node { name, inode } => {
            write_name(ch, name)?;
            ch.write_all(&[inode.signature()])?;
            inode.write_body(ch)?;
        }
        Entry::Mirage(m) => {
            write_name(ch, &m.name)?;
            ch.write_all(&[SIG_MIRAGE])?;
            let star = m.star.borrow();
            if state.dumped_stars.insert(star.etiquette) {
                ch.write_all(&[MIRAGE_WITH_INODE])?;
                Counter::from(star.etiquette).dump(ch)?;
                ch.write_all(&[star.inode.signature()])?;
                star.inode.write_body(ch)?;
            } else {
                ch.write_all(&[MIRAGE_ALONE])?;
                Counter::from(star.etiquette).dump(ch)?;
            }
        }
        Entry::Deleted { name, of_signature, when } => {
            write_name(ch, name)?;
            ch.write_all(&[SIG_DELETED, *of_signature])?;
            Counter::from(*when).dump(ch)?;
        }
        Entry::Ignored { .. } => {
            // Diff-time sentinel; nothing reaches the wire.
        }
        Entry::IgnoredDir { name, common } => {
            write_name(ch, name)?;
            ch.write_all(&[SIG_DIRECTORY])?;
            common.write(ch)?;
            write_eod(ch)?;
        }
    }
    Ok(())
}

pub fn write_eod(ch: &mut dyn Channel) -> Result<()> {
    write_name(ch, b"")?;
    ch.write_all(&[SIG_EOD])
}

/// Parse one entry.  `Ok(None)` is the EOD marker closing the innermost
/// open directory.
pub fn read_entry(
    ch: &mut dyn Channel,
    corres: &mut HashMap<u64, Rc<RefCell<Star>>>,
) -> Result<Option<Entry>> {
    let name = read_bytes(ch, "entry name")?;
    let signature = read_u8(ch, "entry signature")?;

    let entry = match signature {
        SIG_EOD => {
            if !name.is_empty() {
                return Err(ArchiveError::Data("named end-of-directory marker".into()));
            }
            return Ok(None);
        }
        SIG_DIRECTORY => {
            let common = InodeCommon::read(ch)?;
            let mut dir = Directory::new(name, common);
            while let Some(child) = read_entry(ch, corres)? {
                dir.add(child)?;
            }
            Entry::Directory(dir)
        }
        SIG_FILE | SIG_SYMLINK | SIG_CHAR_DEVICE | SIG_BLOCK_DEVICE | SIG_PIPE | SIG_SOCKET => {
            let inode = Inode::read_body(signature, ch)?;
            Entry::Node { name, inode }
        }
        SIG_MIRAGE => {
            let framing = read_u8(ch, "mirage framing")?;
            let etiquette = Counter::read(ch)?
                .to_u64()
                .ok_or_else(|| ArchiveError::Data("etiquette out of range".into()))?;
            let star = match framing {
                MIRAGE_WITH_INODE => {
                    let inner_sig = read_u8(ch, "mirage inode signature")?;
                    let inode = Inode::read_body(inner_sig, ch)?;
                    let star = Rc::new(RefCell::new(Star::new(etiquette, inode)));
                    corres.insert(etiquette, star.clone());
                    star
                }
                MIRAGE_ALONE => corres.get(&etiquette).cloned().ok_or_else(|| {
                    ArchiveError::Data(format!(
                        "mirage references etiquette {etiquette} before it was introduced"
                    ))
                })?,
                other => {
                    return Err(ArchiveError::Data(format!(
                        "unknown mirage framing byte {:?}",
                        other as char
                    )))
                }
            };
            Entry::Mirage(Mirage { name, star })
        }
        SIG_LEGACY_ETIQUETTE => {
            // Old framing: a plain file body prefixed by its etiquette.
            let etiquette = Counter::read(ch)?
                .to_u64()
                .ok_or_else(|| ArchiveError::Data("etiquette out of range".into()))?;
            let inode = Inode::read_body(SIG_FILE, ch)?;
            let star = match corres.get(&etiquette) {
                Some(star) => star.clone(),
                None => {
                    let star = Rc::new(RefCell::new(Star::new(etiquette, inode)));
                    corres.insert(etiquette, star.clone());
                    star
                }
            };
            Entry::Mirage(Mirage { name, star })
        }
        SIG_DELETED => {
            let of_signature = read_u8(ch, "deleted-entry signature")?;
            let when = Counter::read(ch)?
                .to_u64()
                .ok_or_else(|| ArchiveError::Data("deletion date out of range".into()))?;
            Entry::Deleted { name, of_signature, when }
        }
        other => {
            return Err(ArchiveError::Data(format!(
                "unknown entry signature {:?} ({other:#04x})",
                other as char
            )))
        }
    };

    if entry.name().is_empty() && !matches!(entry, Entry::Directory(_)) {
        return Err(ArchiveError::Data("unnamed catalogue entry".into()));
    }
    Ok(Some(entry))
}
