//! The catalogue: the in-archive tree of entries.
//!
//! Held fully in memory, rooted at a synthetic directory with an empty name.
//! The serialized form is a depth-first pre-order dump of the root framed by
//! a trailing XOR-fold CRC (width 2); parsing rebuilds the tree and resolves
//! hard links through an etiquette → star table, then checks the CRC.
//!
//! Lifecycle: created empty (new archive) or parsed whole (open), mutated
//! by the filesystem scan or the diff filter, serialized once at archive
//! finalization.

pub mod diff;
pub mod entry;
pub mod hardlink;

pub use entry::{
    Directory, EaBlock, Entry, FileData, Inode, InodeCommon, InodePayload, SavedStatus,
};
pub use hardlink::{Mirage, Star};

use crate::channel::Channel;
use crate::counter::Counter;
use crate::crc::CATALOGUE_CRC_WIDTH;
use crate::error::{ArchiveError, Result};
use entry::DumpState;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct Catalogue {
    pub root: Directory,
}

impl Default for Catalogue {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalogue {
    /// An empty catalogue: a nameless root with nothing in it.
    pub fn new() -> Self {
        Catalogue { root: Directory::new(Vec::new(), root_metadata()) }
    }

    // ── Serialization ───────────────────────────────────────────────────────

    pub fn dump(&self, ch: &mut dyn Channel) -> Result<()> {
        ch.crc_reset(CATALOGUE_CRC_WIDTH)?;
        let mut state = DumpState::default();
        let written = entry::write_directory(&self.root, ch, &mut state);
        let crc = ch.crc_take()?;
        written?;
        ch.write_all(crc.bytes())
    }

    pub fn read(ch: &mut dyn Channel) -> Result<Self> {
        ch.crc_reset(CATALOGUE_CRC_WIDTH)?;
        let mut corres = HashMap::new();
        let parsed = entry::read_entry(ch, &mut corres);
        let computed = ch.crc_take()?;
        let root = match parsed? {
            Some(Entry::Directory(dir)) => dir,
            Some(_) => {
                return Err(ArchiveError::Data(
                    "catalogue does not start with a directory".into(),
                ))
            }
            None => return Err(ArchiveError::Data("catalogue starts with an EOD".into())),
        };

        let mut stored = vec![0u8; CATALOGUE_CRC_WIDTH];
        if ch.read(&mut stored)? != stored.len() {
            return Err(ArchiveError::Data("catalogue CRC trailer missing".into()));
        }
        if computed.bytes() != stored {
            return Err(ArchiveError::Data(format!(
                "catalogue CRC mismatch: stored {}, computed {}",
                hex::encode(&stored),
                hex::encode(computed.bytes())
            )));
        }
        Ok(Catalogue { root })
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Depth-first pre-order visit; the root itself is not reported.
    /// Paths are relative to the root.
    pub fn for_each<'s>(
        &'s self,
        f: &mut dyn FnMut(&Path, &'s Entry) -> Result<()>,
    ) -> Result<()> {
        fn visit<'s>(
            dir: &'s Directory,
            prefix: &mut PathBuf,
            f: &mut dyn FnMut(&Path, &'s Entry) -> Result<()>,
        ) -> Result<()> {
            for child in dir.children() {
                prefix.push(String::from_utf8_lossy(child.name()).into_owned());
                f(prefix, child)?;
                if let Entry::Directory(sub) = child {
                    visit(sub, prefix, f)?;
                }
                prefix.pop();
            }
            Ok(())
        }
        let mut prefix = PathBuf::new();
        visit(&self.root, &mut prefix, f)
    }

    /// Resolve a relative, `/`-separated path.
    pub fn lookup(&self, path: &Path) -> Option<&Entry> {
        let mut dir = &self.root;
        let mut found = None;
        let mut parts = path.components().peekable();
        while let Some(part) = parts.next() {
            let name = part.as_os_str().to_string_lossy();
            let child = dir.child(name.as_bytes())?;
            if parts.peek().is_none() {
                found = Some(child);
            } else {
                match child {
                    Entry::Directory(sub) => dir = sub,
                    _ => return None,
                }
            }
        }
        found
    }

    pub fn stats(&self) -> EntryStats {
        let mut stats = EntryStats::default();
        fn visit(dir: &Directory, stats: &mut EntryStats) {
            for child in dir.children() {
                stats.count(child);
                if let Entry::Directory(sub) = child {
                    visit(sub, stats);
                }
            }
        }
        visit(&self.root, &mut stats);
        stats
    }
}

fn root_metadata() -> InodeCommon {
    InodeCommon {
        uid: 0,
        gid: 0,
        perm: 0o755,
        atime: 0,
        mtime: 0,
        ctime: 0,
        saved: SavedStatus::Fake,
        ea: None,
    }
}

// ── Statistics ───────────────────────────────────────────────────────────────

/// Per-kind and per-status tallies, updated during dump, read, and the
/// facade operations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EntryStats {
    pub directories: u64,
    pub files: u64,
    pub symlinks: u64,
    pub char_devices: u64,
    pub block_devices: u64,
    pub pipes: u64,
    pub sockets: u64,
    pub hard_links: u64,
    pub deleted: u64,
    pub ignored: u64,

    pub saved: u64,
    pub inode_only: u64,
    pub not_saved: u64,
    pub delta: u64,
    pub fake: u64,

    pub total_entries: u64,
    /// Per-entry data errors trapped and skipped by extract/test/diff.
    pub errors: u64,
    /// Sum of stored file sizes.
    pub total_data: Counter,
}

impl EntryStats {
    pub fn count(&mut self, entry: &Entry) {
        self.total_entries += 1;
        match entry {
            Entry::Directory(d) => {
                self.directories += 1;
                self.count_status(d.common.saved);
            }
            Entry::Node { inode, .. } => {
                self.count_inode(inode);
            }
            Entry::Mirage(m) => {
                self.hard_links += 1;
                self.count_inode(&m.star.borrow().inode);
            }
            Entry::Deleted { .. } => self.deleted += 1,
            Entry::Ignored { .. } | Entry::IgnoredDir { .. } => self.ignored += 1,
        }
    }

    fn count_inode(&mut self, inode: &Inode) {
        match &inode.payload {
            InodePayload::File(f) => {
                self.files += 1;
                if inode.common.saved.has_data() {
                    let mut t = self.total_data.clone();
                    t.add_assign(&f.size);
                    self.total_data = t;
                }
            }
            InodePayload::Symlink { .. } => self.symlinks += 1,
            InodePayload::CharDevice { .. } => self.char_devices += 1,
            InodePayload::BlockDevice { .. } => self.block_devices += 1,
            InodePayload::Pipe => self.pipes += 1,
            InodePayload::Socket => self.sockets += 1,
        }
        self.count_status(inode.common.saved);
    }

    fn count_status(&mut self, status: SavedStatus) {
        match status {
            SavedStatus::Saved => self.saved += 1,
            SavedStatus::InodeOnly => self.inode_only += 1,
            SavedStatus::NotSaved => self.not_saved += 1,
            SavedStatus::Delta => self.delta += 1,
            SavedStatus::Fake => self.fake += 1,
        }
    }
}

impl fmt::Display for EntryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  entries          {}", self.total_entries)?;
        writeln!(f, "  directories      {}", self.directories)?;
        writeln!(f, "  plain files      {}", self.files)?;
        writeln!(f, "  symlinks         {}", self.symlinks)?;
        writeln!(
            f,
            "  devices          {}",
            self.char_devices + self.block_devices
        )?;
        writeln!(f, "  pipes/sockets    {}", self.pipes + self.sockets)?;
        writeln!(f, "  hard-link names  {}", self.hard_links)?;
        writeln!(f, "  deleted markers  {}", self.deleted)?;
        writeln!(
            f,
            "  saved/delta      {} / {}",
            self.saved, self.delta
        )?;
        writeln!(
            f,
            "  inode-only/unchanged {} / {}",
            self.inode_only, self.not_saved
        )?;
        writeln!(f, "  stored bytes     {}", self.total_data)?;
        write!(f, "  entry errors     {}", self.errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{MemChannel, Mode};
    use std::cell::RefCell;
    use std::rc::Rc;

    pub(crate) fn plain_common(mtime: u64) -> InodeCommon {
        InodeCommon {
            uid: 1000,
            gid: 1000,
            perm: 0o644,
            atime: mtime,
            mtime,
            ctime: mtime,
            saved: SavedStatus::Saved,
            ea: None,
        }
    }

    pub(crate) fn file_inode(mtime: u64, size: u64) -> Inode {
        Inode {
            common: plain_common(mtime),
            payload: InodePayload::File(FileData {
                size: Counter::from(size),
                data_offset: Counter::from(77u64),
                crc: {
                    let mut c = crate::crc::Crc::new(2);
                    c.update(b"xy");
                    Some(c)
                },
                algo: crate::compress::CompressionAlgo::Gzip,
                delta_sig: None,
            }),
        }
    }

    fn sample() -> Catalogue {
        let mut cat = Catalogue::new();
        let mut sub = Directory::new(b"etc".to_vec(), plain_common(1_700_000_000));
        sub.add(Entry::Node {
            name: b"hosts".to_vec(),
            inode: file_inode(1_700_000_000, 6),
        })
        .unwrap();
        sub.add(Entry::Node {
            name: b"motd".to_vec(),
            inode: Inode {
                common: plain_common(1_600_000_000),
                payload: InodePayload::Symlink { target: b"../run/motd".to_vec() },
            },
        })
        .unwrap();

        let star = Rc::new(RefCell::new(Star::new(9, file_inode(1_650_000_000, 4))));
        sub.add(Entry::Mirage(Mirage::new(b"linked-a".to_vec(), star.clone())))
            .unwrap();
        sub.add(Entry::Mirage(Mirage::new(b"linked-b".to_vec(), star)))
            .unwrap();
        sub.add(Entry::Deleted {
            name: b"gone".to_vec(),
            of_signature: entry::SIG_FILE,
            when: 1_710_000_000,
        })
        .unwrap();

        cat.root.add(Entry::Directory(sub)).unwrap();
        cat.root
            .add(Entry::Node {
                name: b"dev-null".to_vec(),
                inode: Inode {
                    common: plain_common(0),
                    payload: InodePayload::CharDevice { major: 1, minor: 3 },
                },
            })
            .unwrap();
        cat
    }

    #[test]
    fn dump_parse_preserves_structure_and_etiquettes() {
        let cat = sample();
        let mut ch = MemChannel::new(Mode::ReadWrite);
        cat.dump(&mut ch).unwrap();
        ch.skip(&Counter::zero()).unwrap();
        let back = Catalogue::read(&mut ch).unwrap();

        assert_eq!(back.root, cat.root);

        // Both mirages resolve to one star object with two references.
        let a = back.lookup(Path::new("etc/linked-a")).unwrap();
        let b = back.lookup(Path::new("etc/linked-b")).unwrap();
        match (a, b) {
            (Entry::Mirage(ma), Entry::Mirage(mb)) => {
                assert!(ma.same_star(mb));
                assert_eq!(ma.ref_count(), 2);
                assert_eq!(ma.etiquette(), 9);
            }
            _ => panic!("expected mirages"),
        }
    }

    #[test]
    fn flipped_byte_fails_the_crc() {
        let cat = sample();
        let mut ch = MemChannel::new(Mode::ReadWrite);
        cat.dump(&mut ch).unwrap();
        let mut bytes = ch.into_vec();
        let middle = bytes.len() / 2;
        bytes[middle] ^= 0x01;
        let mut mangled = MemChannel::from_vec(Mode::ReadOnly, bytes);
        assert!(matches!(
            Catalogue::read(&mut mangled),
            Err(ArchiveError::Data(_))
        ));
    }

    #[test]
    fn mirage_before_introduction_is_rejected() {
        let mut ch = MemChannel::new(Mode::ReadWrite);
        // Root, one mirage-alone child referencing etiquette 5, EOD, CRC.
        ch.crc_reset(2).unwrap();
        entry::write_name(&mut ch, b"").unwrap();
        ch.write_all(&[entry::SIG_DIRECTORY]).unwrap();
        root_metadata().write(&mut ch).unwrap();
        entry::write_name(&mut ch, b"orphan").unwrap();
        ch.write_all(&[entry::SIG_MIRAGE, entry::MIRAGE_ALONE]).unwrap();
        Counter::from(5u64).dump(&mut ch).unwrap();
        entry::write_eod(&mut ch).unwrap();
        let crc = ch.crc_take().unwrap();
        let bytes = crc.bytes().to_vec();
        ch.write_all(&bytes).unwrap();

        ch.skip(&Counter::zero()).unwrap();
        let err = Catalogue::read(&mut ch).unwrap_err();
        assert!(matches!(err, ArchiveError::Data(_)));
        assert!(err.to_string().contains("etiquette 5"));
    }

    #[test]
    fn stats_count_kinds_and_statuses() {
        let stats = sample().stats();
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.files, 3); // hosts + two hard-link names
        assert_eq!(stats.symlinks, 1);
        assert_eq!(stats.char_devices, 1);
        assert_eq!(stats.hard_links, 2);
        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.total_entries, 7);
        assert_eq!(stats.total_data.to_u64(), Some(6 + 4 + 4));
    }

    #[test]
    fn subtree_summaries_are_cached_until_mutation() {
        let cat = sample();
        let etc = match cat.root.child(b"etc") {
            Some(Entry::Directory(d)) => d,
            other => panic!("expected the etc directory, got {other:?}"),
        };
        assert!(etc.subtree_changed());
        // hosts + one hard-linked payload per name, like the statistics.
        assert_eq!(etc.subtree_size().to_u64(), Some(6 + 4 + 4));
        // Second query hits the cache and agrees.
        assert_eq!(etc.subtree_size().to_u64(), Some(14));

        let mut quiet = Directory::new(b"quiet".to_vec(), plain_common(0));
        assert!(!quiet.subtree_changed());
        let mut unchanged = file_inode(0, 3);
        unchanged.common.saved = SavedStatus::NotSaved;
        quiet
            .add(Entry::Node { name: b"old".to_vec(), inode: unchanged })
            .unwrap();
        // The mutation dropped the cache: still unchanged, but sized.
        assert!(!quiet.subtree_changed());
        assert_eq!(quiet.subtree_size().to_u64(), Some(3));
    }

    #[test]
    fn duplicate_names_are_refused() {
        let mut dir = Directory::new(b"d".to_vec(), plain_common(0));
        dir.add(Entry::Node { name: b"x".to_vec(), inode: file_inode(0, 1) })
            .unwrap();
        assert!(dir
            .add(Entry::Node { name: b"x".to_vec(), inode: file_inode(0, 2) })
            .is_err());
        assert!(dir
            .add(Entry::Node { name: b"a/b".to_vec(), inode: file_inode(0, 2) })
            .is_err());
    }
}
