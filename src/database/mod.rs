//! The database of archives.
//!
//! A persistent index over many archives: an ordered list of slots
//! (1-based archive numbers, each a `{path, basename}` pair), the options
//! and command path used to invoke the restorer, and the file index mapping
//! every known logical path to its per-archive version records.  Restores
//! consult the index, pick the most recent provider per path, and dispatch
//! one restorer process per path.
//!
//! On-disk format: `version(1) ‖ options(1 = 0) ‖ gzip stream`, the inner
//! stream carrying slots, settings, and the file index.  Every mutating
//! command persists a fresh file.

pub mod index;

use crate::catalogue::{Catalogue, Entry};
use crate::channel::{Channel, FileChannel, Mode};
use crate::compress::{CompressionAlgo, Compressor};
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use crate::interact::Interact;
use index::{PathNode, VersionRecord};
use std::path::Path;

/// Format version of the database file.
pub const DATABASE_VERSION: u8 = 1;
const OPTIONS_NONE: u8 = 0x00;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSlot {
    pub path: String,
    pub basename: String,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Database {
    slots: Vec<ArchiveSlot>,
    options_to_restorer: Vec<String>,
    restorer_path: Option<String>,
    index: PathNode,
}

impl Database {
    pub fn new() -> Self {
        Database::default()
    }

    // ── Slot access ─────────────────────────────────────────────────────────

    pub fn slots(&self) -> &[ArchiveSlot] {
        &self.slots
    }

    pub fn options(&self) -> &[String] {
        &self.options_to_restorer
    }

    pub fn restorer_path(&self) -> Option<&str> {
        self.restorer_path.as_deref()
    }

    fn slot_index(&self, num: u32) -> Result<usize> {
        if num == 0 || num as usize > self.slots.len() {
            return Err(ArchiveError::Range(format!(
                "archive number {num} is out of range 1..={}",
                self.slots.len()
            )));
        }
        Ok(num as usize - 1)
    }

    // ── Mutations ───────────────────────────────────────────────────────────

    /// Import an archive's catalogue as the next archive number.
    pub fn add_archive(&mut self, cat: &Catalogue, path: &str, basename: &str) -> Result<()> {
        let num = self.slots.len() as u32 + 1;
        self.slots.push(ArchiveSlot {
            path: path.to_string(),
            basename: basename.to_string(),
        });

        let index = &mut self.index;
        cat.for_each(&mut |rel, entry| {
            let rel = rel.to_string_lossy();
            let parts: Vec<&str> = rel.split('/').collect();
            let record = match entry {
                Entry::Deleted { when, .. } => {
                    Some(VersionRecord { archive: num, timestamp: *when, present: false })
                }
                Entry::Directory(d) => Some(VersionRecord {
                    archive: num,
                    timestamp: d.common.mtime,
                    present: true,
                }),
                Entry::Ignored { .. } | Entry::IgnoredDir { .. } => None,
                other => other.with_inode(|inode| VersionRecord {
                    archive: num,
                    timestamp: inode.common.mtime,
                    present: true,
                }),
            };
            if let Some(record) = record {
                index.descend_or_create(&parts).set_record(record);
            }
            Ok(())
        })
    }

    /// Erase slot `k`: the slots above it move down one number and the file
    /// index is renumbered to match, dropping entries only `k` provided.
    pub fn remove_archive(&mut self, num: u32) -> Result<()> {
        let at = self.slot_index(num)?;
        self.slots.remove(at);
        self.index.remove_archive(num);
        Ok(())
    }

    pub fn change_name(&mut self, num: u32, basename: &str) -> Result<()> {
        let at = self.slot_index(num)?;
        self.slots[at].basename = basename.to_string();
        Ok(())
    }

    pub fn set_path(&mut self, num: u32, path: &str) -> Result<()> {
        let at = self.slot_index(num)?;
        self.slots[at].path = path.to_string();
        Ok(())
    }

    pub fn set_options(&mut self, options: Vec<String>) {
        self.options_to_restorer = options;
    }

    pub fn set_restorer_path(&mut self, path: &str) {
        self.restorer_path = Some(path.to_string());
    }

    /// Exchange the identities of two slots, file-index roles included.
    pub fn permute(&mut self, a: u32, b: u32) -> Result<()> {
        let ia = self.slot_index(a)?;
        let ib = self.slot_index(b)?;
        self.slots.swap(ia, ib);
        self.index.permute(a, b);
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Paths for which `num` holds a version; `num == 0` lists everything.
    pub fn files_of(&self, num: u32) -> Result<Vec<(String, VersionRecord)>> {
        if num != 0 {
            self.slot_index(num)?;
        }
        let mut out = Vec::new();
        self.index.for_each(&mut |path, node| {
            for r in &node.records {
                if num == 0 || r.archive == num {
                    out.push((path.to_string(), *r));
                }
            }
        });
        Ok(out)
    }

    /// Every archive holding a version of `path`.
    pub fn versions_of(&self, path: &str) -> Vec<VersionRecord> {
        let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        match self.index.descend(&parts) {
            Some(node) => node.records.clone(),
            None => Vec::new(),
        }
    }

    /// Per-slot count of paths for which that slot is the most recent
    /// provider.
    pub fn most_recent_stats(&self) -> Vec<u64> {
        let mut counts = vec![0u64; self.slots.len()];
        self.index.for_each(&mut |_, node| {
            if let Some(r) = node.most_recent() {
                if let Some(slot) = counts.get_mut(r.archive as usize - 1) {
                    *slot += 1;
                }
            }
        });
        counts
    }

    // ── Restore dispatch ────────────────────────────────────────────────────

    /// For each relative path, invoke the restorer against the archive that
    /// most recently provided it.  Unknown paths warn and are skipped;
    /// absolute paths are refused outright; a failing child is a script
    /// error reported after every path was attempted.
    pub fn restore(&self, ui: &dyn Interact, paths: &[String]) -> Result<()> {
        for p in paths {
            if p.starts_with('/') {
                return Err(ArchiveError::Range(format!(
                    "restore takes relative paths, {p} is absolute"
                )));
            }
        }

        let command = self.restorer_path.clone().unwrap_or_else(|| "varc".to_string());
        let mut failures = Vec::new();
        for path in paths {
            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            let record = self.index.descend(&parts).and_then(PathNode::most_recent);
            let record = match record {
                Some(r) => *r,
                None => {
                    ui.warn(&format!("{path}: no archive provides this path, skipped"));
                    continue;
                }
            };
            let slot = &self.slots[record.archive as usize - 1];
            let archive_arg = if slot.path.is_empty() {
                slot.basename.clone()
            } else {
                format!("{}/{}", slot.path.trim_end_matches('/'), slot.basename)
            };

            let mut cmd = std::process::Command::new(&command);
            cmd.arg("-x").arg(&archive_arg);
            cmd.args(&self.options_to_restorer);
            cmd.arg(path);
            match cmd.status() {
                Ok(status) if status.success() => {}
                Ok(status) => failures.push(format!("{path}: restorer exited with {status}")),
                Err(e) => failures.push(format!("{path}: cannot run {command}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ArchiveError::Script(failures.join("; ")))
        }
    }

    // ── Persistence ─────────────────────────────────────────────────────────

    pub fn save(&self, file: &Path, overwrite: bool) -> Result<()> {
        if file.exists() && !overwrite {
            return Err(ArchiveError::Range(format!(
                "cannot create database: {} already exists",
                file.display()
            )));
        }
        let _ = std::fs::remove_file(file);
        let mut raw = FileChannel::open(file, Mode::WriteOnly)?;
        raw.write_all(&[DATABASE_VERSION, OPTIONS_NONE])?;

        let mut comp = Compressor::new_write(CompressionAlgo::Gzip, Box::new(raw))?;
        self.dump_inner(&mut comp)?;
        comp.write_eof()
    }

    pub fn load(file: &Path, ui: &dyn Interact) -> Result<Self> {
        let mut raw = FileChannel::open(file, Mode::ReadOnly)?;
        let mut head = [0u8; 2];
        if raw.read(&mut head)? != 2 {
            return Err(ArchiveError::Data("truncated database header".into()));
        }
        if head[0] != DATABASE_VERSION {
            ui.pause_or_abort(
                "the database format version is newer than this build — try reading anyway?",
            )?;
        }
        if head[1] != OPTIONS_NONE {
            return Err(ArchiveError::Feature(format!(
                "unknown database header option {:#04x}",
                head[1]
            )));
        }

        let mut comp = Compressor::new_read(CompressionAlgo::Gzip, Box::new(raw))?;
        Self::read_inner(&mut comp)
    }

    fn dump_inner(&self, ch: &mut dyn Channel) -> Result<()> {
        Counter::from(self.slots.len()).dump(ch)?;
        for slot in &self.slots {
            dump_string(ch, &slot.path)?;
            dump_string(ch, &slot.basename)?;
        }
        Counter::from(self.options_to_restorer.len()).dump(ch)?;
        for opt in &self.options_to_restorer {
            dump_string(ch, opt)?;
        }
        match &self.restorer_path {
            None => ch.write_all(&[0])?,
            Some(p) => {
                ch.write_all(&[1])?;
                dump_string(ch, p)?;
            }
        }
        self.index.dump(ch)
    }

    fn read_inner(ch: &mut dyn Channel) -> Result<Self> {
        let slot_count = read_count(ch, "slot count")?;
        let mut slots = Vec::with_capacity(slot_count.min(1024));
        for _ in 0..slot_count {
            let path = read_string(ch, "slot path")?;
            let basename = read_string(ch, "slot basename")?;
            slots.push(ArchiveSlot { path, basename });
        }
        let opt_count = read_count(ch, "option count")?;
        let mut options_to_restorer = Vec::with_capacity(opt_count.min(1024));
        for _ in 0..opt_count {
            options_to_restorer.push(read_string(ch, "restorer option")?);
        }
        let restorer_path = match read_byte(ch)? {
            0 => None,
            1 => Some(read_string(ch, "restorer path")?),
            other => {
                return Err(ArchiveError::Data(format!(
                    "bad restorer-path presence byte {other:#04x}"
                )))
            }
        };
        let index = PathNode::read(ch)?;
        Ok(Database { slots, options_to_restorer, restorer_path, index })
    }
}

fn dump_string(ch: &mut dyn Channel, s: &str) -> Result<()> {
    Counter::from(s.len()).dump(ch)?;
    ch.write_all(s.as_bytes())
}

fn read_string(ch: &mut dyn Channel, what: &str) -> Result<String> {
    let len = read_count(ch, what)?;
    let mut bytes = vec![0u8; len];
    if ch.read(&mut bytes)? != len {
        return Err(ArchiveError::Data(format!("truncated {what}")));
    }
    String::from_utf8(bytes).map_err(|_| ArchiveError::Data(format!("{what} is not UTF-8")))
}

fn read_byte(ch: &mut dyn Channel) -> Result<u8> {
    let mut b = [0u8; 1];
    if ch.read(&mut b)? != 1 {
        return Err(ArchiveError::Data("truncated database stream".into()));
    }
    Ok(b[0])
}

fn read_count(ch: &mut dyn Channel, what: &str) -> Result<usize> {
    Counter::read(ch)?
        .to_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ArchiveError::Memory(format!("{what} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::entry::{
        FileData, Inode, InodeCommon, InodePayload, SavedStatus,
    };
    use crate::catalogue::Directory;
    use crate::interact::FixedAnswer;
    use tempfile::TempDir;

    fn file_entry(name: &[u8], mtime: u64) -> Entry {
        Entry::Node {
            name: name.to_vec(),
            inode: Inode {
                common: InodeCommon {
                    uid: 0,
                    gid: 0,
                    perm: 0o644,
                    atime: mtime,
                    mtime,
                    ctime: mtime,
                    saved: SavedStatus::Saved,
                    ea: None,
                },
                payload: InodePayload::File(FileData {
                    size: Counter::from(1u64),
                    data_offset: Counter::zero(),
                    crc: None,
                    algo: CompressionAlgo::None,
                    delta_sig: None,
                }),
            },
        }
    }

    fn catalogue_with(files: &[(&[u8], u64)]) -> Catalogue {
        let mut cat = Catalogue::new();
        let mut etc = Directory::new(b"etc".to_vec(), InodeCommon {
            uid: 0,
            gid: 0,
            perm: 0o755,
            atime: 0,
            mtime: 0,
            ctime: 0,
            saved: SavedStatus::Saved,
            ea: None,
        });
        for (name, mtime) in files {
            etc.add(file_entry(name, *mtime)).unwrap();
        }
        cat.root.add(Entry::Directory(etc)).unwrap();
        cat
    }

    #[test]
    fn add_then_roundtrip_through_the_file() {
        let dir = TempDir::new().unwrap();
        let db_file = dir.path().join("base.db");

        let mut db = Database::new();
        db.add_archive(&catalogue_with(&[(b"hosts", 100)]), "/a", "base1").unwrap();
        db.add_archive(&catalogue_with(&[(b"hosts", 200)]), "/b", "base2").unwrap();
        db.set_options(vec!["-R".into(), "/".into()]);
        db.set_restorer_path("/usr/local/bin/varc");
        db.save(&db_file, false).unwrap();

        // Creating without overwrite over an existing file is refused.
        assert!(matches!(db.save(&db_file, false), Err(ArchiveError::Range(_))));

        let back = Database::load(&db_file, &FixedAnswer(false)).unwrap();
        assert_eq!(back, db);
        assert_eq!(back.slots().len(), 2);
        let versions = back.versions_of("etc/hosts");
        assert_eq!(versions.len(), 2);
        assert_eq!(back.versions_of("etc/hosts")[1].archive, 2);
    }

    #[test]
    fn remove_keeps_numbers_contiguous() {
        let mut db = Database::new();
        db.add_archive(&catalogue_with(&[(b"a", 1)]), "/p1", "b1").unwrap();
        db.add_archive(&catalogue_with(&[(b"b", 2)]), "/p2", "b2").unwrap();
        db.add_archive(&catalogue_with(&[(b"c", 3)]), "/p3", "b3").unwrap();

        db.remove_archive(2).unwrap();
        assert_eq!(db.slots().len(), 2);
        assert_eq!(db.slots()[1].basename, "b3");
        // etc/b was only in archive 2: gone from the index.
        assert!(db.versions_of("etc/b").is_empty());
        // etc/c now comes from archive number 2.
        assert_eq!(db.versions_of("etc/c")[0].archive, 2);

        assert!(db.remove_archive(5).is_err());
        assert!(db.remove_archive(0).is_err());
    }

    #[test]
    fn permute_twice_is_identity_and_swaps_roles() {
        let mut db = Database::new();
        db.add_archive(&catalogue_with(&[(b"a", 1)]), "/p1", "b1").unwrap();
        db.add_archive(&catalogue_with(&[(b"b", 2)]), "/p2", "b2").unwrap();
        db.add_archive(&catalogue_with(&[(b"c", 3)]), "/p3", "b3").unwrap();
        let original = db.clone();

        db.permute(1, 3).unwrap();
        assert_eq!(db.slots()[0].basename, "b3");
        assert_eq!(db.slots()[2].basename, "b1");
        assert_eq!(db.versions_of("etc/a")[0].archive, 3);
        assert_eq!(db.versions_of("etc/c")[0].archive, 1);
        assert_eq!(db.versions_of("etc/b")[0].archive, 2);

        db.permute(1, 3).unwrap();
        assert_eq!(db, original);
    }

    #[test]
    fn most_recent_stats_count_providers() {
        let mut db = Database::new();
        db.add_archive(&catalogue_with(&[(b"x", 100), (b"y", 100)]), "/p1", "b1").unwrap();
        db.add_archive(&catalogue_with(&[(b"x", 500)]), "/p2", "b2").unwrap();
        let stats = db.most_recent_stats();
        // etc itself counts as a path provided most recently by slot 2
        // (same mtime, higher number wins).
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1], 2); // x and etc
        assert_eq!(stats[0], 1); // y
    }

    #[test]
    fn restore_rejects_absolute_paths() {
        let db = Database::new();
        let err = db.restore(&FixedAnswer(true), &["/etc/hosts".into()]).unwrap_err();
        assert!(matches!(err, ArchiveError::Range(_)));
    }

    #[test]
    fn restore_dispatches_the_configured_command() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("argv.log");
        let script = dir.path().join("fake-restorer");
        std::fs::write(
            &script,
            format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut db = Database::new();
        db.add_archive(&catalogue_with(&[(b"hosts", 100)]), "/a", "base1").unwrap();
        db.add_archive(&catalogue_with(&[(b"hosts", 200)]), "/b", "base2").unwrap();
        db.set_options(vec!["-O".into(), "fast".into()]);
        db.set_restorer_path(script.to_str().unwrap());

        db.restore(&FixedAnswer(true), &["etc/hosts".into()]).unwrap();
        let logged = std::fs::read_to_string(&log).unwrap();
        assert_eq!(logged.trim(), "-x /b/base2 -O fast etc/hosts");

        // Unknown paths warn and skip without failing the run.
        db.restore(&FixedAnswer(true), &["no/such/path".into()]).unwrap();

        // A failing restorer surfaces as a script error.
        std::fs::write(&script, "#!/bin/sh\nexit 9\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let err = db.restore(&FixedAnswer(true), &["etc/hosts".into()]).unwrap_err();
        assert!(matches!(err, ArchiveError::Script(_)));
    }
}
