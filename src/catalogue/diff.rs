//! Incremental diff against a reference catalogue.
//!
//! During an incremental create, the filesystem scan classifies each new
//! inode against the entry of the same path in the reference catalogue, and
//! once a directory is fully scanned, reference children that never showed
//! up become deleted markers stamped with the scan date.  Paths the filters
//! excluded appear as `Ignored` sentinels so their absence is not mistaken
//! for deletion.

use super::entry::{Directory, Entry, Inode, InodePayload, SavedStatus};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct DiffPolicy {
    /// Tolerate mtime differences of a whole number of hours up to this
    /// bound (daylight-saving shifts on FAT-backed trees).
    pub hour_shift: u32,
}

impl Default for DiffPolicy {
    fn default() -> Self {
        DiffPolicy { hour_shift: 0 }
    }
}

impl DiffPolicy {
    fn mtime_equal(&self, a: u64, b: u64) -> bool {
        if a == b {
            return true;
        }
        if self.hour_shift == 0 {
            return false;
        }
        let delta = a.abs_diff(b);
        delta % 3600 == 0 && delta / 3600 <= u64::from(self.hour_shift)
    }
}

/// Decide the saved status of a freshly scanned inode.
///
/// No reference, or a reference of another kind, means the data must be
/// stored.  An unchanged entry stores nothing; a metadata-only change stores
/// the inode alone.
pub fn classify(scanned: &Inode, reference: Option<&Entry>, policy: &DiffPolicy) -> SavedStatus {
    let reference = match reference {
        Some(entry) => entry,
        None => return SavedStatus::Saved,
    };

    let verdict = reference.with_inode(|old| {
        if old.signature() != scanned.signature() {
            return SavedStatus::Saved;
        }
        let data_changed = match (&old.payload, &scanned.payload) {
            (InodePayload::File(old_f), InodePayload::File(new_f)) => {
                old_f.size != new_f.size
                    || !policy.mtime_equal(old.common.mtime, scanned.common.mtime)
            }
            (InodePayload::Symlink { target: old_t }, InodePayload::Symlink { target: new_t }) => {
                old_t != new_t
            }
            (
                InodePayload::CharDevice { major: oma, minor: omi },
                InodePayload::CharDevice { major: nma, minor: nmi },
            )
            | (
                InodePayload::BlockDevice { major: oma, minor: omi },
                InodePayload::BlockDevice { major: nma, minor: nmi },
            ) => oma != nma || omi != nmi,
            _ => false,
        };
        if data_changed {
            return SavedStatus::Saved;
        }

        let ea_changed = match (&old.common.ea, &scanned.common.ea) {
            (None, None) => false,
            (Some(a), Some(b)) => a.fingerprint() != b.fingerprint(),
            _ => true,
        };
        let metadata_changed = old.common.uid != scanned.common.uid
            || old.common.gid != scanned.common.gid
            || old.common.perm != scanned.common.perm
            || ea_changed;
        if metadata_changed {
            SavedStatus::InodeOnly
        } else {
            SavedStatus::NotSaved
        }
    });

    // A directory (or marker) under the same name: the kind changed.
    verdict.unwrap_or(SavedStatus::Saved)
}

/// Append deleted markers for reference children absent from `scanned`,
/// recursing through directories present on both sides.  Returns the number
/// of markers added.
pub fn append_deleted(scanned: &mut Directory, reference: &Directory, now: u64) -> Result<u64> {
    let mut added = 0;
    for old_child in reference.children() {
        let name = old_child.name();
        if matches!(old_child, Entry::Deleted { .. } | Entry::Ignored { .. }) {
            // A marker is not a presence; an already-deleted path needs no
            // second marker unless it reappeared (then it is simply saved).
            continue;
        }
        match scanned.child(name) {
            None => {
                scanned.add(Entry::Deleted {
                    name: name.to_vec(),
                    of_signature: old_child.signature(),
                    when: now,
                })?;
                added += 1;
            }
            Some(Entry::Ignored { .. }) | Some(Entry::IgnoredDir { .. }) => {
                // Filtered out this run; absence proves nothing.
            }
            Some(_) => {}
        }
    }

    // Recurse through directories that exist on both sides.  Two passes to
    // keep the borrow on `scanned` exclusive here.
    let ref_dirs: Vec<&Directory> = reference
        .children()
        .iter()
        .filter_map(|c| match c {
            Entry::Directory(d) => Some(d),
            _ => None,
        })
        .collect();
    for old_dir in ref_dirs {
        if let Some(position) = scanned
            .children()
            .iter()
            .position(|c| c.name() == old_dir.name && matches!(c, Entry::Directory(_)))
        {
            if let Entry::Directory(new_dir) = &mut scanned.children_mut()[position] {
                added += append_deleted(new_dir, old_dir, now)?;
            }
        }
    }
    Ok(added)
}
