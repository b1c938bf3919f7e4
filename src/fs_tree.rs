//! OS adapter: the filesystem side of create and extract.
//!
//! The engine proper never calls the OS directly; everything it needs from
//! a real tree goes through this module — enumerate a directory into typed
//! items, detect hard links, translate `stat` metadata, and apply catalogue
//! entries back onto disk (ownership, permissions, timestamps, device
//! nodes, FIFOs, hard links).
//!
//! Extended attributes are this adapter's extension point: the stock
//! adapter reports none and applies none, while the catalogue-side EA
//! machinery stays fully functional for adapters that do.

use crate::catalogue::entry::{EaBlock, InodeCommon, SavedStatus};
use crate::error::{ArchiveError, Result};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum ScannedKind {
    Dir,
    File { size: u64 },
    Symlink { target: Vec<u8> },
    CharDevice { major: u32, minor: u32 },
    BlockDevice { major: u32, minor: u32 },
    Fifo,
    Socket,
}

#[derive(Debug)]
pub struct ScannedItem {
    pub name: Vec<u8>,
    pub path: PathBuf,
    pub kind: ScannedKind,
    pub common: InodeCommon,
    /// `(device, inode)` when the item shares its inode with other names.
    pub hard_link_key: Option<(u64, u64)>,
}

/// Enumerate one directory level, name-sorted for reproducible archives.
pub fn scan_dir(dir: &Path) -> Result<Vec<ScannedItem>> {
    let mut items = Vec::new();
    let rd = std::fs::read_dir(dir)
        .map_err(|e| ArchiveError::Hardware(format!("cannot list {}: {e}", dir.display())))?;
    for entry in rd {
        let entry = entry.map_err(|e| {
            ArchiveError::Hardware(format!("error listing {}: {e}", dir.display()))
        })?;
        let path = entry.path();
        let meta = std::fs::symlink_metadata(&path).map_err(|e| {
            ArchiveError::Hardware(format!("cannot stat {}: {e}", path.display()))
        })?;

        let ft = meta.file_type();
        let kind = if ft.is_dir() {
            ScannedKind::Dir
        } else if ft.is_file() {
            ScannedKind::File { size: meta.len() }
        } else if ft.is_symlink() {
            let target = std::fs::read_link(&path).map_err(|e| {
                ArchiveError::Hardware(format!("cannot read link {}: {e}", path.display()))
            })?;
            ScannedKind::Symlink { target: target.as_os_str().as_bytes().to_vec() }
        } else {
            use std::os::unix::fs::FileTypeExt;
            let rdev = meta.rdev();
            let (major, minor) = split_dev(rdev);
            if ft.is_char_device() {
                ScannedKind::CharDevice { major, minor }
            } else if ft.is_block_device() {
                ScannedKind::BlockDevice { major, minor }
            } else if ft.is_fifo() {
                ScannedKind::Fifo
            } else if ft.is_socket() {
                ScannedKind::Socket
            } else {
                continue; // nothing the catalogue can represent
            }
        };

        let hard_link_key = if !ft.is_dir() && meta.nlink() > 1 {
            Some((meta.dev(), meta.ino()))
        } else {
            None
        };

        items.push(ScannedItem {
            name: entry.file_name().as_bytes().to_vec(),
            path,
            kind,
            common: common_of(&meta),
            hard_link_key,
        });
    }
    items.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(items)
}

pub fn common_of(meta: &std::fs::Metadata) -> InodeCommon {
    InodeCommon {
        uid: meta.uid(),
        gid: meta.gid(),
        perm: meta.mode() & 0o7777,
        atime: clamp_time(meta.atime()),
        mtime: clamp_time(meta.mtime()),
        ctime: clamp_time(meta.ctime()),
        saved: SavedStatus::Saved,
        ea: read_ea(),
    }
}

fn clamp_time(t: i64) -> u64 {
    u64::try_from(t).unwrap_or(0)
}

fn split_dev(rdev: u64) -> (u32, u32) {
    (libc::major(rdev), libc::minor(rdev))
}

/// Stock adapter: no EA support.
fn read_ea() -> Option<EaBlock> {
    None
}

// ── Applying entries back onto disk ──────────────────────────────────────────

fn cpath(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| ArchiveError::Range(format!("NUL byte in path {}", path.display())))
}

pub fn make_symlink(path: &Path, target: &[u8]) -> Result<()> {
    use std::ffi::OsStr;
    let target = Path::new(OsStr::from_bytes(target));
    std::os::unix::fs::symlink(target, path).map_err(|e| {
        ArchiveError::Hardware(format!("cannot create symlink {}: {e}", path.display()))
    })
}

pub fn make_fifo(path: &Path, perm: u32) -> Result<()> {
    let c = cpath(path)?;
    if unsafe { libc::mkfifo(c.as_ptr(), perm as libc::mode_t) } != 0 {
        return Err(ArchiveError::Hardware(format!(
            "cannot create fifo {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub fn make_device(path: &Path, perm: u32, major: u32, minor: u32, block: bool) -> Result<()> {
    let c = cpath(path)?;
    let kind = if block { libc::S_IFBLK } else { libc::S_IFCHR };
    let dev = libc::makedev(major, minor);
    if unsafe { libc::mknod(c.as_ptr(), kind | perm as libc::mode_t, dev) } != 0 {
        return Err(ArchiveError::Hardware(format!(
            "cannot create device node {}: {}",
            path.display(),
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub fn make_hard_link(existing: &Path, new: &Path) -> Result<()> {
    std::fs::hard_link(existing, new).map_err(|e| {
        ArchiveError::Hardware(format!(
            "cannot link {} to {}: {e}",
            new.display(),
            existing.display()
        ))
    })
}

/// Apply ownership, permissions, and timestamps from a catalogue entry.
/// Ownership needs privilege: a refusal from the kernel is reported only
/// when `ownership` was requested.
pub fn apply_metadata(path: &Path, common: &InodeCommon, ownership: bool) -> Result<()> {
    let c = cpath(path)?;

    if ownership {
        let rc = unsafe { libc::lchown(c.as_ptr(), common.uid, common.gid) };
        if rc != 0 {
            return Err(ArchiveError::Hardware(format!(
                "cannot set ownership of {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
    }

    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| ArchiveError::Hardware(format!("cannot stat {}: {e}", path.display())))?;
    if !meta.file_type().is_symlink() {
        if unsafe { libc::chmod(c.as_ptr(), common.perm as libc::mode_t) } != 0 {
            return Err(ArchiveError::Hardware(format!(
                "cannot set permissions of {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }

        let times = [
            libc::timeval { tv_sec: common.atime as libc::time_t, tv_usec: 0 },
            libc::timeval { tv_sec: common.mtime as libc::time_t, tv_usec: 0 },
        ];
        if unsafe { libc::utimes(c.as_ptr(), times.as_ptr()) } != 0 {
            return Err(ArchiveError::Hardware(format!(
                "cannot set times of {}: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
    }

    // EA restoration goes through the adapter extension point; the stock
    // adapter recorded none, so there is nothing to put back.
    let _ = &common.ea;
    Ok(())
}
