//! The file index: one node per known logical path, each carrying the
//! version records that say which archives hold that path and when.
//!
//! Wire form per node (children sorted by name, recursion mirrors the
//! tree):
//!
//! ```text
//! record_count(counter) ‖ record*  ‖ child_count(counter) ‖ child*
//! record = archive(counter) ‖ timestamp(counter) ‖ presence(1: P or D)
//! child  = name_len(counter) ‖ name ‖ node
//! ```

use crate::channel::Channel;
use crate::counter::Counter;
use crate::error::{ArchiveError, Result};
use std::collections::BTreeMap;

const PRESENT: u8 = b'P';
const DELETED: u8 = b'D';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionRecord {
    /// 1-based archive number.
    pub archive: u32,
    pub timestamp: u64,
    /// False when the archive records the path as deleted.
    pub present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathNode {
    pub records: Vec<VersionRecord>,
    pub children: BTreeMap<String, PathNode>,
}

impl PathNode {
    /// Insert or replace the record of `archive` on this node: at most one
    /// record per (path, archive-number).
    pub fn set_record(&mut self, record: VersionRecord) {
        match self.records.iter_mut().find(|r| r.archive == record.archive) {
            Some(existing) => *existing = record,
            None => self.records.push(record),
        }
    }

    pub fn descend(&self, parts: &[&str]) -> Option<&PathNode> {
        match parts.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children.get(*head)?.descend(rest),
        }
    }

    pub fn descend_or_create(&mut self, parts: &[&str]) -> &mut PathNode {
        match parts.split_first() {
            None => self,
            Some((head, rest)) => self
                .children
                .entry((*head).to_string())
                .or_default()
                .descend_or_create(rest),
        }
    }

    /// The provider of the most recent present version, favoring the higher
    /// archive number on equal timestamps.
    pub fn most_recent(&self) -> Option<&VersionRecord> {
        self.records
            .iter()
            .filter(|r| r.present)
            .max_by_key(|r| (r.timestamp, r.archive))
    }

    /// Drop every record of archive `k`, renumber the ones above it, and
    /// prune child nodes that end up carrying nothing.
    pub fn remove_archive(&mut self, k: u32) {
        self.records.retain(|r| r.archive != k);
        for r in &mut self.records {
            if r.archive > k {
                r.archive -= 1;
            }
        }
        for child in self.children.values_mut() {
            child.remove_archive(k);
        }
        self.children
            .retain(|_, c| !c.records.is_empty() || !c.children.is_empty());
    }

    /// Exchange the roles of archives `a` and `b` in every record.
    pub fn permute(&mut self, a: u32, b: u32) {
        for r in &mut self.records {
            if r.archive == a {
                r.archive = b;
            } else if r.archive == b {
                r.archive = a;
            }
        }
        for child in self.children.values_mut() {
            child.permute(a, b);
        }
    }

    /// True if any record anywhere references archive `k`.
    pub fn references(&self, k: u32) -> bool {
        self.records.iter().any(|r| r.archive == k)
            || self.children.values().any(|c| c.references(k))
    }

    /// Visit `(path, node)` pairs depth-first; the root is not reported.
    pub fn for_each(&self, f: &mut dyn FnMut(&str, &PathNode)) {
        fn visit(node: &PathNode, prefix: &str, f: &mut dyn FnMut(&str, &PathNode)) {
            for (name, child) in &node.children {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}/{name}")
                };
                f(&path, child);
                visit(child, &path, f);
            }
        }
        visit(self, "", f);
    }

    // ── Wire ────────────────────────────────────────────────────────────────

    pub fn dump(&self, ch: &mut dyn Channel) -> Result<()> {
        Counter::from(self.records.len()).dump(ch)?;
        for r in &self.records {
            Counter::from(u64::from(r.archive)).dump(ch)?;
            Counter::from(r.timestamp).dump(ch)?;
            ch.write_all(&[if r.present { PRESENT } else { DELETED }])?;
        }
        Counter::from(self.children.len()).dump(ch)?;
        for (name, child) in &self.children {
            Counter::from(name.len()).dump(ch)?;
            ch.write_all(name.as_bytes())?;
            child.dump(ch)?;
        }
        Ok(())
    }

    pub fn read(ch: &mut dyn Channel) -> Result<Self> {
        let record_count = read_count(ch, "record count")?;
        let mut records = Vec::with_capacity(record_count.min(1024));
        for _ in 0..record_count {
            let archive = Counter::read(ch)?
                .to_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| ArchiveError::Data("archive number out of range".into()))?;
            let timestamp = Counter::read(ch)?
                .to_u64()
                .ok_or_else(|| ArchiveError::Data("record timestamp out of range".into()))?;
            let present = match read_byte(ch)? {
                PRESENT => true,
                DELETED => false,
                other => {
                    return Err(ArchiveError::Data(format!(
                        "bad presence flag {other:#04x}"
                    )))
                }
            };
            records.push(VersionRecord { archive, timestamp, present });
        }

        let child_count = read_count(ch, "child count")?;
        let mut children = BTreeMap::new();
        for _ in 0..child_count {
            let name_len = read_count(ch, "child name length")?;
            let mut name = vec![0u8; name_len];
            if ch.read(&mut name)? != name_len {
                return Err(ArchiveError::Data("truncated child name".into()));
            }
            let name = String::from_utf8(name)
                .map_err(|_| ArchiveError::Data("child name is not UTF-8".into()))?;
            children.insert(name, PathNode::read(ch)?);
        }
        Ok(PathNode { records, children })
    }
}

fn read_byte(ch: &mut dyn Channel) -> Result<u8> {
    let mut b = [0u8; 1];
    if ch.read(&mut b)? != 1 {
        return Err(ArchiveError::Data("truncated file index".into()));
    }
    Ok(b[0])
}

fn read_count(ch: &mut dyn Channel, what: &str) -> Result<usize> {
    Counter::read(ch)?
        .to_u64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ArchiveError::Memory(format!("{what} out of range")))
}
