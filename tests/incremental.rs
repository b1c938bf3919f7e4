//! Incremental runs against a reference archive: unchanged entries store
//! nothing, changed entries store data, vanished entries leave a dated
//! deletion marker.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use varc::archive::{self, CreateOptions, OperationContext};
use varc::catalogue::entry::{InodeCommon, SIG_FILE};
use varc::catalogue::{Entry, SavedStatus};
use varc::interact::FixedAnswer;
use varc::slice::SliceConfig;
use varc::{CompressionAlgo, OpenArchive};

fn ctx() -> OperationContext {
    OperationContext::new(Arc::new(FixedAnswer(true)), 11)
}

fn pin_mtime(path: &Path, mtime: u64) {
    let common = InodeCommon {
        uid: 0,
        gid: 0,
        perm: 0o644,
        atime: mtime,
        mtime,
        ctime: 0,
        saved: SavedStatus::Saved,
        ea: None,
    };
    varc::fs_tree::apply_metadata(path, &common, false).unwrap();
}

fn status_of(catalogue: &varc::Catalogue, name: &str) -> SavedStatus {
    match catalogue.lookup(Path::new(name)) {
        Some(entry) => entry
            .with_inode(|inode| inode.common.saved)
            .expect("an inode entry"),
        None => panic!("{name} missing from the catalogue"),
    }
}

// S3 — x unchanged, y touched, z deleted.
#[test]
fn incremental_marks_unchanged_changed_and_deleted() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    for name in ["x", "y", "z"] {
        std::fs::write(src.join(name), format!("content of {name}")).unwrap();
        pin_mtime(&src.join(name), 1_700_000_000);
    }

    let full = CreateOptions::new(SliceConfig::new(work.path(), "full"), CompressionAlgo::Gzip);
    archive::create(&ctx(), &full, &src, None).unwrap();

    // Mutate the tree: y gets a newer mtime, z disappears.
    pin_mtime(&src.join("y"), 1_700_000_999);
    std::fs::remove_file(src.join("z")).unwrap();

    let reference = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "full"), None)
        .unwrap()
        .catalogue;
    let before = chrono::Utc::now().timestamp() as u64;
    let incr = CreateOptions::new(SliceConfig::new(work.path(), "incr"), CompressionAlgo::Gzip);
    let stats = archive::create(&ctx(), &incr, &src, Some(&reference)).unwrap();
    let after = chrono::Utc::now().timestamp() as u64;
    assert_eq!(stats.deleted, 1);

    let new_cat = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "incr"), None)
        .unwrap()
        .catalogue;
    assert_eq!(status_of(&new_cat, "x"), SavedStatus::NotSaved);
    assert_eq!(status_of(&new_cat, "y"), SavedStatus::Saved);
    match new_cat.lookup(Path::new("z")) {
        Some(Entry::Deleted { of_signature, when, .. }) => {
            assert_eq!(*of_signature, SIG_FILE);
            assert!(
                (before..=after).contains(when),
                "deletion date {when} outside the scan window {before}..={after}"
            );
        }
        other => panic!("expected a deletion marker for z, got {other:?}"),
    }
}

// A metadata-only change stores the inode but not the data.
#[test]
fn permission_change_is_inode_only() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("f"), b"constant bytes").unwrap();
    pin_mtime(&src.join("f"), 1_700_000_000);

    let full = CreateOptions::new(SliceConfig::new(work.path(), "full"), CompressionAlgo::None);
    archive::create(&ctx(), &full, &src, None).unwrap();

    // Same content and mtime, new permissions.
    let common = InodeCommon {
        uid: 0,
        gid: 0,
        perm: 0o600,
        atime: 1_700_000_000,
        mtime: 1_700_000_000,
        ctime: 0,
        saved: SavedStatus::Saved,
        ea: None,
    };
    varc::fs_tree::apply_metadata(&src.join("f"), &common, false).unwrap();

    let reference = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "full"), None)
        .unwrap()
        .catalogue;
    let incr = CreateOptions::new(SliceConfig::new(work.path(), "incr"), CompressionAlgo::None);
    let stats = archive::create(&ctx(), &incr, &src, Some(&reference)).unwrap();
    assert_eq!(stats.inode_only, 1);

    let new_cat = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "incr"), None)
        .unwrap()
        .catalogue;
    assert_eq!(status_of(&new_cat, "f"), SavedStatus::InodeOnly);
}

// A path excluded by the filter leaves an ignored sentinel, so its absence
// from the scan is not mistaken for a deletion.
#[test]
fn filtered_paths_are_not_reported_deleted() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir_all(src.join("keep")).unwrap();
    std::fs::create_dir_all(src.join("skip")).unwrap();
    std::fs::write(src.join("keep/a"), b"a").unwrap();
    std::fs::write(src.join("skip/b"), b"b").unwrap();
    std::fs::write(src.join("loose"), b"c").unwrap();
    for p in ["keep/a", "skip/b", "loose"] {
        pin_mtime(&src.join(p), 1_700_000_000);
    }

    let full = CreateOptions::new(SliceConfig::new(work.path(), "full"), CompressionAlgo::Gzip);
    archive::create(&ctx(), &full, &src, None).unwrap();
    let reference = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "full"), None)
        .unwrap()
        .catalogue;

    // Incremental restricted to keep/: loose and skip/ are filtered out,
    // not gone.
    let mut incr = CreateOptions::new(SliceConfig::new(work.path(), "incr"), CompressionAlgo::Gzip);
    incr.mask = varc::Mask::any_of(&["keep".to_string()]);
    let stats = archive::create(&ctx(), &incr, &src, Some(&reference)).unwrap();
    assert_eq!(stats.deleted, 0);

    let new_cat = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "incr"), None)
        .unwrap()
        .catalogue;
    assert_eq!(status_of(&new_cat, "keep/a"), SavedStatus::NotSaved);
    assert!(new_cat.lookup(Path::new("loose")).is_none());
    match new_cat.lookup(Path::new("skip")) {
        // The pruned subtree serializes as a childless directory.
        Some(Entry::Directory(d)) => assert!(!d.has_children()),
        other => panic!("expected a childless directory for skip, got {other:?}"),
    }
}

// The diff operation reports drift between an archive and the tree.
#[test]
fn diff_reports_drift() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("stable"), b"same").unwrap();
    std::fs::write(src.join("drifting"), b"before").unwrap();
    pin_mtime(&src.join("stable"), 1_700_000_000);
    pin_mtime(&src.join("drifting"), 1_700_000_000);

    let opts = CreateOptions::new(SliceConfig::new(work.path(), "arc"), CompressionAlgo::Gzip);
    archive::create(&ctx(), &opts, &src, None).unwrap();

    std::fs::write(src.join("drifting"), b"after!").unwrap();
    pin_mtime(&src.join("drifting"), 1_700_000_000);

    let mut opened = OpenArchive::open(&ctx(), SliceConfig::new(work.path(), "arc"), None).unwrap();
    let stats = opened.diff_against(&ctx(), &src).unwrap();
    assert_eq!(stats.errors, 1, "only the rewritten file differs");
}
