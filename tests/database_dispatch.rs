//! Database scenarios over real archives: add, permute, and the restore
//! dispatch argv contract.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use varc::archive::{self, CreateOptions, OperationContext};
use varc::catalogue::entry::InodeCommon;
use varc::catalogue::SavedStatus;
use varc::interact::FixedAnswer;
use varc::slice::SliceConfig;
use varc::{ArchiveError, CompressionAlgo, Database, OpenArchive};

fn ctx() -> OperationContext {
    OperationContext::new(Arc::new(FixedAnswer(true)), 23)
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

/// Build an archive under `work` holding `etc/hosts` with the given mtime,
/// and return its parsed catalogue.
fn archive_with_hosts(work: &Path, base: &str, mtime: u64) -> varc::Catalogue {
    let src = work.join(format!("src-{base}"));
    std::fs::create_dir_all(src.join("etc")).unwrap();
    std::fs::write(src.join("etc/hosts"), format!("hosts at {mtime}")).unwrap();
    pin_mtime(&src.join("etc/hosts"), mtime);

    let opts = CreateOptions::new(SliceConfig::new(work, base), CompressionAlgo::Gzip);
    archive::create(&ctx(), &opts, &src, None).unwrap();
    OpenArchive::open(&ctx(), SliceConfig::new(work, base), None)
        .unwrap()
        .catalogue
}

// S4 — restore consults the index and dispatches the configured restorer
// with `-x <path>/<basename>`, the stored options, then the path; absolute
// paths are refused as argument errors.
#[test]
fn restore_dispatch_targets_the_most_recent_provider() {
    let work = TempDir::new().unwrap();
    let cat1 = archive_with_hosts(work.path(), "base1", 1_704_000_000); // 2023-12-31
    let cat2 = archive_with_hosts(work.path(), "base2", 1_704_153_600); // 2024-01-02

    let log = work.path().join("argv.log");
    let restorer = work.path().join("fake-restorer");
    std::fs::write(
        &restorer,
        format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
    )
    .unwrap();
    std::fs::set_permissions(&restorer, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut db = Database::new();
    db.add_archive(&cat1, "/a", "base1").unwrap();
    db.add_archive(&cat2, "/b", "base2").unwrap();
    db.set_options(vec!["-R".into(), "/".into()]);
    db.set_restorer_path(restorer.to_str().unwrap());

    db.restore(&FixedAnswer(true), &["etc/hosts".into()]).unwrap();
    let logged = std::fs::read_to_string(&log).unwrap();
    assert_eq!(logged.trim(), "-x /b/base2 -R / etc/hosts");

    match db.restore(&FixedAnswer(true), &["/etc/hosts".into()]) {
        Err(ArchiveError::Range(_)) => {}
        other => panic!("absolute path must be refused, got {other:?}"),
    }
}

// S5 — permuting 1 and 3 reorders the slots and swaps the index roles;
// slot 2 is untouched.
#[test]
fn permutation_swaps_slots_and_index_roles() {
    let work = TempDir::new().unwrap();
    let db_file = work.path().join("base.db");

    let mut db = Database::new();
    for (i, base) in ["p1", "p2", "p3"].iter().enumerate() {
        let cat = archive_with_hosts(work.path(), base, 1_700_000_000 + i as u64);
        db.add_archive(&cat, &format!("/{base}"), base).unwrap();
    }
    db.save(&db_file, false).unwrap();

    db.permute(1, 3).unwrap();
    let names: Vec<&str> = db.slots().iter().map(|s| s.basename.as_str()).collect();
    assert_eq!(names, vec!["p3", "p2", "p1"]);

    // etc/hosts was provided by all three; the record that used to name
    // archive 1 now names 3 and vice versa, 2 untouched.
    let mut archives: Vec<u32> = db
        .versions_of("etc/hosts")
        .iter()
        .map(|r| r.archive)
        .collect();
    archives.sort_unstable();
    assert_eq!(archives, vec![1, 2, 3]);
    let v = db.versions_of("etc/hosts");
    let newest = v.iter().max_by_key(|r| r.timestamp).unwrap();
    // The newest version came from the old slot 3, now numbered 1.
    assert_eq!(newest.archive, 1);

    // Applying the same permutation again restores the original database.
    db.permute(1, 3).unwrap();
    let reloaded = Database::load(&db_file, &FixedAnswer(false)).unwrap();
    assert_eq!(db, reloaded);
}

// Numbers stay contiguous after removal, and the removed slot leaves no
// trace in the file index.
#[test]
fn removal_renumbers_and_cleans_the_index() {
    let work = TempDir::new().unwrap();
    let mut db = Database::new();
    for (i, base) in ["q1", "q2", "q3"].iter().enumerate() {
        let cat = archive_with_hosts(work.path(), base, 1_700_000_000 + i as u64);
        db.add_archive(&cat, &format!("/{base}"), base).unwrap();
    }

    db.remove_archive(2).unwrap();
    assert_eq!(db.slots().len(), 2);
    let archives: Vec<u32> = db.files_of(0).unwrap().iter().map(|(_, r)| r.archive).collect();
    assert!(archives.iter().all(|&a| a == 1 || a == 2));
    assert_eq!(db.versions_of("etc/hosts").len(), 2);
}
