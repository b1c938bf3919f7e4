//! End-to-end archive scenarios: create on a real tree, reopen, verify,
//! restore, and survive deliberate corruption.

use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use varc::archive::{self, CreateOptions, ExtractOptions, OperationContext, OverwritePolicy};
use varc::catalogue::entry::{InodeCommon, InodePayload};
use varc::catalogue::{Entry, SavedStatus};
use varc::cipher::CipherSpec;
use varc::header::EDITION_CURRENT;
use varc::interact::FixedAnswer;
use varc::slice::SliceConfig;
use varc::{CompressionAlgo, OpenArchive};

fn ctx() -> OperationContext {
    OperationContext::new(Arc::new(FixedAnswer(true)), 7)
}

fn pin_times(path: &Path, mtime: u64, perm: u32) {
    let common = InodeCommon {
        uid: 0,
        gid: 0,
        perm,
        atime: mtime,
        mtime,
        ctime: 0,
        saved: SavedStatus::Saved,
        ea: None,
    };
    varc::fs_tree::apply_metadata(path, &common, false).unwrap();
}

fn slice_cfg(dir: &Path, base: &str) -> SliceConfig {
    SliceConfig::new(dir, base)
}

// S1 — a tiny archive round-trips data and metadata.
#[test]
fn tiny_archive_roundtrip() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("hello.txt"), b"hello\n").unwrap();
    pin_times(&src.join("hello.txt"), 1_700_000_000, 0o644);
    let source_uid = std::fs::metadata(src.join("hello.txt")).unwrap().uid();
    let source_gid = std::fs::metadata(src.join("hello.txt")).unwrap().gid();

    let opts = CreateOptions::new(slice_cfg(work.path(), "arc"), CompressionAlgo::None);
    let stats = archive::create(&ctx(), &opts, &src, None).unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(stats.saved, 1);
    assert!(work.path().join("arc.1.vrc").exists());

    let opened = OpenArchive::open(&ctx(), slice_cfg(work.path(), "arc"), None).unwrap();
    assert_eq!(opened.header.edition, EDITION_CURRENT);
    assert_eq!(opened.header.algo, CompressionAlgo::None);

    match opened.catalogue.lookup(Path::new("hello.txt")) {
        Some(Entry::Node { inode, .. }) => {
            assert_eq!(inode.common.saved, SavedStatus::Saved);
            assert_eq!(inode.common.mtime, 1_700_000_000);
            assert_eq!(inode.common.perm, 0o644);
            assert_eq!(inode.common.uid, source_uid);
            assert_eq!(inode.common.gid, source_gid);
            match &inode.payload {
                InodePayload::File(f) => {
                    assert_eq!(f.size.to_u64(), Some(6));
                    let crc = f.crc.as_ref().expect("payload checksum stored");
                    assert_eq!(crc.width(), 2);
                }
                other => panic!("expected a file payload, got {other:?}"),
            }
        }
        other => panic!("expected hello.txt in the catalogue, got {other:?}"),
    }

    let out = work.path().join("out");
    let mut opened = opened;
    let extract = ExtractOptions {
        overwrite: OverwritePolicy::Overwrite,
        ..ExtractOptions::default()
    };
    let stats = opened.extract(&ctx(), &extract, &out).unwrap();
    assert_eq!(stats.errors, 0);

    let restored = out.join("hello.txt");
    assert_eq!(std::fs::read(&restored).unwrap(), b"hello\n");
    let meta = std::fs::metadata(&restored).unwrap();
    assert_eq!(meta.mode() & 0o7777, 0o644);
    assert_eq!(meta.mtime(), 1_700_000_000);
}

// S2 — hard links survive: one payload, one star, two mirages, one inode
// again after restore.
#[test]
fn hard_links_are_preserved() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("a"), b"data").unwrap();
    std::fs::hard_link(src.join("a"), src.join("b")).unwrap();

    let opts = CreateOptions::new(slice_cfg(work.path(), "arc"), CompressionAlgo::Gzip);
    archive::create(&ctx(), &opts, &src, None).unwrap();

    let mut opened = OpenArchive::open(&ctx(), slice_cfg(work.path(), "arc"), None).unwrap();
    let a = opened.catalogue.lookup(Path::new("a")).unwrap();
    let b = opened.catalogue.lookup(Path::new("b")).unwrap();
    match (a, b) {
        (Entry::Mirage(ma), Entry::Mirage(mb)) => {
            assert!(ma.same_star(mb));
            assert_eq!(ma.etiquette(), mb.etiquette());
            assert_eq!(ma.ref_count(), 2);
        }
        other => panic!("expected two mirages, got {other:?}"),
    }
    let stats = opened.catalogue.stats();
    assert_eq!(stats.hard_links, 2);

    let out = work.path().join("out");
    let extract = ExtractOptions {
        overwrite: OverwritePolicy::Overwrite,
        ..ExtractOptions::default()
    };
    opened.extract(&ctx(), &extract, &out).unwrap();

    let ma = std::fs::metadata(out.join("a")).unwrap();
    let mb = std::fs::metadata(out.join("b")).unwrap();
    assert_eq!(std::fs::read(out.join("a")).unwrap(), b"data");
    assert_eq!((ma.dev(), ma.ino()), (mb.dev(), mb.ino()));
    assert_eq!(ma.nlink(), 2);
}

// S6 — a flipped byte in the catalogue region is a data error, while the
// header and the terminator still parse.
#[test]
fn corrupt_catalogue_is_detected_late() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("victim.txt"), b"soon to be unreadable").unwrap();

    let opts = CreateOptions::new(slice_cfg(work.path(), "arc"), CompressionAlgo::None);
    archive::create(&ctx(), &opts, &src, None).unwrap();

    // The catalogue sits between its recorded offset and the terminator;
    // ten bytes before the end is safely inside it.
    let slice_path = work.path().join("arc.1.vrc");
    let mut bytes = std::fs::read(&slice_path).unwrap();
    let at = bytes.len() - 10;
    bytes[at] ^= 0x40;
    std::fs::write(&slice_path, &bytes).unwrap();

    match OpenArchive::open(&ctx(), slice_cfg(work.path(), "arc"), None) {
        Err(varc::ArchiveError::Data(_)) => {}
        Err(other) => panic!("unexpected error kind: {other}"),
        Ok(_) => panic!("a corrupt catalogue parsed successfully"),
    }

    // Header and terminator are intact and readable on their own.
    let mut slices = varc::SliceSet::open(slice_cfg(work.path(), "arc"), None).unwrap();
    let header = varc::ArchiveHeader::read(&mut slices, &FixedAnswer(false)).unwrap();
    assert_eq!(header.algo, CompressionAlgo::None);
    let term = varc::Terminator::read(&mut slices).unwrap();
    assert!(!term.catalogue_start().is_zero());
}

// The whole stack at once: slices, cipher, xz, subdirectories, symlink.
#[test]
fn sliced_ciphered_archive_roundtrip() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir_all(src.join("nested/deeper")).unwrap();
    // Incompressible payload so the ciphered stream really spans slices.
    let mut state = 0x9E37_79B9u32;
    let blob: Vec<u8> = std::iter::repeat_with(|| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state.to_le_bytes()
    })
    .take(50_000)
    .flatten()
    .collect();
    std::fs::write(src.join("nested/blob.bin"), &blob).unwrap();
    std::fs::write(src.join("nested/deeper/note"), b"tiny").unwrap();
    std::os::unix::fs::symlink("blob.bin", src.join("nested/link")).unwrap();

    let mut cfg = slice_cfg(work.path(), "arc");
    cfg.slice_size = 64 * 1024;
    cfg.min_digits = 3;
    let mut opts = CreateOptions::new(cfg.clone(), CompressionAlgo::Xz);
    opts.cipher = Some(CipherSpec::Aes("s3cret".into()));
    archive::create(&ctx(), &opts, &src, None).unwrap();

    assert!(work.path().join("arc.001.vrc").exists());
    assert!(work.path().join("arc.002.vrc").exists());

    // No key refuses; the right key restores everything.
    match OpenArchive::open(&ctx(), cfg.clone(), None) {
        Err(varc::ArchiveError::Feature(_)) => {}
        Err(other) => panic!("unexpected error kind: {other}"),
        Ok(_) => panic!("a ciphered archive opened without a key"),
    }

    let spec = CipherSpec::Aes("s3cret".into());
    let mut opened = OpenArchive::open(&ctx(), cfg, Some(&spec)).unwrap();
    let test_stats = opened.test(&ctx()).unwrap();
    assert_eq!(test_stats.errors, 0);

    let out = work.path().join("out");
    let extract = ExtractOptions {
        overwrite: OverwritePolicy::Overwrite,
        ..ExtractOptions::default()
    };
    let stats = opened.extract(&ctx(), &extract, &out).unwrap();
    assert_eq!(stats.errors, 0);
    assert_eq!(std::fs::read(out.join("nested/blob.bin")).unwrap(), blob);
    assert_eq!(std::fs::read(out.join("nested/deeper/note")).unwrap(), b"tiny");
    assert_eq!(
        std::fs::read_link(out.join("nested/link")).unwrap(),
        Path::new("blob.bin")
    );
}

// Flat restore drops directories and resolves collisions by policy.
#[test]
fn flat_restore_skips_directories() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir_all(src.join("d1")).unwrap();
    std::fs::write(src.join("d1/file.txt"), b"flattened").unwrap();

    let opts = CreateOptions::new(slice_cfg(work.path(), "arc"), CompressionAlgo::Gzip);
    archive::create(&ctx(), &opts, &src, None).unwrap();

    let mut opened = OpenArchive::open(&ctx(), slice_cfg(work.path(), "arc"), None).unwrap();
    let out = work.path().join("flat");
    let extract = ExtractOptions {
        overwrite: OverwritePolicy::Overwrite,
        flat: true,
        ..ExtractOptions::default()
    };
    opened.extract(&ctx(), &extract, &out).unwrap();
    assert!(out.join("file.txt").exists());
    assert!(!out.join("d1").exists());
}

// The test pass flags a mangled payload as a data error and keeps going.
#[test]
fn test_pass_reports_payload_corruption() {
    let work = TempDir::new().unwrap();
    let src = work.path().join("in");
    std::fs::create_dir(&src).unwrap();
    // Two sizeable files, stored uncompressed so payload bytes sit verbatim
    // in the slice.
    std::fs::write(src.join("first.bin"), vec![0x11u8; 4096]).unwrap();
    std::fs::write(src.join("second.bin"), vec![0x22u8; 4096]).unwrap();

    let mut opts = CreateOptions::new(slice_cfg(work.path(), "arc"), CompressionAlgo::None);
    opts.min_compress_size = u64::MAX;
    archive::create(&ctx(), &opts, &src, None).unwrap();

    let slice_path = work.path().join("arc.1.vrc");
    let mut bytes = std::fs::read(&slice_path).unwrap();
    // Flip one byte inside the first payload region.
    let at = 200;
    bytes[at] ^= 0xff;
    std::fs::write(&slice_path, &bytes).unwrap();

    let mut opened = OpenArchive::open(&ctx(), slice_cfg(work.path(), "arc"), None).unwrap();
    let stats = opened.test(&ctx()).unwrap();
    assert_eq!(stats.errors, 1, "exactly one payload was mangled");
    assert_eq!(stats.files, 2, "the pass still visited everything");
}
