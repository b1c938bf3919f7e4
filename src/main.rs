use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use varc::archive::{self, CreateOptions, ExtractOptions, OperationContext, OverwritePolicy};
use varc::catalogue::diff::DiffPolicy;
use varc::catalogue::Entry;
use varc::cipher::CipherSpec;
use varc::error::{exit, ArchiveError, Result};
use varc::interact::TtyInteract;
use varc::mask::Mask;
use varc::slice::SliceConfig;
use varc::{CompressionAlgo, OpenArchive};

#[derive(Parser)]
#[command(name = "varc", version, about = "Sliced backup archives: create, list, extract, test, diff")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive a directory tree
    Create {
        /// Archive basename, optionally with a leading directory
        archive: String,
        /// Tree to archive
        #[arg(short = 'R', long, default_value = ".")]
        root: PathBuf,
        /// Compression: none, gzip, bzip2, xz
        #[arg(short = 'z', long, default_value = "gzip")]
        compression: String,
        /// Slice size in KiB (0 = single slice)
        #[arg(short, long, default_value = "0")]
        slice: u64,
        /// Minimum digits in slice numbers
        #[arg(long, default_value = "1")]
        min_digits: usize,
        /// Cipher: scramble or aes (needs --key)
        #[arg(long)]
        cipher: Option<String>,
        /// Cipher passphrase
        #[arg(short = 'K', long)]
        key: Option<String>,
        /// Reference archive basename for an incremental run
        #[arg(short = 'A', long)]
        reference: Option<String>,
        /// Restrict to these subtrees
        #[arg(short = 'g', long)]
        go_into: Vec<String>,
        /// Tolerated whole-hour mtime shift when diffing
        #[arg(long, default_value = "0")]
        hour_shift: u32,
        /// Files smaller than this many bytes are stored uncompressed
        #[arg(short = 'm', long, default_value = "100")]
        min_compress: u64,
        /// Command run after each slice is closed
        #[arg(short = 'E', long)]
        execute: Option<String>,
        /// Write a BLAKE3 companion next to each slice
        #[arg(long)]
        hash: bool,
        /// FIFO to stream the archive into when ARCHIVE is `-`
        #[arg(long, value_name = "FIFO")]
        pipe_out: Option<PathBuf>,
    },
    /// List the catalogue of an archive
    List {
        archive: String,
        #[arg(short = 'K', long)]
        key: Option<String>,
        #[arg(long)]
        cipher: Option<String>,
    },
    /// Restore entries from an archive
    Extract {
        archive: String,
        /// Restrict to these subtrees
        paths: Vec<String>,
        #[arg(short = 'R', long, default_value = ".")]
        root: PathBuf,
        /// Overwrite policy: overwrite, skip, ask, newer
        #[arg(short = 'w', long, default_value = "ask")]
        overwrite: String,
        /// Drop directories, restore everything into the root
        #[arg(long)]
        flat: bool,
        /// Restore ownership (needs privilege)
        #[arg(long)]
        ownership: bool,
        #[arg(short = 'K', long)]
        key: Option<String>,
        #[arg(long)]
        cipher: Option<String>,
    },
    /// Verify every stored payload against its checksum
    Test {
        archive: String,
        #[arg(short = 'K', long)]
        key: Option<String>,
        #[arg(long)]
        cipher: Option<String>,
    },
    /// Compare an archive against a filesystem tree
    Diff {
        archive: String,
        #[arg(short = 'R', long, default_value = ".")]
        root: PathBuf,
        #[arg(short = 'K', long)]
        key: Option<String>,
        #[arg(long)]
        cipher: Option<String>,
    },
}

fn main() {
    // Restorer-dispatch compatibility: `varc -x <archive> [args...]` is the
    // argv shape the database manager emits; rewrite it onto `extract`.
    let mut argv: Vec<String> = std::env::args().collect();
    if argv.get(1).map(String::as_str) == Some("-x") {
        argv[1] = "extract".to_string();
    }

    let cli = match Cli::try_parse_from(&argv) {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(exit::SYNTAX);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(exit::OK);
        }
    };

    match run(cli) {
        Ok(()) => {}
        Err(e) => {
            eprintln!("varc: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let ctx = OperationContext::new(Arc::new(TtyInteract), std::process::id() as u64);

    match cli.command {
        // ── Create ───────────────────────────────────────────────────────────
        Commands::Create {
            archive,
            root,
            compression,
            slice,
            min_digits,
            cipher,
            key,
            reference,
            go_into,
            hour_shift,
            min_compress,
            execute,
            hash,
            pipe_out,
        } => {
            let algo = CompressionAlgo::from_name(&compression).ok_or_else(|| {
                ArchiveError::Range(format!("unknown compression {compression:?}"))
            })?;
            let mut slices = slice_config(&archive)?;
            slices.slice_size = slice * 1024;
            slices.min_digits = min_digits;
            slices.between_slice_hook = execute;
            slices.hash_slices = hash;
            slices.pipe_output = pipe_out;

            let cipher_spec = cipher_spec(cipher.as_deref(), key.as_deref())?;
            let reference_cat = match &reference {
                Some(base) => Some(
                    OpenArchive::open(&ctx, slice_config(base)?, cipher_spec.as_ref())?.catalogue,
                ),
                None => None,
            };

            let mut opts = CreateOptions::new(slices, algo);
            opts.cipher = cipher_spec;
            opts.mask = Mask::any_of(&go_into);
            opts.diff = DiffPolicy { hour_shift };
            opts.min_compress_size = min_compress;
            opts.command_line = std::env::args().skip(1).collect::<Vec<_>>().join(" ");

            let stats = archive::create(&ctx, &opts, &root, reference_cat.as_ref())?;
            println!("Archive created: {archive}");
            println!("{stats}");
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { archive, key, cipher } => {
            let spec = cipher_spec(cipher.as_deref(), key.as_deref())?;
            let opened = OpenArchive::open(&ctx, slice_config(&archive)?, spec.as_ref())?;
            println!("Archive: {archive}");
            println!("  edition      {}", opened.header.edition_str());
            println!("  compression  {}", opened.header.algo.name());
            println!("  ciphered     {}", opened.header.is_ciphered());
            println!(
                "  created by   {}",
                String::from_utf8_lossy(&opened.header.command_line)
            );
            println!();
            println!("{:<5} {:>9} {:>6}:{:<6} {:>12}  {:<19}  Path", "Kind", "Perm", "uid", "gid", "Size", "Modified");
            opened.catalogue.for_each(&mut |path, entry| {
                let (size, mtime, perm, uid, gid) = entry
                    .with_inode(|inode| {
                        let size = match &inode.payload {
                            varc::catalogue::InodePayload::File(f) => f.size.to_string(),
                            _ => "-".to_string(),
                        };
                        (
                            size,
                            inode.common.mtime,
                            inode.common.perm,
                            inode.common.uid,
                            inode.common.gid,
                        )
                    })
                    .unwrap_or_else(|| match entry {
                        Entry::Directory(d) => (
                            d.subtree_size().to_string(),
                            d.common.mtime,
                            d.common.perm,
                            d.common.uid,
                            d.common.gid,
                        ),
                        _ => ("-".into(), 0, 0, 0, 0),
                    });
                let when = chrono::DateTime::from_timestamp(mtime as i64, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into());
                println!(
                    "{:<5} {:>9o} {:>6}:{:<6} {:>12}  {:<19}  {}",
                    entry.signature() as char,
                    perm,
                    uid,
                    gid,
                    size,
                    when,
                    path.display()
                );
                Ok(())
            })?;
            println!();
            println!("{}", opened.stats());
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { archive, paths, root, overwrite, flat, ownership, key, cipher } => {
            let spec = cipher_spec(cipher.as_deref(), key.as_deref())?;
            let mut opened = OpenArchive::open(&ctx, slice_config(&archive)?, spec.as_ref())?;
            let opts = ExtractOptions {
                mask: Mask::any_of(&paths),
                overwrite: parse_overwrite(&overwrite)?,
                flat,
                restore_ownership: ownership,
            };
            let stats = opened.extract(&ctx, &opts, &root)?;
            println!("Restored into {}", root.display());
            println!("{stats}");
            if stats.errors > 0 {
                return Err(ArchiveError::Data(format!(
                    "{} entries could not be restored cleanly",
                    stats.errors
                )));
            }
        }

        // ── Test ─────────────────────────────────────────────────────────────
        Commands::Test { archive, key, cipher } => {
            let spec = cipher_spec(cipher.as_deref(), key.as_deref())?;
            let mut opened = OpenArchive::open(&ctx, slice_config(&archive)?, spec.as_ref())?;
            let stats = opened.test(&ctx)?;
            println!("{stats}");
            if stats.errors > 0 {
                return Err(ArchiveError::Data(format!(
                    "{} entries failed verification",
                    stats.errors
                )));
            }
            println!("Archive is sound.");
        }

        // ── Diff ─────────────────────────────────────────────────────────────
        Commands::Diff { archive, root, key, cipher } => {
            let spec = cipher_spec(cipher.as_deref(), key.as_deref())?;
            let mut opened = OpenArchive::open(&ctx, slice_config(&archive)?, spec.as_ref())?;
            let stats = opened.diff_against(&ctx, &root)?;
            println!("{stats}");
            if stats.errors > 0 {
                return Err(ArchiveError::Data(format!(
                    "{} entries differ from the filesystem",
                    stats.errors
                )));
            }
            println!("No differences found.");
        }
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

/// Split `dir/base` into a slice configuration rooted at `dir`.
fn slice_config(archive: &str) -> Result<SliceConfig> {
    let p = Path::new(archive);
    let base = p
        .file_name()
        .ok_or_else(|| ArchiveError::Range(format!("bad archive basename {archive:?}")))?
        .to_string_lossy()
        .into_owned();
    let dir = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok(SliceConfig::new(dir, base))
}

fn cipher_spec(kind: Option<&str>, key: Option<&str>) -> Result<Option<CipherSpec>> {
    match (kind, key) {
        (None, None) => Ok(None),
        (Some(_), None) => Err(ArchiveError::Range("--cipher needs --key".into())),
        (None, Some(pass)) => Ok(Some(CipherSpec::Aes(pass.to_string()))),
        (Some("scramble"), Some(pass)) => Ok(Some(CipherSpec::Scramble(pass.to_string()))),
        (Some("aes"), Some(pass)) => Ok(Some(CipherSpec::Aes(pass.to_string()))),
        (Some(other), Some(_)) => {
            Err(ArchiveError::Range(format!("unknown cipher {other:?}")))
        }
    }
}

fn parse_overwrite(s: &str) -> Result<OverwritePolicy> {
    match s {
        "overwrite" => Ok(OverwritePolicy::Overwrite),
        "skip" => Ok(OverwritePolicy::Skip),
        "ask" => Ok(OverwritePolicy::Ask),
        "newer" => Ok(OverwritePolicy::NewerOnly),
        other => Err(ArchiveError::Range(format!(
            "unknown overwrite policy {other:?} (overwrite, skip, ask, newer)"
        ))),
    }
}
