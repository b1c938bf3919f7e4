//! varcm — the database manager.
//!
//! One action per invocation, selected by a short flag; `-o` and `-r` stop
//! option parsing and take the rest of the command line verbatim, so
//! restorer options can themselves start with dashes.

use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use varc::archive::OperationContext;
use varc::database::Database;
use varc::error::{exit, ArchiveError, Result};
use varc::interact::{Interact, TtyInteract};
use varc::OpenArchive;

#[derive(Parser)]
#[command(
    name = "varcm",
    version,
    about = "Track archives in a database and drive cross-archive restores",
    after_help = "Exactly one action is required per run.\n\
                  -o and -r consume the remainder of the command line."
)]
struct Cli {
    /// Create an empty database at PATH
    #[arg(short = 'C', value_name = "PATH")]
    create: Option<String>,

    /// Database to operate on (required by every action but -C)
    #[arg(short = 'B', value_name = "PATH")]
    base: Option<String>,

    /// Add ARCHIVE (optionally recorded under a different basename)
    #[arg(short = 'A', value_name = "ARCHIVE", num_args = 1..=2)]
    add: Vec<String>,

    /// List the archive slots
    #[arg(short = 'l')]
    list: bool,

    /// Delete slot NUM (higher slots move down one number)
    #[arg(short = 'D', value_name = "NUM")]
    delete: Option<u32>,

    /// Replace the basename of a slot
    #[arg(short = 'b', num_args = 2, value_names = ["NUM", "NAME"])]
    chbase: Vec<String>,

    /// Replace the path of a slot
    #[arg(short = 'p', num_args = 2, value_names = ["NUM", "PATH"])]
    chpath: Vec<String>,

    /// Set the restorer command path
    #[arg(short = 'd', value_name = "PATH")]
    restorer: Option<String>,

    /// List the files slot NUM provides (0 lists every record)
    #[arg(short = 'u', value_name = "NUM")]
    used: Option<u32>,

    /// List the archives holding a version of PATH
    #[arg(short = 'f', value_name = "PATH")]
    file: Option<String>,

    /// Per-slot count of most-recent provisions
    #[arg(short = 's')]
    stats: bool,

    /// Exchange slots A and B
    #[arg(short = 'm', num_args = 2, value_names = ["A", "B"])]
    permute: Vec<String>,
}

enum Action {
    Create(String),
    Add { archive: String, fake: Option<String> },
    List,
    Delete(u32),
    ChangeBase(u32, String),
    ChangePath(u32, String),
    SetOptions(Vec<String>),
    SetRestorer(String),
    Restore(Vec<String>),
    Used(u32),
    Versions(String),
    Stats,
    Permute(u32, u32),
}

fn main() {
    match run() {
        Ok(()) => {}
        Err(e) => {
            eprintln!("varcm: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn run() -> Result<()> {
    let mut argv: Vec<String> = std::env::args().collect();

    // -o and -r swallow everything after them, getopt-style.
    let mut tail_action = None;
    if let Some(at) = argv.iter().position(|a| a == "-o" || a == "-r") {
        let rest: Vec<String> = argv.drain(at + 1..).collect();
        let flag = argv.pop().expect("the flag itself");
        tail_action = Some(if flag == "-o" {
            Action::SetOptions(rest)
        } else {
            Action::Restore(rest)
        });
    }

    let cli = match Cli::try_parse_from(&argv) {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(exit::SYNTAX);
        }
        Err(e) => {
            // Help or version banner.
            let _ = e.print();
            std::process::exit(exit::OK);
        }
    };

    let mut actions: Vec<Action> = Vec::new();
    if let Some(a) = tail_action {
        actions.push(a);
    }
    if let Some(p) = cli.create {
        actions.push(Action::Create(p));
    }
    if !cli.add.is_empty() {
        actions.push(Action::Add {
            archive: cli.add[0].clone(),
            fake: cli.add.get(1).cloned(),
        });
    }
    if cli.list {
        actions.push(Action::List);
    }
    if let Some(n) = cli.delete {
        actions.push(Action::Delete(n));
    }
    if !cli.chbase.is_empty() {
        actions.push(Action::ChangeBase(parse_num(&cli.chbase[0])?, cli.chbase[1].clone()));
    }
    if !cli.chpath.is_empty() {
        actions.push(Action::ChangePath(parse_num(&cli.chpath[0])?, cli.chpath[1].clone()));
    }
    if let Some(p) = cli.restorer {
        actions.push(Action::SetRestorer(p));
    }
    if let Some(n) = cli.used {
        actions.push(Action::Used(n));
    }
    if let Some(p) = cli.file {
        actions.push(Action::Versions(p));
    }
    if cli.stats {
        actions.push(Action::Stats);
    }
    if !cli.permute.is_empty() {
        actions.push(Action::Permute(parse_num(&cli.permute[0])?, parse_num(&cli.permute[1])?));
    }

    if actions.len() != 1 {
        eprintln!("varcm: exactly one action is required (see varcm -h)");
        std::process::exit(exit::SYNTAX);
    }
    let action = actions.pop().expect("length checked");

    // Restore arguments must stay relative; this is a command-line error,
    // not an operational one.
    if let Action::Restore(paths) = &action {
        if paths.iter().any(|p| p.starts_with('/')) {
            eprintln!("varcm: arguments to -r must be relative paths (never begin with '/')");
            std::process::exit(exit::SYNTAX);
        }
    }

    let ui: Arc<dyn Interact> = Arc::new(TtyInteract);

    if let Action::Create(path) = &action {
        let db = Database::new();
        db.save(Path::new(path), false)?;
        return Ok(());
    }

    let base = match &cli.base {
        Some(b) => b.clone(),
        None => {
            eprintln!("varcm: no database specified (-B), aborting");
            std::process::exit(exit::SYNTAX);
        }
    };
    let base = Path::new(&base);
    let mut db = Database::load(base, ui.as_ref())?;

    match action {
        Action::Create(_) => unreachable!("handled above"),
        Action::Add { archive, fake } => {
            let ctx = OperationContext::new(ui.clone(), std::process::id() as u64);
            // The slots may record the archive under a different location
            // than the one it was read from (the optional second argument).
            let recorded = fake.as_deref().unwrap_or(&archive);
            let (rec_dir, rec_base) = split_base(recorded)?;
            let (arc_dir, arc_base) = split_base(&archive)?;
            let opened =
                OpenArchive::open(&ctx, varc::SliceConfig::new(arc_dir, arc_base), None)?;
            db.add_archive(&opened.catalogue, &rec_dir.to_string_lossy(), &rec_base)?;
            db.save(base, true)?;
        }
        Action::List => {
            println!("{:>4}  {:<24}  Basename", "Num", "Path");
            for (i, slot) in db.slots().iter().enumerate() {
                println!("{:>4}  {:<24}  {}", i + 1, slot.path, slot.basename);
            }
            if let Some(p) = db.restorer_path() {
                println!("restorer command: {p}");
            }
            if !db.options().is_empty() {
                println!("restorer options: {}", db.options().join(" "));
            }
        }
        Action::Delete(num) => {
            db.remove_archive(num)?;
            db.save(base, true)?;
        }
        Action::ChangeBase(num, name) => {
            db.change_name(num, &name)?;
            db.save(base, true)?;
        }
        Action::ChangePath(num, path) => {
            db.set_path(num, &path)?;
            db.save(base, true)?;
        }
        Action::SetOptions(opts) => {
            db.set_options(opts);
            db.save(base, true)?;
        }
        Action::SetRestorer(path) => {
            db.set_restorer_path(&path);
            db.save(base, true)?;
        }
        Action::Restore(paths) => {
            db.restore(ui.as_ref(), &paths)?;
        }
        Action::Used(num) => {
            for (path, record) in db.files_of(num)? {
                println!(
                    "{:>4}  {}  {}  {}",
                    record.archive,
                    format_when(record.timestamp),
                    if record.present { "present" } else { "deleted" },
                    path
                );
            }
        }
        Action::Versions(path) => {
            let records = db.versions_of(&path);
            if records.is_empty() {
                ui.warn(&format!("{path}: not found in any archive"));
            }
            for record in records {
                let slot = &db.slots()[record.archive as usize - 1];
                println!(
                    "{:>4}  {}  {}  {}/{}",
                    record.archive,
                    format_when(record.timestamp),
                    if record.present { "present" } else { "deleted" },
                    slot.path,
                    slot.basename
                );
            }
        }
        Action::Stats => {
            for (i, count) in db.most_recent_stats().iter().enumerate() {
                let slot = &db.slots()[i];
                println!("{:>4}  {:>8} most-recent entries  {}/{}", i + 1, count, slot.path, slot.basename);
            }
        }
        Action::Permute(a, b) => {
            db.permute(a, b)?;
            db.save(base, true)?;
        }
    }
    Ok(())
}

fn parse_num(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| ArchiveError::Range(format!("{s:?} is not an archive number")))
}

fn split_base(archive: &str) -> Result<(std::path::PathBuf, String)> {
    let p = Path::new(archive);
    let base = p
        .file_name()
        .ok_or_else(|| ArchiveError::Range(format!("bad archive basename {archive:?}")))?
        .to_string_lossy()
        .into_owned();
    let dir = match p.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => std::path::PathBuf::from("."),
    };
    Ok((dir, base))
}

fn format_when(ts: u64) -> String {
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".into())
}
