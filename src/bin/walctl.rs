//! vwal Control Binary
//!
//! Inspects and checkpoints vwal log files.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};
use vwal::backend::{FileBackend, WalMethods};
use vwal::vfs::{DbFile, OsFile, StorageFile};
use vwal::wal::{LogReader, LogRecovery};
use vwal::{CheckpointMode, Result, WalConfig};

/// vwal log tool
#[derive(Parser, Debug)]
#[command(name = "walctl")]
#[command(about = "Inspect and checkpoint vwal write-ahead logs")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the log header and recovery statistics
    Info {
        /// Path to the log file
        log: PathBuf,
    },

    /// List every valid frame in the log
    Dump {
        /// Path to the log file
        log: PathBuf,

        /// Only list commit frames
        #[arg(long)]
        commits_only: bool,
    },

    /// Copy committed frames into the database file
    Checkpoint {
        /// Path to the log file
        log: PathBuf,

        /// Path to the main database file
        #[arg(long)]
        db: PathBuf,

        /// passive, full, restart or truncate
        #[arg(long, default_value = "passive")]
        mode: CheckpointMode,
    },
}

fn main() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,vwal=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    let outcome = match args.command {
        Commands::Info { log } => info(&log),
        Commands::Dump { log, commits_only } => dump(&log, commits_only),
        Commands::Checkpoint { log, db, mode } => checkpoint(&log, &db, mode),
    };

    if let Err(e) = outcome {
        tracing::error!("walctl failed: {}", e);
        process::exit(1);
    }
}

fn open_log(path: &Path) -> Result<Arc<dyn StorageFile>> {
    Ok(Arc::new(OsFile::open(path)?))
}

fn info(path: &Path) -> Result<()> {
    let file = open_log(path)?;
    let reader = LogReader::open(Arc::clone(&file))?;
    let stats = LogRecovery::verify(&file)?;

    println!("log:             {}", path.display());
    println!("file size:       {} bytes", reader.file_len());
    match reader.header() {
        Some(header) => {
            println!("format version:  {}", header.version);
            println!("page size:       {}", header.page_size);
            println!("checkpoint seq:  {}", header.checkpoint_seq);
            println!("salt:            {:#018x}", header.salt);
        }
        None => println!("header:          (none, log is empty)"),
    }
    println!("committed frames: {}", stats.frames_recovered);
    println!("last commit:     {}", stats.last_commit);
    println!("db size:         {} pages", stats.db_size);
    if stats.was_truncated {
        println!(
            "uncommitted tail: {} frames (dropped on next open)",
            stats.frames_discarded
        );
    }
    Ok(())
}

fn dump(path: &Path, commits_only: bool) -> Result<()> {
    let reader = LogReader::open(open_log(path)?)?;
    println!("{:>8}  {:>8}  {:>8}  {:>10}", "frame", "page", "db_size", "crc32");
    for frame in reader.frames() {
        let frame = frame?;
        if commits_only && !frame.is_commit() {
            continue;
        }
        println!(
            "{:>8}  {:>8}  {:>8}  {:>#10x}",
            frame.frame_no,
            frame.page_no,
            frame.db_size,
            crc32fast::hash(&frame.data)
        );
    }
    Ok(())
}

fn checkpoint(log: &Path, db: &Path, mode: CheckpointMode) -> Result<()> {
    let db_file: Arc<dyn StorageFile> = Arc::new(OsFile::open(db)?);
    let db_writer = Arc::new(DbFile::new(db_file));

    let config = WalConfig::builder().checkpoint_on_close(false).build();
    let backend = FileBackend::new();
    let mut conn = backend.open_path(log, db_writer, config)?;

    let result = conn.checkpoint(mode, None)?;
    println!(
        "checkpoint ({}): {} frames in log, {} backfilled",
        mode, result.frames_in_log, result.frames_backfilled
    );
    conn.close()
}
