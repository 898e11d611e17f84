use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use log::debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use txfile_core::{JournalConfig, JournalStatus, RecoveryJournal, TxConfig, TxFile, TxStream, Whence};

#[derive(Parser)]
#[command(name = "txfile")]
#[command(about = "Transactional file editing with crash recovery", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct JournalArgs {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Journal file path
    #[arg(long, requires = "sentinel")]
    journal: Option<PathBuf>,
    /// Sentinel file path
    #[arg(long, requires = "journal")]
    sentinel: Option<PathBuf>,
    /// Use <file>.journal and <file>.sentinel
    #[arg(long, conflicts_with_all = ["journal", "sentinel"])]
    beside: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a file's contents (replaying an interrupted commit first)
    Cat {
        file: PathBuf,
        #[command(flatten)]
        journal: JournalArgs,
    },
    /// Write bytes at an offset and commit them
    Write {
        file: PathBuf,
        /// Byte offset, at most the current file length
        #[arg(short, long)]
        offset: u64,
        /// Data to write
        #[arg(short, long)]
        data: String,
        /// Show the result without committing
        #[arg(long)]
        no_commit: bool,
        #[command(flatten)]
        journal: JournalArgs,
    },
    /// Replay an interrupted commit, if any
    Recover {
        file: PathBuf,
        #[command(flatten)]
        journal: JournalArgs,
    },
    /// Show the journal state without touching the data file
    Status {
        file: PathBuf,
        #[command(flatten)]
        journal: JournalArgs,
    },
}

fn build_config(file: &Path, args: &JournalArgs) -> anyhow::Result<TxConfig> {
    let mut config = match &args.config {
        Some(path) => TxConfig::from_json_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => TxConfig::default(),
    };

    if args.beside {
        config.journal = Some(JournalConfig::beside(file));
    } else if let (Some(journal), Some(sentinel)) = (&args.journal, &args.sentinel) {
        config.journal = Some(JournalConfig::new(journal, sentinel));
    }

    config.validate()?;
    Ok(config)
}

fn open(file: &Path, args: &JournalArgs) -> anyhow::Result<TxFile> {
    let config = build_config(file, args)?;
    let spec = file.to_string_lossy();
    TxFile::open(&spec, config).with_context(|| format!("opening {}", file.display()))
}

fn dump(file: &mut TxFile) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    TxStream::seek(file, 0, Whence::Set)?;
    while let Some(chunk) = TxStream::read(file, 64 * 1024)? {
        out.write_all(&chunk)?;
    }
    out.flush()?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Commands::Cat { file, journal } => {
            let mut handle = open(&file, &journal)?;
            dump(&mut handle)?;
            handle.close()?;
        }
        Commands::Write {
            file,
            offset,
            data,
            no_commit,
            journal,
        } => {
            let mut handle = open(&file, &journal)?;
            let offset = i64::try_from(offset).context("offset too large")?;
            TxStream::seek(&mut handle, offset, Whence::Set)?;
            let written = TxStream::write(&mut handle, data.as_bytes())?;

            let tx = handle.transaction();
            println!(
                "Buffered {} bytes at {} ({} pending block(s), length {} -> {})",
                written,
                offset,
                tx.pending_blocks().len(),
                tx.committed_len(),
                tx.logical_len()
            );

            if no_commit {
                dump(&mut handle)?;
                println!();
                println!("Not committed; discarding changes.");
            } else {
                handle.commit()?;
                println!("Committed to {}", file.display());
            }
            handle.close()?;
        }
        Commands::Recover { file, journal } => {
            let config = build_config(&file, &journal)?;
            if config.journal.is_none() {
                bail!("recover needs --journal/--sentinel, --beside or a config with a journal");
            }
            let handle = TxFile::open(&file.to_string_lossy(), config)
                .with_context(|| format!("recovering {}", file.display()))?;

            match handle.transaction().stats().recoveries {
                0 => println!("No interrupted commit for {}", file.display()),
                n => println!("Replayed {} interrupted commit(s) into {}", n, file.display()),
            }
        }
        Commands::Status { file, journal } => {
            let config = build_config(&file, &journal)?;
            let Some(journal_config) = config.journal else {
                bail!("status needs --journal/--sentinel, --beside or a config with a journal");
            };
            let journal = RecoveryJournal::new(&journal_config);

            println!("Journal:  {}", journal.journal_path().display());
            println!("Sentinel: {}", journal.sentinel_path().display());
            match journal.status() {
                JournalStatus::Idle => println!("State:    idle"),
                JournalStatus::StaleJournal => println!("State:    stale journal (commit already applied)"),
                JournalStatus::PendingReplay => {
                    println!("State:    interrupted commit, replay pending");
                    let blocks = journal.load()?;
                    debug!("Decoded {} journaled block(s)", blocks.len());
                    for block in blocks {
                        println!("  block at {:>10}  {} bytes", block.pos, block.len());
                    }
                }
            }
        }
    }

    Ok(())
}
