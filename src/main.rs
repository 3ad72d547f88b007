//! archivist - A content-addressed archive index with duplicate detection.
//!
//! Usage:
//!   archivist init                     Initialize the archive in the current directory
//!   archivist add <SOURCE> <DEST>      Copy files into the archive and index them
//!   archivist scan [--continue]        Rebuild the index from the archive tree
//!   archivist verify                   Check every archived file against the index
//!   archivist status                   Show index statistics
//!   archivist duplicates               List groups of identical archived files
//!   archivist --help                   Show help

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, eyre};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use archivist_analyze::{
    DuplicateConfig, DuplicateFinder, PathIndexState, StatusReport, Verifier, VerifyConfig,
    offer_path_index,
};
use archivist_core::{ArchiveConfig, Identity};
use archivist_ops::{
    DuplicatePolicy, DuplicatePrompt, ExistingCopies, Ingest, IngestReport, IngestRequest,
    is_affirmative,
};
use archivist_scan::{Reconciler, ScanMode};
use archivist_store::{Archive, InitOutcome};

#[derive(Parser)]
#[command(
    name = "archivist",
    version,
    about = "A content-addressed archive index with duplicate detection",
    long_about = "archivist copies files into a managed archive directory, records a \
                  fingerprint for each one, warns about byte-identical duplicates and \
                  later verifies that archived files are still intact."
)]
struct Cli {
    /// Archive root (defaults to current directory)
    #[arg(short = 'C', long = "directory", global = true, default_value = ".")]
    directory: PathBuf,

    /// Use this store file instead of the one inside the archive
    #[arg(short = 'D', long = "database", global = true)]
    database: Option<PathBuf>,

    /// Number of hashing threads (0 = one per core)
    #[arg(long, global = true, default_value = "0")]
    threads: usize,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize an archive
    Init,

    /// Copy a file or directory into the archive
    Add {
        /// File, symlink or directory to add
        source: PathBuf,

        /// Subdirectory of the archive to place it in ("" for the root)
        destination: String,

        /// Never prompt; skip duplicates unless --accept-duplicates is given
        #[arg(short = 'n', long)]
        non_interactive: bool,

        /// Add duplicates without asking
        #[arg(long)]
        accept_duplicates: bool,

        /// Skip duplicates without asking
        #[arg(long)]
        skip_duplicates: bool,
    },

    /// Verify archived files against their recorded fingerprints
    Verify {
        /// Do not record verification time on healthy entries
        #[arg(long)]
        no_stamp: bool,
    },

    /// Index the archive tree
    Scan {
        /// Only index files not yet in the index
        #[arg(short = 'c', long = "continue", conflicts_with = "reset")]
        resume: bool,

        /// Discard the existing index and rebuild it
        #[arg(long)]
        reset: bool,
    },

    /// Show index statistics
    Status {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List groups of identical archived files
    Duplicates {
        /// Maximum number of duplicate groups to show
        #[arg(short = 'n', long, default_value = "20")]
        top: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// How a command ended when it did not fail outright.
enum Outcome {
    Clean,
    Issues,
    Interrupted,
}

impl From<Outcome> for ExitCode {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Clean => ExitCode::SUCCESS,
            Outcome::Issues => ExitCode::from(1),
            Outcome::Interrupted => ExitCode::from(130),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = archive_config(&cli)?;
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current step");
                cancel.cancel();
            }
        }
    });

    let outcome = match cli.command {
        Command::Init => run_init(config).await?,
        Command::Add {
            source,
            destination,
            non_interactive,
            accept_duplicates,
            skip_duplicates,
        } => {
            let non_interactive = non_interactive || !io::stdin().is_terminal();
            let policy =
                DuplicatePolicy::from_flags(skip_duplicates, accept_duplicates, non_interactive);
            run_add(config, IngestRequest::new(source, destination, policy), cancel).await?
        }
        Command::Verify { no_stamp } => run_verify(config, !no_stamp, cancel).await?,
        Command::Scan { resume, reset } => {
            let mode = match (resume, reset) {
                (true, _) => ScanMode::Resume,
                (false, true) => ScanMode::Reset,
                (false, false) => ScanMode::Rebuild,
            };
            run_scan(config, mode, cancel).await?
        }
        Command::Status { format } => run_status(config, format).await?,
        Command::Duplicates { top, format } => run_duplicates(config, top, format).await?,
    };

    Ok(outcome.into())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn archive_config(cli: &Cli) -> Result<ArchiveConfig> {
    let root = cli
        .directory
        .canonicalize()
        .wrap_err_with(|| format!("Invalid archive root: {}", cli.directory.display()))?;
    let store_path = cli
        .database
        .as_deref()
        .map(|path| {
            std::path::absolute(path)
                .wrap_err_with(|| format!("Invalid database path: {}", path.display()))
        })
        .transpose()?;

    ArchiveConfig::builder()
        .root(root)
        .store_path(store_path)
        .hash_threads(cli.threads)
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))
}

/// Run blocking engine work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .wrap_err("Worker task failed")?
}

/// Print progress snapshots to stderr while a command runs.
fn spawn_progress<T, R>(mut rx: broadcast::Receiver<T>, render: R) -> Option<JoinHandle<()>>
where
    T: Clone + Send + 'static,
    R: Fn(&T) -> String + Send + 'static,
{
    if !io::stderr().is_terminal() {
        return None;
    }
    Some(tokio::spawn(async move {
        let mut printed = false;
        loop {
            match rx.recv().await {
                Ok(progress) => {
                    eprint!("\r\x1b[2K{}", render(&progress));
                    printed = true;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        if printed {
            eprintln!();
        }
    }))
}

async fn finish_progress(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        let _ = handle.await;
    }
}

async fn run_init(config: ArchiveConfig) -> Result<Outcome> {
    let root = config.root.clone();
    let store_path = config.resolved_store_path();
    let outcome = blocking(move || {
        let (_, outcome) = Archive::init(config).wrap_err("Initialization failed")?;
        Ok(outcome)
    })
    .await?;

    match outcome {
        InitOutcome::Created => println!("Initialized archive at {}", root.display()),
        InitOutcome::AlreadyInitialized => {
            println!("Archive already initialized at {}", root.display())
        }
    }
    println!("Index: {}", store_path.display());
    Ok(Outcome::Clean)
}

async fn run_add(
    config: ArchiveConfig,
    request: IngestRequest,
    cancel: CancellationToken,
) -> Result<Outcome> {
    let report = blocking(move || {
        let mut archive = Archive::open(config)?;
        let ingest = Ingest::new().with_cancellation(cancel);
        let report = ingest
            .run(&mut archive, &request, &mut StdinPrompt)
            .wrap_err("Add failed")?;
        Ok(report)
    })
    .await?;

    print_add_report(&report);

    Ok(if report.interrupted {
        Outcome::Interrupted
    } else if report.errors.is_empty() {
        Outcome::Clean
    } else {
        Outcome::Issues
    })
}

fn print_add_report(report: &IngestReport) {
    for added in &report.added {
        println!("Added: {}", added.path);
        if let Some(existing) = &added.existing {
            print!("  Added as duplicate. {existing}");
        }
    }
    for skipped in &report.skipped {
        println!("Skipped duplicate: {}", skipped.source.display());
        print!("  {}", skipped.existing);
    }
    for excluded in &report.excluded {
        println!("Excluded: {}", excluded.display());
    }
    for error in &report.errors {
        println!("Error: {error}");
    }

    println!();
    println!(
        " {} added ({}), {} duplicate(s) skipped, {} error(s)",
        report.added.len(),
        format_size(report.bytes_added()),
        report.skipped.len(),
        report.errors.len()
    );
    if report.interrupted {
        println!(" Interrupted; files added so far are indexed.");
    }
}

/// Asks on the terminal whether to add a duplicate.
struct StdinPrompt;

impl DuplicatePrompt for StdinPrompt {
    fn confirm(
        &mut self,
        candidate: &Path,
        identity: &Identity,
        existing: &ExistingCopies,
    ) -> bool {
        println!();
        println!("Duplicate detected: {}", candidate.display());
        println!("  Size: {} ({} bytes)", format_size(identity.size), identity.size);
        println!("  Fingerprint: {}", identity.fingerprint);
        print!("{existing}");
        print!("Add anyway? [y/N] ");
        let _ = io::stdout().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_affirmative(&answer),
            Err(_) => false,
        }
    }
}

async fn run_verify(
    config: ArchiveConfig,
    stamp: bool,
    cancel: CancellationToken,
) -> Result<Outcome> {
    let verify_config = VerifyConfig::builder()
        .stamp(stamp)
        .threads(config.hash_threads)
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;
    let verifier = Verifier::with_config(verify_config).with_cancellation(cancel);
    let progress = spawn_progress(verifier.subscribe(), |p| {
        format!("Verifying {}/{} ({} issues)", p.checked, p.total, p.issues)
    });

    let report = blocking(move || {
        let archive = Archive::open(config)?;
        let report = verifier.run(&archive).wrap_err("Verification failed")?;
        Ok(report)
    })
    .await?;
    finish_progress(progress).await;

    for finding in &report.findings {
        println!("{finding}");
    }
    println!();
    println!(
        " Checked {} entries: {} healthy, {} issue(s)",
        report.checked,
        report.healthy,
        report.issue_count()
    );
    if report.stamp_failures > 0 {
        println!(
            " Could not record verification time for {} entries",
            report.stamp_failures
        );
    }

    Ok(if report.interrupted {
        Outcome::Interrupted
    } else if report.findings.is_empty() {
        Outcome::Clean
    } else {
        Outcome::Issues
    })
}

async fn run_scan(
    config: ArchiveConfig,
    mode: ScanMode,
    cancel: CancellationToken,
) -> Result<Outcome> {
    let reconciler = Reconciler::new().with_cancellation(cancel);
    let progress = spawn_progress(reconciler.subscribe(), |p| {
        format!(
            "Indexing {}/{} ({} known, {})",
            p.indexed + p.skipped,
            p.candidates,
            p.skipped,
            format_size(p.bytes_hashed)
        )
    });

    eprintln!("Scanning {}...", config.root.display());
    let report = blocking(move || {
        let mut archive = Archive::open_or_create(config)?;
        let report = reconciler.run(&mut archive, mode).wrap_err("Scan failed")?;
        Ok(report)
    })
    .await?;
    finish_progress(progress).await;

    for error in &report.errors {
        println!("Error: {error}");
    }
    println!(
        " Indexed {} files ({} already indexed) in {:.2}s, {} error(s)",
        report.indexed,
        report.skipped,
        report.duration.as_secs_f64(),
        report.errors.len()
    );

    Ok(if report.interrupted {
        println!(" Interrupted; run `archivist scan --continue` to finish.");
        Outcome::Interrupted
    } else if report.errors.is_empty() {
        Outcome::Clean
    } else {
        Outcome::Issues
    })
}

async fn run_status(config: ArchiveConfig, format: OutputFormat) -> Result<Outcome> {
    let interactive = matches!(format, OutputFormat::Text) && io::stdin().is_terminal();
    let (status, index_state) = blocking(move || {
        let archive = Archive::open(config)?;
        let index_state = if interactive {
            Some(offer_path_index(archive.store(), ask_create_path_index)?)
        } else {
            None
        };
        Ok((StatusReport::collect(&archive)?, index_state))
    })
    .await?;

    match format {
        OutputFormat::Text => {
            if index_state == Some(PathIndexState::Created) {
                println!("Created path index.");
            }
            println!();
            println!("{}", "─".repeat(60));
            println!(" {}", status.root.display());
            println!("{}", "─".repeat(60));
            println!(" Index:             {}", status.store_path.display());
            println!(" Files:             {}", status.counts.total_entries);
            println!(" Total size:        {}", format_size(status.counts.total_size));
            println!(" Duplicate groups:  {}", status.counts.duplicate_groups);
            println!(" Never verified:    {}", status.counts.unverified);
            if !status.path_index {
                println!(" Path index:        missing");
            }
            println!();
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(Outcome::Clean)
}

fn ask_create_path_index() -> bool {
    print!("The index has no path lookup table; create it now (faster scans)? [y/N] ");
    let _ = io::stdout().flush();
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).is_ok() && is_affirmative(&answer)
}

async fn run_duplicates(
    config: ArchiveConfig,
    top: usize,
    format: OutputFormat,
) -> Result<Outcome> {
    let finder_config = DuplicateConfig::builder()
        .max_groups(top)
        .build()
        .map_err(|e| eyre!("Invalid configuration: {e}"))?;

    let report = blocking(move || {
        let archive = Archive::open(config)?;
        let report =
            DuplicateFinder::with_config(finder_config).find_duplicates(archive.store())?;
        Ok(report)
    })
    .await?;

    match format {
        OutputFormat::Text => {
            println!();
            println!("{}", "─".repeat(70));
            println!(" Duplicate File Report");
            println!("{}", "─".repeat(70));
            println!();

            if !report.has_duplicates() {
                println!(" No duplicate files found.");
            } else {
                println!(
                    " Found {} duplicate groups ({} files)",
                    report.group_count, report.entries_with_duplicates
                );
                println!(" Total wasted space: {}", format_size(report.total_wasted_space));
                println!();

                for (i, group) in report.groups.iter().enumerate() {
                    println!(
                        " Group {} ({} files, {} each, {} wasted)",
                        i + 1,
                        group.count,
                        format_size(group.size),
                        format_size(group.wasted_bytes)
                    );
                    for path in &group.paths {
                        println!("   {path}");
                    }
                    println!();
                }
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(Outcome::Clean)
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}
