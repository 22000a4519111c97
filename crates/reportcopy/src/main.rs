//! reportcopy - Parallel report directory copy
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reportcopy::helper::CopyRequest;
use reportcopy::node::{LocalNode, SourceNode};
use reportcopy::publish::{copy_fanout, copy_sequential, ReportCopier};
use reportcopy::settings::{Settings, TransferSettings};
use reportcopy::NodeAgent;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reportcopy")]
#[command(about = "Copy report directories with parallel workers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to settings file
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy the matching files of a directory into a target directory
    Copy {
        /// Directory to copy from
        source: String,
        /// Directory to copy into
        target: String,
        /// Comma separated include patterns (default from settings)
        #[arg(short, long)]
        include: Option<String>,
        /// Comma separated exclude patterns
        #[arg(short, long)]
        exclude: Option<String>,
        /// Do not skip VCS metadata and editor backups
        #[arg(long)]
        no_default_excludes: bool,
        /// Number of copy workers, 0 copies on the calling thread
        #[arg(short, long)]
        workers: Option<usize>,
        /// Seconds each worker may take
        #[arg(short, long)]
        timeout: Option<u64>,
        /// Serve the source through a node agent and stream the files back
        #[arg(long, conflicts_with = "fanout")]
        remote: bool,
        /// Walk once and copy on several threads, without a session queue
        #[arg(long)]
        fanout: bool,
    },
    /// Print the effective settings
    Config,
    /// Write the default settings file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose)?;

    let settings_path = match &cli.config {
        Some(config) => PathBuf::from(shellexpand::tilde(config).to_string()),
        None => Settings::default_path(),
    };

    match cli.command {
        Commands::Copy {
            source,
            target,
            include,
            exclude,
            no_default_excludes,
            workers,
            timeout,
            remote,
            fanout,
        } => {
            let settings = Settings::load(&settings_path).context("Failed to load settings")?;
            let mut transfer = settings.transfer;
            if let Some(include) = include {
                transfer.includes = include;
            }
            if exclude.is_some() {
                transfer.excludes = exclude;
            }
            if no_default_excludes {
                transfer.default_excludes = false;
            }
            if let Some(workers) = workers {
                transfer.workers = workers;
            }
            if let Some(timeout) = timeout {
                transfer.timeout_secs = timeout;
            }

            let source = PathBuf::from(shellexpand::tilde(&source).to_string());
            let target = PathBuf::from(shellexpand::tilde(&target).to_string());
            run_copy(source, target, &transfer, remote, fanout)?;
        }
        Commands::Config => {
            let settings = Settings::load(&settings_path).context("Failed to load settings")?;
            println!("# {}", settings_path.display());
            print!("{}", settings.to_toml()?);
        }
        Commands::InitConfig { force } => {
            if settings_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to replace it",
                    settings_path.display()
                );
            }
            Settings::default().save(&settings_path)?;
            println!("Wrote {}", settings_path.display());
        }
    }

    Ok(())
}

fn run_copy(
    source: PathBuf,
    target: PathBuf,
    transfer: &TransferSettings,
    remote: bool,
    fanout: bool,
) -> Result<()> {
    let pattern = transfer.pattern();
    let started = Instant::now();

    let copied = if fanout {
        copy_fanout(&source, &pattern, &target, transfer.workers)?
    } else if transfer.workers == 0 && !remote {
        copy_sequential(&source, &pattern, &target)?
    } else {
        let request = CopyRequest {
            source_dir: source.clone(),
            pattern,
            target_dir: target.clone(),
            number_of_workers: transfer.workers,
            timeout: transfer.timeout(),
        };

        if remote {
            let (node, agent) =
                NodeAgent::spawn(LocalNode::new()).context("Failed to start node agent")?;
            let copied = copy_from(Arc::new(node), &request)?;
            agent.join();
            copied
        } else {
            copy_from(Arc::new(LocalNode::new()), &request)?
        }
    };

    info!(files = copied, "Done");
    println!(
        "Copied {} file(s) from {} to {} in {:.2?}",
        copied,
        source.display(),
        target.display(),
        started.elapsed()
    );
    Ok(())
}

fn copy_from(node: Arc<dyn SourceNode>, request: &CopyRequest) -> Result<u64> {
    let copier = ReportCopier::new(node, request.number_of_workers)
        .context("Failed to start workers")?;
    copier
        .copy(request)
        .with_context(|| format!("Failed to copy {}", request.source_dir.display()))
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("reportcopy=debug,warn")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("reportcopy=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
