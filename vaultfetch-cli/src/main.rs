//! Vaultfetch CLI - single-shot download/extract/verify runs.
//!
//! Exit code contract: the process exits 0 whenever the pipeline ran,
//! regardless of download success (the caller reads the outcome from the
//! descriptor file). Only malformed arguments and fatal startup failures
//! exit non-zero, after invoking the crash reporter.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::download::DownloadArgs;
use commands::retry_folder::RetryFolderArgs;

#[derive(Debug, Parser)]
#[command(
    name = "vaultfetch",
    version = vaultfetch::VERSION,
    about = "Resumable, verified bulk-file downloader"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download, extract, and verify a target.
    Download(DownloadArgs),
    /// Flatten an already-extracted wrapper directory and finalize.
    RetryFolder(RetryFolderArgs),
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _guard = vaultfetch::logging::init(None);
            vaultfetch::external::report_crash(
                1,
                "invalid or missing arguments, please provide all required arguments",
            );
            let _ = e.print();
            std::process::exit(1);
        }
    };

    let _guard = vaultfetch::logging::init(log_dir().as_deref());

    let result = match cli.command {
        Commands::Download(args) => commands::download::run(args),
        Commands::RetryFolder(args) => commands::retry_folder::run(args),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "fatal startup failure");
        vaultfetch::external::report_crash(e.code(), &e.to_string());
        std::process::exit(1);
    }
}

/// Log directory under the platform data dir, created best-effort.
fn log_dir() -> Option<PathBuf> {
    let dir = dirs::data_local_dir()?.join("vaultfetch").join("logs");
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
