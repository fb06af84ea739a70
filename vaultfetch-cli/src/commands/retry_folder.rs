//! Retry-folder command - repair the layout of an already-extracted run.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::Args;

use vaultfetch::pipeline::{run_retry_folder, PipelineOutcome, RetryFolderConfig};

use crate::error::CliError;

/// Arguments for the retry-folder command.
#[derive(Debug, Args)]
pub struct RetryFolderArgs {
    /// Target name; also names the directory under the download dir.
    pub target: String,

    /// Whether the target supports online play (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub online: bool,

    /// Whether DLC is included (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub dlc: bool,

    /// Version string of the release.
    pub version: String,

    /// Human-readable size hint.
    pub size_hint: String,

    /// Directory the target directory lives in.
    pub download_dir: PathBuf,

    /// Name of the wrapper directory to flatten into the target root.
    pub new_folder: String,

    /// Theme for toast notifications.
    #[arg(long = "notifyTheme", alias = "notify-theme")]
    pub notify_theme: Option<String>,
}

/// Run the retry-folder command.
pub fn run(args: RetryFolderArgs) -> Result<(), CliError> {
    tracing::info!(target = %args.target, folder = %args.new_folder, "repairing layout");

    let config = RetryFolderConfig {
        target: args.target,
        download_dir: args.download_dir,
        online: args.online,
        dlc: args.dlc,
        version: args.version,
        size_hint: args.size_hint,
        new_folder: args.new_folder,
        notify_theme: args.notify_theme,
    };

    match run_retry_folder(config)? {
        PipelineOutcome::Failed { message } => {
            tracing::error!(%message, "layout repair failed; descriptor updated");
        }
        _ => {
            tracing::info!("layout repair finished");
        }
    }
    Ok(())
}
