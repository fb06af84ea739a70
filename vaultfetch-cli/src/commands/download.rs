//! Download command - run the full acquisition pipeline for one target.

use std::path::PathBuf;

use clap::builder::BoolishValueParser;
use clap::Args;

use vaultfetch::config::Settings;
use vaultfetch::pipeline::{Pipeline, PipelineConfig, PipelineOutcome};

use crate::error::CliError;

/// Arguments for the download command.
///
/// The positional order is a contract with the launcher that spawns this
/// process; do not reorder.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// URL of the file to download.
    pub url: String,

    /// Target name; also names the directory under the download dir.
    pub target: String,

    /// Whether the target supports online play (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub online: bool,

    /// Whether DLC is included (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub dlc: bool,

    /// Whether the target is a VR title (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub is_vr: bool,

    /// Whether this run updates a previous install (true/false).
    #[arg(action = clap::ArgAction::Set, value_parser = BoolishValueParser::new())]
    pub update_flow: bool,

    /// Version string of the release.
    pub version: String,

    /// Human-readable size hint (e.g. "12 GB").
    pub size_hint: String,

    /// Directory the target directory is created in.
    pub download_dir: PathBuf,

    /// Optional external catalog ID.
    pub catalog_id: Option<String>,

    /// Theme for toast notifications; notifications are off without it.
    #[arg(long = "notifyTheme", alias = "notify-theme")]
    pub notify_theme: Option<String>,

    /// Cookie attached to every request (alternate provider path).
    #[arg(long)]
    pub cookie: Option<String>,
}

/// Run the download command. Returns Ok for every pipeline outcome; the
/// descriptor carries success or failure to the caller.
pub fn run(args: DownloadArgs) -> Result<(), CliError> {
    let settings = Settings::load();
    tracing::info!(
        target = %args.target,
        update = args.update_flow,
        "starting download pipeline"
    );

    let config = PipelineConfig {
        url: args.url,
        target: args.target,
        download_dir: args.download_dir,
        online: args.online,
        dlc: args.dlc,
        is_vr: args.is_vr,
        update_flow: args.update_flow,
        version: args.version,
        size_hint: args.size_hint,
        catalog_id: args.catalog_id,
        notify_theme: args.notify_theme,
        cookie: args.cookie,
        settings,
    };

    let pipeline = Pipeline::new(config)?;
    match pipeline.run() {
        PipelineOutcome::Completed => {
            tracing::info!("download pipeline finished");
        }
        PipelineOutcome::CompletedWithWarnings { verify_failures } => {
            tracing::warn!(verify_failures, "pipeline finished with verification warnings");
        }
        PipelineOutcome::Failed { message } => {
            tracing::error!(%message, "pipeline failed; descriptor updated");
        }
    }
    Ok(())
}
