//! VoxSeg CLI - bundle inference and dice evaluation over NIfTI volumes.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxseg::pipeline::{run_dice, run_inference, RunOptions};

#[derive(Parser)]
#[command(name = "voxseg")]
#[command(version)]
#[command(about = "Bundle inference for 3-D medical image segmentation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment volumes with a bundle
    Infer {
        /// Bundle reference: a local directory, hf:org/name, or a hub URL
        #[arg(long, env = "VOXSEG_DEFAULT_BUNDLE")]
        bundle: String,

        /// A NIfTI file or a directory of NIfTI files
        #[arg(long)]
        input: Option<PathBuf>,

        /// Newline-delimited list of input files
        #[arg(long)]
        input_list: Option<PathBuf>,

        /// Directory predictions are written into
        #[arg(long)]
        output_dir: PathBuf,

        /// Execution device: cpu, cuda or cuda:N
        #[arg(long)]
        device: Option<String>,

        /// Write per-channel probabilities instead of masks
        #[arg(long)]
        save_probs: bool,

        /// Directory of reference labels; enables dice scoring
        #[arg(long)]
        labels_dir: Option<PathBuf>,

        /// Volume whose spatial frame the outputs adopt
        #[arg(long)]
        reference_image: Option<PathBuf>,

        /// Log per-item failures and keep going
        #[arg(long)]
        continue_on_error: bool,

        /// Explicit checkpoint path overriding the bundle's
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },

    /// Score written predictions against reference labels
    Dice {
        /// A prediction file or a directory of predictions
        #[arg(long)]
        preds: Option<PathBuf>,

        /// Newline-delimited list of prediction files
        #[arg(long)]
        preds_list: Option<PathBuf>,

        /// Directory of reference labels
        #[arg(long)]
        labels_dir: PathBuf,

        /// Where the CSV report is written
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match Cli::parse().command {
        Commands::Infer {
            bundle,
            input,
            input_list,
            output_dir,
            device,
            save_probs,
            labels_dir,
            reference_image,
            continue_on_error,
            checkpoint,
        } => {
            let options = RunOptions {
                bundle,
                input,
                input_list,
                output_dir,
                device,
                save_probs,
                labels_dir,
                reference_image,
                continue_on_error,
                checkpoint,
                script_factory: None,
            };
            let summary = run_inference(&options)?;
            info!(
                written = summary.written.len(),
                failed = summary.failed.len(),
                "inference finished"
            );
            if !summary.failed.is_empty() {
                warn!("some items failed; see the log above");
                anyhow::bail!(
                    "{} of {} items failed",
                    summary.failed.len(),
                    summary.written.len() + summary.failed.len()
                );
            }
        }
        Commands::Dice {
            preds,
            preds_list,
            labels_dir,
            output,
        } => {
            let report = run_dice(preds.as_deref(), preds_list.as_deref(), &labels_dir, &output)?;
            info!(cases = report.len(), "evaluation finished");
        }
    }
    Ok(())
}
