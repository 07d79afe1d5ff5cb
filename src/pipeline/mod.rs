//! The orchestration layer: assembling a bundle's declared pipeline,
//! predicting single volumes, batching over inputs and scoring results.

pub mod assembler;
pub mod metrics;
pub mod predictor;
pub mod report;
pub mod runner;

pub use assembler::{assemble, DeclarativePipeline, Pipeline};
pub use metrics::{dice_score, score_pair, DiceHelper, DICE_EPSILON};
pub use predictor::{save_output, BundlePredictor, Prediction, PredictorOptions};
pub use report::{DiceReport, MetricRecord, REPORT_FILE_NAME};
pub use runner::{run_dice, run_inference, RunOptions, RunSummary};

#[cfg(feature = "hausdorff")]
pub use metrics::hausdorff95;
