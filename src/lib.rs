//! # VoxSeg
//!
//! A Rust inference engine for 3-D medical image segmentation bundles
//! backed by ONNX models. Resolves a bundle, assembles its declared
//! pipeline and runs volumetric inference over NIfTI scans.
//!
//! ## Features
//!
//! - Complete path from bundle reference to written segmentation masks
//! - Declarative pipeline configuration (YAML or JSON) with a component
//!   registry for transforms, inferers, networks and metrics
//! - Sliding window inference with constant or gaussian blending
//! - Compatibility shim reconciling configs written for older engine
//!   versions (argument remaps, transform-name aliases)
//! - Dice and 95th-percentile Hausdorff evaluation with CSV reports
//! - ONNX Runtime integration for fast inference
//!
//! ## Modules
//!
//! * [`core`] - Error handling, data records and device selection
//! * [`bundle`] - Bundle resolution, configuration and the compatibility shim
//! * [`transforms`] - The transform chain and component registry
//! * [`inference`] - Sessions, checkpoints and window inference
//! * [`pipeline`] - Assembly, prediction, batch running and metrics
//! * [`io`] - NIfTI reading and writing
//!
//! ## Quick Start
//!
//! ### Segmenting a directory of scans
//!
//! ```rust,no_run
//! use voxseg::prelude::*;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = RunOptions {
//!     bundle: "./bundles/spleen_ct".into(),
//!     input: Some("./scans".into()),
//!     output_dir: "./predictions".into(),
//!     labels_dir: Some("./labels".into()),
//!     ..RunOptions::default()
//! };
//! let summary = run_inference(&options)?;
//! println!("wrote {} predictions", summary.written.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Single volumes through a predictor
//!
//! ```rust,no_run
//! use voxseg::prelude::*;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let predictor = BundlePredictor::new(
//!     "./bundles/spleen_ct",
//!     &PredictorOptions::new().with_device("cpu"),
//! )?;
//! let prediction = predictor.predict_volume(Path::new("scan.nii.gz"))?;
//! save_output(&prediction.tensor, &prediction.meta, Path::new("scan_seg.nii.gz"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Declarative bundle configuration
//!
//! A bundle's `configs/inference.json` (or `.yaml`) names its components:
//!
//! ```json
//! {
//!   "network": {"type": "OnnxNetwork", "input_name": "image"},
//!   "preprocessing": [
//!     {"type": "LoadImaged", "keys": "image", "ensure_channel_first": true},
//!     {"type": "ScaleIntensityRanged", "keys": "image",
//!      "a_min": -57.0, "a_max": 164.0, "b_min": 0.0, "b_max": 1.0, "clip": true}
//!   ],
//!   "inferer": {"type": "SlidingWindowInferer", "roi_size": [96, 96, 96]},
//!   "postprocessing": [
//!     {"type": "Activationsd", "keys": "pred", "sigmoid": true},
//!     {"type": "AsDiscreted", "keys": "pred", "threshold": 0.5}
//!   ]
//! }
//! ```

// Core modules
pub mod bundle;
pub mod core;
pub mod inference;
pub mod io;
pub mod pipeline;
pub mod transforms;

/// Prelude module for convenient imports.
///
/// Bring the essentials into scope with a single use statement:
///
/// ```rust
/// use voxseg::prelude::*;
/// ```
///
/// Included items focus on the most common tasks:
/// - Batch inference (`RunOptions`, `run_inference`, `run_dice`)
/// - Single-volume prediction (`BundlePredictor`, `PredictorOptions`,
///   `Prediction`, `save_output`)
/// - Essential error and result types (`SegError`, `SegResult`)
/// - Volume loading (`load_volume`, `save_volume`)
///
/// For advanced customization (transform registry, compatibility shim,
/// window inference), import directly from the respective modules
/// (e.g., `voxseg::transforms`, `voxseg::bundle`, `voxseg::inference`).
pub mod prelude {
    // Batch running and evaluation (essential)
    pub use crate::pipeline::{
        run_dice, run_inference, BundlePredictor, DiceReport, Prediction, PredictorOptions,
        RunOptions, RunSummary,
    };

    // Single-volume output writing
    pub use crate::pipeline::save_output;

    // Error handling (essential)
    pub use crate::core::{SegError, SegResult};

    // Volume I/O (minimal)
    pub use crate::io::{load_volume, save_volume};
}
