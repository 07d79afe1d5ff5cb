//! The capability seam for script-driven bundles.
//!
//! Some bundles ship their own inference object as a training script next
//! to `hyper_parameters.yaml` instead of declaring components. Running such
//! code is outside this crate; callers that can host it register a factory,
//! and the assembler hands it the bundle context with the same override set
//! the script's training harness would receive.

use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use thiserror::Error;

use crate::bundle::compat::CompatReport;
use crate::core::errors::SegResult;
use crate::core::record::MetaMap;

/// Where scripted bundles keep their inference entry point.
pub const SCRIPT_RELATIVE_PATH: &str = "scripts/segmenter.py";

/// True when `bundle_dir` carries a scripted inference entry point.
pub fn has_inference_script(bundle_dir: &Path) -> bool {
    bundle_dir.join(SCRIPT_RELATIVE_PATH).is_file()
}

/// Why a factory could not produce a segmenter.
///
/// Both kinds indicate engine drift between the bundle's script and the
/// runtime hosting it; the assembler reports them as compatibility
/// failures naming the supported range.
#[derive(Debug, Error)]
pub enum ScriptLoadError {
    /// The script itself would not load.
    #[error("script import failed: {0}")]
    Import(String),
    /// The script loaded but its entry point has an unexpected shape.
    #[error("script signature mismatch: {0}")]
    Signature(String),
}

/// Overrides handed to the scripted inference object.
#[derive(Debug, Clone)]
pub struct ScriptOverrides {
    /// Force the script's inference branch on.
    pub infer_enabled: bool,
    /// The bundle root the script should treat as its own.
    pub bundle_root: PathBuf,
    /// Checkpoint path, explicit or the bundle's conventional default.
    pub ckpt_path: PathBuf,
    /// Sibling data list, when one sits next to the bundle.
    pub data_list_file: Option<PathBuf>,
    /// Base directory for relative entries in the data list.
    pub data_file_base_dir: PathBuf,
}

impl ScriptOverrides {
    /// The override set for `bundle_dir`, mirroring what the bundle's own
    /// training harness passes: inference on, checkpoint defaulting to
    /// `<bundle>/model`, and the bundle's parent as the data root (with a
    /// sibling `dataset.json` when present).
    pub fn for_bundle(bundle_dir: &Path, checkpoint: Option<&Path>) -> Self {
        let parent = bundle_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| bundle_dir.to_path_buf());
        let dataset = parent.join("dataset.json");
        Self {
            infer_enabled: true,
            bundle_root: bundle_dir.to_path_buf(),
            ckpt_path: checkpoint
                .map(Path::to_path_buf)
                .unwrap_or_else(|| bundle_dir.join("model")),
            data_list_file: dataset.is_file().then_some(dataset),
            data_file_base_dir: parent,
        }
    }
}

/// Everything a factory needs to load one bundle's scripted segmenter.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    pub bundle_dir: PathBuf,
    pub script: PathBuf,
    pub config_file: PathBuf,
    pub overrides: ScriptOverrides,
    pub compat: CompatReport,
}

/// A loaded scripted inference object.
pub trait ScriptedSegmenter: Send + Sync + std::fmt::Debug {
    /// Segments one volume, returning the prediction and its metadata
    /// (empty when the script exposes none).
    fn infer(&self, image: &Path) -> SegResult<(ArrayD<f32>, MetaMap)>;
}

/// Loads scripted segmenters on behalf of the pipeline assembler.
pub trait ScriptedSegmenterFactory: Send + Sync {
    fn load(&self, context: &ScriptContext) -> Result<Box<dyn ScriptedSegmenter>, ScriptLoadError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_default_the_checkpoint_and_data_root() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("segresnet");
        std::fs::create_dir_all(&bundle).unwrap();

        let overrides = ScriptOverrides::for_bundle(&bundle, None);
        assert!(overrides.infer_enabled);
        assert_eq!(overrides.bundle_root, bundle);
        assert_eq!(overrides.ckpt_path, bundle.join("model"));
        assert_eq!(overrides.data_list_file, None);
        assert_eq!(overrides.data_file_base_dir, dir.path());
    }

    #[test]
    fn a_sibling_dataset_list_is_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("segresnet");
        std::fs::create_dir_all(&bundle).unwrap();
        std::fs::write(dir.path().join("dataset.json"), b"{}").unwrap();

        let overrides =
            ScriptOverrides::for_bundle(&bundle, Some(Path::new("/tmp/weights.onnx")));
        assert_eq!(
            overrides.data_list_file.as_deref(),
            Some(dir.path().join("dataset.json").as_path())
        );
        assert_eq!(overrides.ckpt_path, Path::new("/tmp/weights.onnx"));
    }

    #[test]
    fn script_detection_requires_the_exact_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_inference_script(dir.path()));
        let scripts = dir.path().join("scripts");
        std::fs::create_dir_all(&scripts).unwrap();
        std::fs::write(scripts.join("segmenter.py"), b"class Segmenter: ...").unwrap();
        assert!(has_inference_script(dir.path()));
    }
}
