//! Bundle predictor: a resolved, loaded pipeline applied to volumes.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{ArrayD, Axis, Ix5};
use tracing::{debug, info};

use crate::bundle::config::BundleConfig;
use crate::bundle::resolver;
use crate::core::errors::{SegError, SegResult};
use crate::core::record::{meta_key, Affine, DataRecord, MetaMap, RecordValue};
use crate::inference::scripted::ScriptedSegmenterFactory;
use crate::io;
use crate::pipeline::assembler::{self, DeclarativePipeline, Pipeline};
use crate::transforms::{Compose, LoadImage, Transform};

/// A prediction tensor together with the metadata the chain attached.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub tensor: ArrayD<f32>,
    pub meta: MetaMap,
}

/// Knobs fixed at predictor construction.
#[derive(Default, Clone)]
pub struct PredictorOptions {
    pub device: Option<String>,
    pub checkpoint: Option<PathBuf>,
    pub script_factory: Option<Arc<dyn ScriptedSegmenterFactory>>,
}

impl PredictorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_checkpoint(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.checkpoint = Some(checkpoint.into());
        self
    }

    pub fn with_script_factory(mut self, factory: Arc<dyn ScriptedSegmenterFactory>) -> Self {
        self.script_factory = Some(factory);
        self
    }
}

impl fmt::Debug for PredictorOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorOptions")
            .field("device", &self.device)
            .field("checkpoint", &self.checkpoint)
            .field(
                "script_factory",
                &self.script_factory.as_ref().map(|_| "<registered>"),
            )
            .finish()
    }
}

/// A bundle resolved, configured and loaded, ready to segment volumes.
#[derive(Debug)]
pub struct BundlePredictor {
    bundle_dir: PathBuf,
    pipeline: Pipeline,
}

impl BundlePredictor {
    /// Resolves `bundle_ref` (local directory, repo id or hub URL), loads
    /// its configuration and assembles the pipeline.
    pub fn new(bundle_ref: &str, options: &PredictorOptions) -> SegResult<Self> {
        let bundle_dir = resolver::resolve_bundle_dir(bundle_ref)?;
        let config = BundleConfig::load(&bundle_dir)?;
        info!(
            bundle = %bundle_dir.display(),
            config = %config.kind,
            "loaded bundle configuration"
        );
        let pipeline = assembler::assemble(
            &bundle_dir,
            &config,
            options.device.as_deref(),
            options.checkpoint.as_deref(),
            options.script_factory.as_deref(),
        )?;
        Ok(Self {
            bundle_dir,
            pipeline,
        })
    }

    pub fn bundle_dir(&self) -> &Path {
        &self.bundle_dir
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Metric settings the bundle declared, when it declared any.
    pub fn metric(&self) -> Option<&crate::pipeline::metrics::DiceHelper> {
        match &self.pipeline {
            Pipeline::Declarative(pipeline) => pipeline.metric.as_ref(),
            Pipeline::Scripted(_) => None,
        }
    }

    /// Segments one volume and returns the prediction with its metadata.
    pub fn predict_volume(&self, image: &Path) -> SegResult<Prediction> {
        match &self.pipeline {
            Pipeline::Scripted(segmenter) => {
                let (tensor, meta) = segmenter.infer(image)?;
                Ok(Prediction { tensor, meta })
            }
            Pipeline::Declarative(pipeline) => predict_declarative(pipeline, image),
        }
    }
}

fn predict_declarative(pipeline: &DeclarativePipeline, image: &Path) -> SegResult<Prediction> {
    let record = match &pipeline.preprocessing {
        Some(chain) => run_preprocessing(chain, image)?,
        None => DataRecord::from_image_path(image),
    };
    let mut record = ensure_image_tensor(record)?;

    let input = record.require_tensor("predict", "image")?;
    let batched = batch_input(input)?;
    let output = pipeline.inferer.infer(&batched, &pipeline.network)?;
    let pred = output.index_axis(Axis(0), 0).to_owned().into_dyn();

    record.insert_tensor("pred", pred);
    if let Some(meta) = record.meta(&meta_key("image")).cloned() {
        record.insert_meta(meta_key("pred"), meta);
    }

    let mut record = match &pipeline.postprocessing {
        Some(chain) => run_postprocessing(chain, record, image)?,
        None => record,
    };

    let tensor = match record.remove("pred") {
        Some(RecordValue::Tensor(tensor)) => tensor,
        _ => {
            return Err(SegError::invalid_input(
                "postprocessing did not leave a prediction tensor behind",
            ))
        }
    };
    let meta = record.meta(&meta_key("pred")).cloned().unwrap_or_default();
    Ok(Prediction { tensor, meta })
}

/// Runs the preprocessing chain. A step reporting a missing `label` key is
/// retried once on a fresh record that carries the image path under both
/// keys; any other failure propagates.
fn run_preprocessing(chain: &Compose, image: &Path) -> SegResult<DataRecord> {
    match chain.apply(DataRecord::from_image_path(image)) {
        Ok(record) => Ok(record),
        Err(err) if err.missing_record_key() == Some("label") => {
            debug!("preprocessing expects a label; retrying with the image path");
            let mut record = DataRecord::from_image_path(image);
            record.insert_path("label", image);
            chain.apply(record)
        }
        Err(err) => Err(err),
    }
}

/// Runs the postprocessing chain with the same one-shot missing-label
/// retry, supplying `label` from the record or falling back to the image
/// path.
fn run_postprocessing(
    chain: &Compose,
    record: DataRecord,
    image: &Path,
) -> SegResult<DataRecord> {
    let fallback = record.clone();
    match chain.apply(record) {
        Ok(record) => Ok(record),
        Err(err) if err.missing_record_key() == Some("label") => {
            debug!("postprocessing expects a label; retrying with one supplied");
            let mut record = fallback;
            if !record.contains("label") {
                record.insert_path("label", image);
            }
            chain.apply(record)
        }
        Err(err) => Err(err),
    }
}

/// Guarantees the record holds an image tensor, loading from the recorded
/// path when the preprocessing chain did not include a loading step.
fn ensure_image_tensor(record: DataRecord) -> SegResult<DataRecord> {
    if record.tensor("image").is_some() {
        return Ok(record);
    }
    debug!("no loading step in the chain; reading the image volume directly");
    LoadImage::new(vec!["image".into()]).apply(record)
}

/// Adds the axes a batched forward expects: volumes gain channel and batch
/// axes, channel-first tensors gain the batch axis.
fn batch_input(input: &ArrayD<f32>) -> SegResult<ndarray::Array5<f32>> {
    let batched = match input.ndim() {
        3 => input
            .clone()
            .insert_axis(Axis(0))
            .insert_axis(Axis(0)),
        4 => input.clone().insert_axis(Axis(0)),
        other => {
            return Err(SegError::invalid_input(format!(
                "expected a 3-D volume or a channel-first 4-D tensor, got {other} dims"
            )))
        }
    };
    batched.into_dimensionality::<Ix5>().map_err(SegError::Tensor)
}

/// Writes a prediction to `path`, picking the spatial frame from the
/// metadata by priority: `affine`, `original_affine`, `qform`, `sform`,
/// else identity.
pub fn save_output(pred: &ArrayD<f32>, meta: &MetaMap, path: &Path) -> SegResult<()> {
    let affine = output_affine(meta);
    io::save_volume(path, pred, &affine, None)
}

fn output_affine(meta: &MetaMap) -> Affine {
    for key in ["affine", "original_affine", "qform", "sform"] {
        if let Some(affine) = meta.get(key).and_then(|value| value.as_affine()) {
            return *affine;
        }
    }
    Affine::identity()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::MetaValue;
    use ndarray::ArrayD;

    #[derive(Debug)]
    struct NeedsLabel;

    impl Transform for NeedsLabel {
        fn name(&self) -> &'static str {
            "NeedsLabel"
        }

        fn apply(&self, record: DataRecord) -> SegResult<DataRecord> {
            if !record.contains("label") {
                return Err(SegError::missing_key("NeedsLabel", "label"));
            }
            Ok(record)
        }
    }

    #[derive(Debug)]
    struct NeedsImage;

    impl Transform for NeedsImage {
        fn name(&self) -> &'static str {
            "NeedsImage"
        }

        fn apply(&self, record: DataRecord) -> SegResult<DataRecord> {
            if !record.contains("image") {
                return Err(SegError::missing_key("NeedsImage", "image"));
            }
            Ok(record)
        }
    }

    #[test]
    fn preprocessing_retries_once_with_a_label_path() {
        let chain = Compose::new(vec![Box::new(NeedsLabel)]);
        let record = run_preprocessing(&chain, Path::new("/data/case.nii.gz")).unwrap();
        assert_eq!(record.path("label"), Some(Path::new("/data/case.nii.gz")));
    }

    #[test]
    fn postprocessing_retries_once_and_keeps_an_existing_label() {
        let chain = Compose::new(vec![Box::new(NeedsLabel)]);
        let mut record = DataRecord::new();
        record.insert_tensor("pred", ArrayD::zeros(vec![2, 2, 2]));
        record.insert_path("label", "/data/own-label.nii.gz");
        let record =
            run_postprocessing(&chain, record, Path::new("/data/case.nii.gz")).unwrap();
        assert_eq!(record.path("label"), Some(Path::new("/data/own-label.nii.gz")));

        let mut record = DataRecord::new();
        record.insert_tensor("pred", ArrayD::zeros(vec![2, 2, 2]));
        let record =
            run_postprocessing(&chain, record, Path::new("/data/case.nii.gz")).unwrap();
        assert_eq!(record.path("label"), Some(Path::new("/data/case.nii.gz")));
    }

    #[test]
    fn unrelated_missing_keys_are_not_retried() {
        let chain = Compose::new(vec![Box::new(NeedsImage)]);
        let record = DataRecord::new();
        let err = run_postprocessing(&chain, record, Path::new("/data/case.nii.gz"))
            .unwrap_err();
        assert_eq!(err.missing_record_key(), Some("image"));
    }

    #[test]
    fn batching_adds_the_missing_axes() {
        let volume = ArrayD::<f32>::zeros(vec![4, 5, 6]);
        let batched = batch_input(&volume).unwrap();
        assert_eq!(batched.shape(), &[1, 1, 4, 5, 6]);

        let channel_first = ArrayD::<f32>::zeros(vec![2, 4, 5, 6]);
        let batched = batch_input(&channel_first).unwrap();
        assert_eq!(batched.shape(), &[1, 2, 4, 5, 6]);

        assert!(batch_input(&ArrayD::<f32>::zeros(vec![4, 5])).is_err());
    }

    #[test]
    fn output_affine_follows_the_priority_order() {
        let mut meta = MetaMap::new();
        let mut original = Affine::identity();
        original[(0, 0)] = 2.0;
        let mut sform = Affine::identity();
        sform[(1, 1)] = 3.0;
        meta.insert("original_affine".into(), MetaValue::Affine(original));
        meta.insert("sform".into(), MetaValue::Affine(sform));
        assert_eq!(output_affine(&meta)[(0, 0)], 2.0);

        assert_eq!(output_affine(&MetaMap::new()), Affine::identity());
    }

    #[test]
    fn saved_outputs_round_trip_through_the_codec() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pred_seg.nii.gz");
        let pred = ArrayD::from_shape_fn(vec![3, 4, 5], |idx| idx[0] as f32);
        let mut meta = MetaMap::new();
        let mut affine = Affine::identity();
        affine[(0, 3)] = -7.5;
        meta.insert("affine".into(), MetaValue::Affine(affine));
        save_output(&pred, &meta, &path).unwrap();

        let loaded = crate::io::load_volume(&path).unwrap();
        assert_eq!(loaded.data.shape(), &[3, 4, 5]);
        assert!((loaded.affine[(0, 3)] - (-7.5)).abs() < 1e-4);
    }
}
