//! Batch inference over files, directories and list files.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::{ArrayD, Axis};
use nifti::NiftiHeader;
use tracing::{debug, info, warn};

use crate::core::errors::{SegError, SegResult};
use crate::core::record::{Affine, MetaMap};
use crate::inference::scripted::ScriptedSegmenterFactory;
use crate::io::{self, LoadedVolume};
use crate::pipeline::metrics::{self, DiceHelper};
use crate::pipeline::predictor::{BundlePredictor, Prediction, PredictorOptions};
use crate::pipeline::report::{DiceReport, REPORT_FILE_NAME};

/// Everything one batch run needs, fixed up front.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub bundle: String,
    pub input: Option<PathBuf>,
    pub input_list: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub device: Option<String>,
    pub save_probs: bool,
    pub labels_dir: Option<PathBuf>,
    pub reference_image: Option<PathBuf>,
    pub continue_on_error: bool,
    pub checkpoint: Option<PathBuf>,
    pub script_factory: Option<Arc<dyn ScriptedSegmenterFactory>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("bundle", &self.bundle)
            .field("input", &self.input)
            .field("input_list", &self.input_list)
            .field("output_dir", &self.output_dir)
            .field("device", &self.device)
            .field("save_probs", &self.save_probs)
            .field("labels_dir", &self.labels_dir)
            .field("reference_image", &self.reference_image)
            .field("continue_on_error", &self.continue_on_error)
            .field("checkpoint", &self.checkpoint)
            .field(
                "script_factory",
                &self.script_factory.as_ref().map(|_| "<registered>"),
            )
            .finish()
    }
}

/// What a batch run produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub written: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    pub report_path: Option<PathBuf>,
}

/// Loads the bundle once and segments every resolved input.
pub fn run_inference(options: &RunOptions) -> SegResult<RunSummary> {
    let inputs = resolve_inputs(options.input.as_deref(), options.input_list.as_deref())?;
    fs::create_dir_all(&options.output_dir)?;

    let mut predictor_options = PredictorOptions::new();
    predictor_options.device = options.device.clone();
    predictor_options.checkpoint = options.checkpoint.clone();
    predictor_options.script_factory = options.script_factory.clone();
    let predictor = BundlePredictor::new(&options.bundle, &predictor_options)?;
    let helper = predictor.metric().copied().unwrap_or_default();

    process_items(&inputs, options, &helper, |input| {
        predictor.predict_volume(input)
    })
}

/// The sequential per-item loop. The first failure aborts the remaining
/// items unless `continue_on_error` was chosen, in which case failures are
/// logged and collected.
fn process_items<F>(
    inputs: &[PathBuf],
    options: &RunOptions,
    helper: &DiceHelper,
    mut predict: F,
) -> SegResult<RunSummary>
where
    F: FnMut(&Path) -> SegResult<Prediction>,
{
    let labels_dir = match options.labels_dir.as_deref() {
        Some(dir) if dir.is_dir() => Some(dir),
        Some(dir) => {
            warn!(dir = %dir.display(), "labels directory not found; metrics disabled");
            None
        }
        None => None,
    };
    let reference = match options.reference_image.as_deref() {
        Some(path) => Some(io::load_volume(path)?),
        None => None,
    };

    let mut summary = RunSummary::default();
    let mut report = DiceReport::new();
    let total = inputs.len();
    for (index, input) in inputs.iter().enumerate() {
        info!(
            case = %input.display(),
            index = index + 1,
            total,
            "running inference"
        );
        let outcome = process_one(
            input,
            options,
            helper,
            reference.as_ref(),
            labels_dir,
            &mut report,
            &mut predict,
        );
        match outcome {
            Ok(path) => summary.written.push(path),
            Err(err) if options.continue_on_error => {
                warn!(case = %input.display(), error = %err, "inference failed; continuing");
                summary.failed.push(input.clone());
            }
            Err(err) => return Err(err),
        }
    }

    let report_path = options.output_dir.join(REPORT_FILE_NAME);
    if report.is_empty() {
        DiceReport::remove_stale(&report_path)?;
    } else {
        report.emit(&report_path)?;
        summary.report_path = Some(report_path);
    }
    Ok(summary)
}

fn process_one<F>(
    input: &Path,
    options: &RunOptions,
    helper: &DiceHelper,
    reference: Option<&LoadedVolume>,
    labels_dir: Option<&Path>,
    report: &mut DiceReport,
    predict: &mut F,
) -> SegResult<PathBuf>
where
    F: FnMut(&Path) -> SegResult<Prediction>,
{
    let prediction = predict(input)?;
    let prepared = prepare_prediction(prediction.tensor, options.save_probs);
    let out_path = output_path(&options.output_dir, input, options.save_probs);
    let (affine, header) = output_frame(reference, &prediction.meta, input)?;
    match &prepared {
        Prepared::Probabilities(data) => {
            io::save_volume(&out_path, data, &affine, header.as_ref())?
        }
        Prepared::Mask(data) => io::save_volume(&out_path, data, &affine, header.as_ref())?,
    }
    info!(output = %out_path.display(), "wrote prediction");

    if let Some(labels_dir) = labels_dir {
        score_case(input, &prepared, labels_dir, helper, report);
    }
    Ok(out_path)
}

/// Resolves the input set. A list file and a direct path are mutually
/// exclusive; a directory is scanned non-recursively for NIfTI files in
/// lexicographic order.
fn resolve_inputs(input: Option<&Path>, input_list: Option<&Path>) -> SegResult<Vec<PathBuf>> {
    match (input, input_list) {
        (Some(_), Some(_)) => Err(SegError::invalid_input(
            "an input path and an input list are mutually exclusive",
        )),
        (None, Some(list)) => {
            let content = fs::read_to_string(list)?;
            let items: Vec<PathBuf> = content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(PathBuf::from)
                .collect();
            if items.is_empty() {
                return Err(SegError::invalid_input(format!(
                    "input list {} names no files",
                    list.display()
                )));
            }
            Ok(items)
        }
        (Some(path), None) => {
            if path.is_dir() {
                let mut items: Vec<PathBuf> = fs::read_dir(path)?
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|p| p.is_file() && io::is_nifti(p))
                    .collect();
                items.sort();
                if items.is_empty() {
                    return Err(SegError::invalid_input(format!(
                        "no NIfTI files found in {}",
                        path.display()
                    )));
                }
                Ok(items)
            } else if path.is_file() {
                Ok(vec![path.to_path_buf()])
            } else {
                Err(SegError::invalid_input(format!(
                    "input path {} does not exist",
                    path.display()
                )))
            }
        }
        (None, None) => Err(SegError::invalid_input(
            "either an input path or an input list is required",
        )),
    }
}

/// `<stem>_seg.nii.gz`, or `<stem>_prob.nii.gz` when probabilities were
/// requested.
fn output_path(output_dir: &Path, input: &Path, save_probs: bool) -> PathBuf {
    let stem = io::nifti_stem(input);
    let suffix = if save_probs { "_prob" } else { "_seg" };
    output_dir.join(format!("{stem}{suffix}.nii.gz"))
}

/// The array that gets written.
pub(crate) enum Prepared {
    Probabilities(ArrayD<f32>),
    Mask(ArrayD<u8>),
}

impl Prepared {
    fn to_metric_array(&self) -> ArrayD<f32> {
        match self {
            Prepared::Probabilities(data) => data.clone(),
            Prepared::Mask(data) => data.mapv(f32::from),
        }
    }
}

/// Derives the output array from a raw prediction: the full float tensor
/// when probabilities were requested, a thresholded `u8` mask for
/// single-channel output, a channel arg-max label map otherwise.
pub(crate) fn prepare_prediction(tensor: ArrayD<f32>, save_probs: bool) -> Prepared {
    if save_probs {
        return Prepared::Probabilities(tensor);
    }
    let tensor = squeeze_leading(tensor);
    if tensor.ndim() >= 4 {
        Prepared::Mask(channel_argmax(&tensor))
    } else {
        Prepared::Mask(threshold_mask(&tensor))
    }
}

fn squeeze_leading(mut tensor: ArrayD<f32>) -> ArrayD<f32> {
    while tensor.ndim() > 3 && tensor.shape()[0] == 1 {
        tensor = tensor.index_axis_move(Axis(0), 0);
    }
    tensor
}

fn threshold_mask(tensor: &ArrayD<f32>) -> ArrayD<u8> {
    tensor.mapv(|v| u8::from(v > 0.5))
}

/// Per-voxel index of the strongest channel; ties go to the first.
fn channel_argmax(tensor: &ArrayD<f32>) -> ArrayD<u8> {
    tensor.map_axis(Axis(0), |lane| {
        let mut best = 0usize;
        let mut best_value = f32::NEG_INFINITY;
        for (index, &value) in lane.iter().enumerate() {
            if value > best_value {
                best_value = value;
                best = index;
            }
        }
        best as u8
    })
}

/// Spatial frame for the written file: an explicit reference image wins,
/// then the prediction metadata, then the source image itself.
fn output_frame(
    reference: Option<&LoadedVolume>,
    meta: &MetaMap,
    source: &Path,
) -> SegResult<(Affine, Option<NiftiHeader>)> {
    if let Some(reference) = reference {
        return Ok((reference.affine, Some(reference.header.clone())));
    }
    for key in ["affine", "original_affine"] {
        if let Some(affine) = meta.get(key).and_then(|value| value.as_affine()) {
            return Ok((*affine, None));
        }
    }
    let source = io::load_volume(source)?;
    Ok((source.affine, Some(source.header)))
}

fn score_case(
    input: &Path,
    prepared: &Prepared,
    labels_dir: &Path,
    helper: &DiceHelper,
    report: &mut DiceReport,
) {
    let Some(label_path) = find_label(labels_dir, input) else {
        debug!(case = %input.display(), "no matching label; skipping metrics");
        return;
    };
    let label = match io::load_volume(&label_path) {
        Ok(volume) => volume.data,
        Err(err) => {
            warn!(
                label = %label_path.display(),
                error = %err,
                "failed to load label; skipping metrics"
            );
            return;
        }
    };
    match metrics::score_pair(&prepared.to_metric_array(), &label, helper) {
        Ok((dice, hausdorff)) => {
            report.push(display_name(input), dice, hausdorff);
        }
        Err(err) => {
            warn!(case = %input.display(), error = %err, "metric computation failed; skipping");
        }
    }
}

/// Label lookup for a case: `<stem>.nii.gz`, else `<stem>_seg.nii.gz`.
fn find_label(labels_dir: &Path, input: &Path) -> Option<PathBuf> {
    let stem = io::nifti_stem(input);
    let direct = labels_dir.join(format!("{stem}.nii.gz"));
    if direct.is_file() {
        return Some(direct);
    }
    let suffixed = labels_dir.join(format!("{stem}_seg.nii.gz"));
    suffixed.is_file().then_some(suffixed)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Standalone dice evaluation over already-written predictions.
///
/// Pairing tries the exact file name first, then the name with a `_seg`
/// suffix stripped. Unmatched or unreadable cases are skipped; resolving
/// no predictions at all, or scoring zero pairs, is an error.
pub fn run_dice(
    preds: Option<&Path>,
    preds_list: Option<&Path>,
    labels_dir: &Path,
    output: &Path,
) -> SegResult<DiceReport> {
    if !labels_dir.is_dir() {
        return Err(SegError::invalid_input(format!(
            "labels directory {} does not exist",
            labels_dir.display()
        )));
    }
    let predictions = resolve_inputs(preds, preds_list)?;
    let helper = DiceHelper::default();
    let mut report = DiceReport::new();
    for pred_path in &predictions {
        let Some(label_path) = find_evaluation_label(labels_dir, pred_path) else {
            warn!(pred = %pred_path.display(), "no matching label; skipped");
            continue;
        };
        let pred = match io::load_volume(pred_path) {
            Ok(volume) => volume.data,
            Err(err) => {
                warn!(pred = %pred_path.display(), error = %err, "failed to load; skipped");
                continue;
            }
        };
        let label = match io::load_volume(&label_path) {
            Ok(volume) => volume.data,
            Err(err) => {
                warn!(label = %label_path.display(), error = %err, "failed to load; skipped");
                continue;
            }
        };
        match metrics::score_pair(&pred, &label, &helper) {
            Ok((dice, hausdorff)) => report.push(display_name(pred_path), dice, hausdorff),
            Err(err) => {
                warn!(pred = %pred_path.display(), error = %err, "scoring failed; skipped");
            }
        }
    }
    if report.is_empty() {
        return Err(SegError::invalid_input(
            "no prediction/label pairs were scored",
        ));
    }
    report.emit(output)?;
    Ok(report)
}

/// Label lookup for evaluation: exact name, else `_seg.nii.gz` mapped to
/// `.nii.gz` (and `_seg.nii` to `.nii`).
fn find_evaluation_label(labels_dir: &Path, pred: &Path) -> Option<PathBuf> {
    let name = pred.file_name()?.to_string_lossy().into_owned();
    let direct = labels_dir.join(&name);
    if direct.is_file() {
        return Some(direct);
    }
    let normalized = if name.ends_with("_seg.nii.gz") {
        name.replace("_seg.nii.gz", ".nii.gz")
    } else if name.ends_with("_seg.nii") {
        name.replace("_seg.nii", ".nii")
    } else {
        return None;
    };
    let candidate = labels_dir.join(normalized);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn write_volume(path: &Path, fill: f32) {
        let data = ArrayD::from_elem(vec![4, 4, 4], fill);
        io::save_volume(path, &data, &Affine::identity(), None).unwrap();
    }

    fn write_mask(path: &Path) {
        let data = ArrayD::from_shape_fn(vec![4, 4, 4], |idx| {
            if idx[0] < 2 {
                1.0f32
            } else {
                0.0
            }
        });
        io::save_volume(path, &data, &Affine::identity(), None).unwrap();
    }

    fn mask_tensor() -> ArrayD<f32> {
        ArrayD::from_shape_fn(vec![1, 4, 4, 4], |idx| if idx[1] < 2 { 1.0 } else { 0.0 })
    }

    fn options(output_dir: &Path) -> RunOptions {
        RunOptions {
            output_dir: output_dir.to_path_buf(),
            ..RunOptions::default()
        }
    }

    #[test]
    fn inputs_are_mutually_exclusive_and_required() {
        let err = resolve_inputs(Some(Path::new("a")), Some(Path::new("b"))).unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
        let err = resolve_inputs(None, None).unwrap_err();
        assert!(err.to_string().contains("required"));
        let err = resolve_inputs(Some(Path::new("/definitely/not/here.nii.gz")), None)
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn directories_resolve_to_sorted_nifti_files() {
        let dir = tempfile::tempdir().unwrap();
        write_volume(&dir.path().join("b.nii.gz"), 0.0);
        write_volume(&dir.path().join("a.nii.gz"), 0.0);
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        let resolved = resolve_inputs(Some(dir.path()), None).unwrap();
        let names: Vec<String> = resolved.iter().map(|p| display_name(p)).collect();
        assert_eq!(names, vec!["a.nii.gz", "b.nii.gz"]);
    }

    #[test]
    fn list_files_skip_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("cases.txt");
        std::fs::write(&list, "/data/a.nii.gz\n\n  \n/data/b.nii.gz\n").unwrap();
        let resolved = resolve_inputs(None, Some(&list)).unwrap();
        assert_eq!(
            resolved,
            vec![PathBuf::from("/data/a.nii.gz"), PathBuf::from("/data/b.nii.gz")]
        );
    }

    #[test]
    fn output_names_strip_nifti_extensions() {
        let out = Path::new("/out");
        assert_eq!(
            output_path(out, Path::new("/in/case.nii.gz"), false),
            Path::new("/out/case_seg.nii.gz")
        );
        assert_eq!(
            output_path(out, Path::new("/in/case.nii"), true),
            Path::new("/out/case_prob.nii.gz")
        );
    }

    #[test]
    fn single_channel_predictions_become_binary_masks() {
        let prepared = prepare_prediction(mask_tensor(), false);
        match prepared {
            Prepared::Mask(mask) => {
                assert_eq!(mask.shape(), &[4, 4, 4]);
                assert_eq!(mask[[0, 0, 0]], 1);
                assert_eq!(mask[[3, 0, 0]], 0);
            }
            Prepared::Probabilities(_) => panic!("expected a mask"),
        }
    }

    #[test]
    fn multi_channel_predictions_become_label_maps() {
        let tensor = ArrayD::from_shape_fn(vec![3, 2, 2, 2], |idx| {
            if idx[0] == 2 && idx[1] == 0 {
                0.9
            } else if idx[0] == 1 {
                0.6
            } else {
                0.1
            }
        });
        match prepare_prediction(tensor, false) {
            Prepared::Mask(labels) => {
                assert_eq!(labels.shape(), &[2, 2, 2]);
                assert_eq!(labels[[0, 0, 0]], 2);
                assert_eq!(labels[[1, 0, 0]], 1);
            }
            Prepared::Probabilities(_) => panic!("expected a label map"),
        }
    }

    #[test]
    fn probability_output_keeps_the_full_tensor() {
        match prepare_prediction(mask_tensor(), true) {
            Prepared::Probabilities(probs) => assert_eq!(probs.shape(), &[1, 4, 4, 4]),
            Prepared::Mask(_) => panic!("expected probabilities"),
        }
    }

    #[test]
    fn the_reference_frame_outranks_prediction_metadata() {
        use crate::core::record::MetaValue;

        let mut reference_affine = Affine::identity();
        reference_affine[(0, 3)] = 40.0;
        let reference = LoadedVolume {
            data: ArrayD::zeros(vec![2, 2, 2]),
            header: NiftiHeader::default(),
            affine: reference_affine,
            qform: None,
            sform: None,
        };
        let mut meta = MetaMap::new();
        let mut meta_affine = Affine::identity();
        meta_affine[(0, 3)] = -3.0;
        meta.insert("affine".into(), MetaValue::Affine(meta_affine));

        let (affine, header) =
            output_frame(Some(&reference), &meta, Path::new("/nope.nii.gz")).unwrap();
        assert_eq!(affine[(0, 3)], 40.0);
        assert!(header.is_some());

        let (affine, header) = output_frame(None, &meta, Path::new("/nope.nii.gz")).unwrap();
        assert_eq!(affine[(0, 3)], -3.0);
        assert!(header.is_none());
    }

    #[test]
    fn the_first_failure_aborts_remaining_items() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        for name in ["a.nii.gz", "b.nii.gz", "c.nii.gz"] {
            write_volume(&dir.path().join(name), 0.0);
        }
        let inputs: Vec<PathBuf> =
            ["a.nii.gz", "b.nii.gz", "c.nii.gz"].iter().map(|n| dir.path().join(n)).collect();
        std::fs::create_dir_all(&out).unwrap();

        let err = process_items(&inputs, &options(&out), &DiceHelper::default(), |input| {
            if display_name(input).starts_with('b') {
                Err(SegError::invalid_input("simulated failure"))
            } else {
                Ok(Prediction {
                    tensor: mask_tensor(),
                    meta: MetaMap::new(),
                })
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("simulated failure"));
        assert!(out.join("a_seg.nii.gz").exists());
        assert!(!out.join("c_seg.nii.gz").exists());
    }

    #[test]
    fn continue_on_error_collects_failures_and_keeps_going() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        for name in ["a.nii.gz", "b.nii.gz", "c.nii.gz"] {
            write_volume(&dir.path().join(name), 0.0);
        }
        let inputs: Vec<PathBuf> =
            ["a.nii.gz", "b.nii.gz", "c.nii.gz"].iter().map(|n| dir.path().join(n)).collect();
        std::fs::create_dir_all(&out).unwrap();
        let mut run_options = options(&out);
        run_options.continue_on_error = true;

        let summary = process_items(&inputs, &run_options, &DiceHelper::default(), |input| {
            if display_name(input).starts_with('b') {
                Err(SegError::invalid_input("simulated failure"))
            } else {
                Ok(Prediction {
                    tensor: mask_tensor(),
                    meta: MetaMap::new(),
                })
            }
        })
        .unwrap();
        assert_eq!(summary.written.len(), 2);
        assert_eq!(summary.failed.len(), 1);
        assert!(out.join("c_seg.nii.gz").exists());
    }

    #[test]
    fn matched_labels_produce_a_dice_report() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let labels = dir.path().join("labels");
        std::fs::create_dir_all(&out).unwrap();
        std::fs::create_dir_all(&labels).unwrap();
        write_volume(&dir.path().join("case.nii.gz"), 0.0);
        write_mask(&labels.join("case.nii.gz"));

        let mut run_options = options(&out);
        run_options.labels_dir = Some(labels);
        let inputs = vec![dir.path().join("case.nii.gz")];
        let summary = process_items(&inputs, &run_options, &DiceHelper::default(), |_| {
            Ok(Prediction {
                tensor: mask_tensor(),
                meta: MetaMap::new(),
            })
        })
        .unwrap();

        let report_path = summary.report_path.unwrap();
        let content = std::fs::read_to_string(&report_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "image,dice,hausdorff95");
        assert!(lines[1].starts_with("case.nii.gz,1.0000"));
        assert!(lines.last().unwrap().starts_with("mean_dice,1.0000"));
    }

    #[test]
    fn a_stale_report_is_removed_when_nothing_was_scored() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let stale = out.join(REPORT_FILE_NAME);
        std::fs::write(&stale, "image,dice,hausdorff95\nold,0.1,\n").unwrap();
        write_volume(&dir.path().join("case.nii.gz"), 0.0);

        let inputs = vec![dir.path().join("case.nii.gz")];
        let summary = process_items(&inputs, &options(&out), &DiceHelper::default(), |_| {
            Ok(Prediction {
                tensor: mask_tensor(),
                meta: MetaMap::new(),
            })
        })
        .unwrap();
        assert!(summary.report_path.is_none());
        assert!(!stale.exists());
    }

    #[test]
    fn run_dice_normalizes_seg_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let preds = dir.path().join("preds");
        let labels = dir.path().join("labels");
        std::fs::create_dir_all(&preds).unwrap();
        std::fs::create_dir_all(&labels).unwrap();
        write_mask(&preds.join("case_seg.nii.gz"));
        write_mask(&labels.join("case.nii.gz"));

        let output = dir.path().join("reports/dice.csv");
        let report = run_dice(Some(&preds), None, &labels, &output).unwrap();
        assert_eq!(report.len(), 1);
        assert!((report.mean_dice() - 1.0).abs() < 1e-6);
        assert!(output.is_file());
    }

    #[test]
    fn run_dice_requires_labels_and_at_least_one_pair() {
        let dir = tempfile::tempdir().unwrap();
        let preds = dir.path().join("preds");
        std::fs::create_dir_all(&preds).unwrap();
        write_mask(&preds.join("case_seg.nii.gz"));

        let missing = dir.path().join("no-labels");
        let err =
            run_dice(Some(&preds), None, &missing, &dir.path().join("d.csv")).unwrap_err();
        assert!(err.to_string().contains("labels directory"));

        let empty_labels = dir.path().join("labels");
        std::fs::create_dir_all(&empty_labels).unwrap();
        let err = run_dice(Some(&preds), None, &empty_labels, &dir.path().join("d.csv"))
            .unwrap_err();
        assert!(err.to_string().contains("no prediction/label pairs"));
    }
}
