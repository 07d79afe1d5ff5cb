//! Post-processing transforms applied to network predictions.

use std::path::PathBuf;

use ndarray::{ArrayD, Axis, Dimension};

use crate::core::errors::{SegError, SegResult};
use crate::core::record::{meta_key, DataRecord, MetaValue};
use crate::io;
use crate::transforms::registry::{self, ArgTable};
use crate::transforms::Transform;

/// Applies sigmoid or channel softmax to prediction tensors.
#[derive(Debug)]
pub struct Activations {
    keys: Vec<String>,
    sigmoid: bool,
    softmax: bool,
}

impl Activations {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "Activationsd";
        let sigmoid = registry::bool_or(args, "sigmoid", false, component)?;
        let softmax = registry::bool_or(args, "softmax", false, component)?;
        if sigmoid && softmax {
            return Err(SegError::config(format!(
                "component '{component}': 'sigmoid' and 'softmax' are mutually exclusive"
            )));
        }
        Ok(Self {
            keys: registry::keys(args, component)?,
            sigmoid,
            softmax,
        })
    }
}

impl Transform for Activations {
    fn name(&self) -> &'static str {
        "Activationsd"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let mut data = record.take_tensor(self.name(), key)?;
            if self.sigmoid {
                data.mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));
            } else if self.softmax {
                if data.ndim() < 2 {
                    return Err(SegError::transform_failed(
                        self.name(),
                        "softmax needs a channel axis",
                    ));
                }
                let max = data
                    .fold_axis(Axis(0), f32::NEG_INFINITY, |m, &v| m.max(v))
                    .insert_axis(Axis(0));
                data -= &max;
                data.mapv_inplace(f32::exp);
                let sum = data.sum_axis(Axis(0)).insert_axis(Axis(0));
                data /= &sum;
            }
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Discretizes predictions by argmax, one-hot expansion and thresholding.
///
/// Steps run in that order, each only when configured. Argmax keeps a
/// singleton channel axis so downstream shapes stay channel-first.
#[derive(Debug)]
pub struct AsDiscrete {
    keys: Vec<String>,
    argmax: bool,
    threshold: Option<f32>,
    to_onehot: Option<usize>,
    rounding: bool,
}

impl AsDiscrete {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "AsDiscreted";
        let rounding = match registry::optional_string(args, "rounding", component)?.as_deref() {
            None => false,
            Some("torchrounding") => true,
            Some(other) => {
                return Err(SegError::config(format!(
                    "component '{component}': unsupported rounding '{other}'"
                )))
            }
        };
        Ok(Self {
            keys: registry::keys(args, component)?,
            argmax: registry::bool_or(args, "argmax", false, component)?,
            threshold: registry::optional_f64(args, "threshold", component)?.map(|v| v as f32),
            to_onehot: registry::optional_usize(args, "to_onehot", component)?,
            rounding,
        })
    }

    fn discretize(&self, mut data: ArrayD<f32>) -> SegResult<ArrayD<f32>> {
        if self.argmax {
            if data.ndim() < 2 {
                return Err(SegError::transform_failed(
                    self.name(),
                    "argmax needs a channel axis",
                ));
            }
            data = data
                .map_axis(Axis(0), |lane| {
                    lane.iter()
                        .enumerate()
                        .fold((0usize, f32::NEG_INFINITY), |(best, max), (i, &v)| {
                            if v > max {
                                (i, v)
                            } else {
                                (best, max)
                            }
                        })
                        .0 as f32
                })
                .insert_axis(Axis(0));
        }
        if let Some(classes) = self.to_onehot {
            if data.ndim() < 2 || data.shape()[0] != 1 {
                return Err(SegError::transform_failed(
                    self.name(),
                    "to_onehot expects a single-channel label tensor",
                ));
            }
            let labels = data.index_axis(Axis(0), 0);
            let mut shape = vec![classes];
            shape.extend_from_slice(labels.shape());
            let mut onehot = ArrayD::<f32>::zeros(shape);
            for (idx, &value) in labels.indexed_iter() {
                let class = value as usize;
                if class >= classes {
                    return Err(SegError::transform_failed(
                        self.name(),
                        format!("label {class} exceeds to_onehot={classes}"),
                    ));
                }
                let mut full = Vec::with_capacity(labels.ndim() + 1);
                full.push(class);
                full.extend_from_slice(idx.slice());
                onehot[full.as_slice()] = 1.0;
            }
            data = onehot;
        }
        if let Some(threshold) = self.threshold {
            data.mapv_inplace(|v| if v >= threshold { 1.0 } else { 0.0 });
        }
        if self.rounding {
            data.mapv_inplace(f32::round);
        }
        Ok(data)
    }
}

impl Transform for AsDiscrete {
    fn name(&self) -> &'static str {
        "AsDiscreted"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let data = record.take_tensor(self.name(), key)?;
            let data = self.discretize(data)?;
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Writes prediction tensors back to disk as NIfTI volumes.
///
/// The pipeline assembler strips this step from bundle post chains because
/// the runner owns output naming, but the component stays available for
/// standalone chains.
#[derive(Debug)]
pub struct SaveImage {
    keys: Vec<String>,
    output_dir: PathBuf,
    output_postfix: String,
    output_ext: String,
    separate_folder: bool,
}

impl SaveImage {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "SaveImaged";
        Ok(Self {
            keys: registry::keys(args, component)?,
            output_dir: registry::optional_string(args, "output_dir", component)?
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            output_postfix: registry::optional_string(args, "output_postfix", component)?
                .unwrap_or_else(|| "trans".to_string()),
            output_ext: registry::optional_string(args, "output_ext", component)?
                .unwrap_or_else(|| ".nii.gz".to_string()),
            separate_folder: registry::bool_or(args, "separate_folder", true, component)?,
        })
    }

    fn target_path(&self, stem: &str) -> PathBuf {
        let file = if self.output_postfix.is_empty() {
            format!("{stem}{}", self.output_ext)
        } else {
            format!("{stem}_{}{}", self.output_postfix, self.output_ext)
        };
        if self.separate_folder {
            self.output_dir.join(stem).join(file)
        } else {
            self.output_dir.join(file)
        }
    }
}

impl Transform for SaveImage {
    fn name(&self) -> &'static str {
        "SaveImaged"
    }

    fn writes_output(&self) -> bool {
        true
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let data = record.take_tensor(self.name(), key)?;
            let meta = record.meta(&meta_key(key));
            let affine = meta
                .and_then(|m| {
                    m.get("affine")
                        .or_else(|| m.get("original_affine"))
                        .and_then(MetaValue::as_affine)
                })
                .copied()
                .unwrap_or_else(crate::core::record::Affine::identity);
            let stem = meta
                .and_then(|m| m.get("filename"))
                .and_then(MetaValue::as_text)
                .map(|name| io::nifti_stem(std::path::Path::new(name)))
                .unwrap_or_else(|| key.clone());
            let writable = if data.ndim() == 4 && data.shape()[0] == 1 {
                data.index_axis(Axis(0), 0).to_owned()
            } else {
                data.clone()
            };
            io::save_volume(&self.target_path(&stem), &writable, &affine, None)?;
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}
