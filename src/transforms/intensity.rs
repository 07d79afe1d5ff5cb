//! Intensity transforms.
//!
//! All of these operate in place on the tensor stored under each configured
//! record key and leave metadata untouched.

use std::sync::Mutex;

use ndarray::{ArrayD, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::core::errors::{SegError, SegResult};
use crate::core::record::DataRecord;
use crate::transforms::registry::{self, ArgTable};
use crate::transforms::Transform;

/// Rescales intensities to a target range, or by a fixed factor.
///
/// With `minv`/`maxv` the tensor is linearly mapped so its minimum lands on
/// `minv` and its maximum on `maxv`. With `factor` alone the tensor is
/// multiplied by `1 + factor` instead.
#[derive(Debug)]
pub struct ScaleIntensity {
    keys: Vec<String>,
    minv: Option<f64>,
    maxv: Option<f64>,
    factor: Option<f64>,
}

impl ScaleIntensity {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let minv = registry::optional_f64(args, "minv", "ScaleIntensityd")?;
        let maxv = registry::optional_f64(args, "maxv", "ScaleIntensityd")?;
        let factor = registry::optional_f64(args, "factor", "ScaleIntensityd")?;
        let (minv, maxv) = if minv.is_none() && maxv.is_none() && factor.is_some() {
            (None, None)
        } else {
            (Some(minv.unwrap_or(0.0)), Some(maxv.unwrap_or(1.0)))
        };
        Ok(Self {
            keys: registry::keys(args, "ScaleIntensityd")?,
            minv,
            maxv,
            factor,
        })
    }

    fn scale(&self, data: &mut ArrayD<f32>) {
        match (self.minv, self.maxv) {
            (Some(minv), Some(maxv)) => {
                let mut lo = f32::INFINITY;
                let mut hi = f32::NEG_INFINITY;
                for &v in data.iter() {
                    lo = lo.min(v);
                    hi = hi.max(v);
                }
                let span = hi - lo;
                if span > 0.0 {
                    let scale = (maxv - minv) as f32 / span;
                    data.mapv_inplace(|v| (v - lo) * scale + minv as f32);
                } else {
                    data.fill(minv as f32);
                }
            }
            _ => {
                let factor = 1.0 + self.factor.unwrap_or(0.0) as f32;
                data.mapv_inplace(|v| v * factor);
            }
        }
    }
}

impl Transform for ScaleIntensity {
    fn name(&self) -> &'static str {
        "ScaleIntensityd"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let mut data = record.take_tensor(self.name(), key)?;
            self.scale(&mut data);
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Linearly maps the window `[a_min, a_max]` onto `[b_min, b_max]`.
#[derive(Debug)]
pub struct ScaleIntensityRange {
    keys: Vec<String>,
    a_min: f32,
    a_max: f32,
    b_min: f32,
    b_max: f32,
    clip: bool,
}

impl ScaleIntensityRange {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "ScaleIntensityRanged";
        let required = |name: &str| -> SegResult<f32> {
            registry::optional_f64(args, name, component)?
                .map(|v| v as f32)
                .ok_or_else(|| {
                    SegError::config(format!("component '{component}': '{name}' is required"))
                })
        };
        Ok(Self {
            keys: registry::keys(args, component)?,
            a_min: required("a_min")?,
            a_max: required("a_max")?,
            b_min: required("b_min")?,
            b_max: required("b_max")?,
            clip: registry::bool_or(args, "clip", false, component)?,
        })
    }
}

impl Transform for ScaleIntensityRange {
    fn name(&self) -> &'static str {
        "ScaleIntensityRanged"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        let span = self.a_max - self.a_min;
        if span == 0.0 {
            return Err(SegError::transform_failed(
                self.name(),
                "a_min and a_max must differ",
            ));
        }
        let scale = (self.b_max - self.b_min) / span;
        for key in &self.keys {
            let mut data = record.take_tensor(self.name(), key)?;
            data.mapv_inplace(|v| {
                let mapped = (v - self.a_min) * scale + self.b_min;
                if self.clip {
                    mapped.clamp(self.b_min.min(self.b_max), self.b_max.max(self.b_min))
                } else {
                    mapped
                }
            });
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Normalizes to zero mean and unit deviation, or by explicit operands.
#[derive(Debug)]
pub struct NormalizeIntensity {
    keys: Vec<String>,
    subtrahend: Option<f32>,
    divisor: Option<f32>,
    nonzero: bool,
    channel_wise: bool,
}

impl NormalizeIntensity {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "NormalizeIntensityd";
        Ok(Self {
            keys: registry::keys(args, component)?,
            subtrahend: registry::optional_f64(args, "subtrahend", component)?.map(|v| v as f32),
            divisor: registry::optional_f64(args, "divisor", component)?.map(|v| v as f32),
            nonzero: registry::bool_or(args, "nonzero", false, component)?,
            channel_wise: registry::bool_or(args, "channel_wise", false, component)?,
        })
    }

    fn normalize_slice(&self, data: &mut ndarray::ArrayViewMutD<'_, f32>) {
        let (mean, std) = match (self.subtrahend, self.divisor) {
            (Some(sub), Some(div)) => (sub, div),
            _ => {
                let mut sum = 0.0f64;
                let mut count = 0usize;
                for &v in data.iter() {
                    if !self.nonzero || v != 0.0 {
                        sum += v as f64;
                        count += 1;
                    }
                }
                if count == 0 {
                    return;
                }
                let mean = sum / count as f64;
                let mut var = 0.0f64;
                for &v in data.iter() {
                    if !self.nonzero || v != 0.0 {
                        let d = v as f64 - mean;
                        var += d * d;
                    }
                }
                let std = (var / count as f64).sqrt();
                (
                    self.subtrahend.unwrap_or(mean as f32),
                    self.divisor.unwrap_or(std as f32),
                )
            }
        };
        let divisor = if std == 0.0 { 1.0 } else { std };
        data.map_inplace(|v| {
            if !self.nonzero || *v != 0.0 {
                *v = (*v - mean) / divisor;
            }
        });
    }
}

impl Transform for NormalizeIntensity {
    fn name(&self) -> &'static str {
        "NormalizeIntensityd"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let mut data = record.take_tensor(self.name(), key)?;
            if self.channel_wise && data.ndim() > 1 {
                for mut channel in data.axis_iter_mut(Axis(0)) {
                    self.normalize_slice(&mut channel.view_mut());
                }
            } else {
                self.normalize_slice(&mut data.view_mut());
            }
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Randomly scales intensities while keeping the mean fixed.
///
/// A factor is drawn uniformly from the configured range; the tensor is
/// scaled by `1 + factor` around its mean when `fixed_mean` holds, plainly
/// otherwise. The whole transform is skipped with probability `1 - prob`.
#[derive(Debug)]
pub struct RandScaleIntensityFixedMean {
    keys: Vec<String>,
    factors: (f64, f64),
    prob: f64,
    fixed_mean: bool,
    rng: Mutex<StdRng>,
}

impl RandScaleIntensityFixedMean {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "RandScaleIntensityFixedMeanD";
        let factors = match args.get("factors") {
            None | Some(serde_json::Value::Null) => (0.0, 0.0),
            Some(serde_json::Value::Number(n)) => {
                let v = n.as_f64().unwrap_or(0.0);
                (-v.abs(), v.abs())
            }
            Some(serde_json::Value::Array(pair)) if pair.len() == 2 => {
                let lo = pair[0].as_f64().ok_or_else(|| {
                    SegError::config(format!("component '{component}': 'factors' must be numeric"))
                })?;
                let hi = pair[1].as_f64().ok_or_else(|| {
                    SegError::config(format!("component '{component}': 'factors' must be numeric"))
                })?;
                (lo.min(hi), lo.max(hi))
            }
            Some(other) => {
                return Err(SegError::config(format!(
                    "component '{component}': 'factors' must be a number or a pair, got {other}"
                )))
            }
        };
        Ok(Self {
            keys: registry::keys(args, component)?,
            factors,
            prob: registry::optional_f64(args, "prob", component)?.unwrap_or(0.1),
            fixed_mean: registry::bool_or(args, "fixed_mean", true, component)?,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    #[cfg(test)]
    fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }
}

impl Transform for RandScaleIntensityFixedMean {
    fn name(&self) -> &'static str {
        "RandScaleIntensityFixedMeanD"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        let (roll, factor) = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|_| SegError::transform_failed(self.name(), "rng lock poisoned"))?;
            let roll = rng.gen::<f64>();
            let factor = if self.factors.0 == self.factors.1 {
                self.factors.0
            } else {
                rng.gen_range(self.factors.0..=self.factors.1)
            };
            (roll, factor)
        };
        if roll >= self.prob {
            return Ok(record);
        }
        let scale = (1.0 + factor) as f32;
        for key in &self.keys {
            let mut data = record.take_tensor(self.name(), key)?;
            if self.fixed_mean {
                let mean = data.iter().map(|&v| v as f64).sum::<f64>()
                    / data.len().max(1) as f64;
                let mean = mean as f32;
                data.mapv_inplace(|v| (v - mean) * scale + mean);
            } else {
                data.mapv_inplace(|v| v * scale);
            }
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ArgTable {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn record_with(values: &[f32]) -> DataRecord {
        let mut record = DataRecord::new();
        record.insert_tensor(
            "image",
            ArrayD::from_shape_vec(vec![values.len()], values.to_vec()).unwrap(),
        );
        record
    }

    #[test]
    fn scale_intensity_maps_to_unit_range_by_default() {
        let transform = ScaleIntensity::from_args(&ArgTable::new()).unwrap();
        let out = transform.apply(record_with(&[2.0, 4.0, 6.0])).unwrap();
        let data = out.tensor("image").unwrap();
        assert_eq!(data.as_slice().unwrap(), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn scale_intensity_factor_multiplies() {
        let transform = ScaleIntensity::from_args(&args(json!({"factor": 0.5}))).unwrap();
        let out = transform.apply(record_with(&[2.0, 4.0])).unwrap();
        let data = out.tensor("image").unwrap();
        assert_eq!(data.as_slice().unwrap(), &[3.0, 6.0]);
    }

    #[test]
    fn scale_range_windows_and_clips() {
        let transform = ScaleIntensityRange::from_args(&args(json!({
            "a_min": -100.0, "a_max": 100.0, "b_min": 0.0, "b_max": 1.0, "clip": true
        })))
        .unwrap();
        let out = transform
            .apply(record_with(&[-200.0, -100.0, 0.0, 100.0, 300.0]))
            .unwrap();
        let data = out.tensor("image").unwrap();
        assert_eq!(data.as_slice().unwrap(), &[0.0, 0.0, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn scale_range_requires_the_window() {
        let err = ScaleIntensityRange::from_args(&args(json!({"a_min": 0.0}))).unwrap_err();
        assert!(err.to_string().contains("a_max"));
    }

    #[test]
    fn normalize_defaults_to_zero_mean_unit_std() {
        let transform = NormalizeIntensity::from_args(&ArgTable::new()).unwrap();
        let out = transform.apply(record_with(&[1.0, 2.0, 3.0])).unwrap();
        let data = out.tensor("image").unwrap();
        let mean: f32 = data.iter().sum::<f32>() / data.len() as f32;
        assert!(mean.abs() < 1e-6);
        let var: f32 = data.iter().map(|v| v * v).sum::<f32>() / data.len() as f32;
        assert!((var - 1.0).abs() < 1e-5);
    }

    #[test]
    fn normalize_with_explicit_operands() {
        let transform = NormalizeIntensity::from_args(&args(json!({
            "subtrahend": 10.0, "divisor": 2.0
        })))
        .unwrap();
        let out = transform.apply(record_with(&[10.0, 14.0])).unwrap();
        let data = out.tensor("image").unwrap();
        assert_eq!(data.as_slice().unwrap(), &[0.0, 2.0]);
    }

    #[test]
    fn normalize_nonzero_leaves_background_alone() {
        let transform =
            NormalizeIntensity::from_args(&args(json!({"nonzero": true}))).unwrap();
        let out = transform.apply(record_with(&[0.0, 2.0, 4.0])).unwrap();
        let data = out.tensor("image").unwrap();
        assert_eq!(data[[0]], 0.0);
    }

    #[test]
    fn rand_scale_skips_below_probability() {
        let transform = RandScaleIntensityFixedMean::from_args(&args(json!({
            "factors": 0.3, "prob": 0.0
        })))
        .unwrap()
        .with_seed(7);
        let out = transform.apply(record_with(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(out.tensor("image").unwrap().as_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn rand_scale_preserves_the_mean() {
        let transform = RandScaleIntensityFixedMean::from_args(&args(json!({
            "factors": 0.3, "prob": 1.0
        })))
        .unwrap()
        .with_seed(7);
        let out = transform.apply(record_with(&[1.0, 2.0, 3.0])).unwrap();
        let data = out.tensor("image").unwrap();
        let mean: f32 = data.iter().sum::<f32>() / data.len() as f32;
        assert!((mean - 2.0).abs() < 1e-5);
    }
}
