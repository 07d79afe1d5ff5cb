//! Spatial transforms and the resampling kernels behind them.

use ndarray::{Array3, ArrayD, ArrayView3, Axis, Ix3};

use crate::core::errors::{SegError, SegResult};
use crate::core::record::DataRecord;
use crate::transforms::registry::{self, ArgTable};
use crate::transforms::Transform;

/// Moves (or creates) the channel axis so tensors read `[C, D, H, W]`.
///
/// A three-dimensional tensor gains a singleton channel axis. A
/// four-dimensional tensor is assumed channel-last, the usual layout of
/// multi-modal NIfTI volumes, unless `channel_dim` names the axis to move.
#[derive(Debug)]
pub struct EnsureChannelFirst {
    keys: Vec<String>,
    channel_dim: Option<i64>,
}

impl EnsureChannelFirst {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "EnsureChannelFirstd";
        let channel_dim = match args.get("channel_dim") {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::Number(n)) => Some(n.as_i64().ok_or_else(|| {
                SegError::config(format!(
                    "component '{component}': 'channel_dim' must be an integer"
                ))
            })?),
            Some(other) => {
                return Err(SegError::config(format!(
                    "component '{component}': 'channel_dim' must be an integer, got {other}"
                )))
            }
        };
        Ok(Self {
            keys: registry::keys(args, component)?,
            channel_dim,
        })
    }

    fn rearrange(&self, data: ArrayD<f32>) -> SegResult<ArrayD<f32>> {
        match data.ndim() {
            3 => Ok(data.insert_axis(Axis(0))),
            4 => {
                let ndim = data.ndim() as i64;
                let channel = match self.channel_dim {
                    Some(dim) if dim < 0 => dim + ndim,
                    Some(dim) => dim,
                    None => ndim - 1,
                };
                if !(0..ndim).contains(&channel) {
                    return Err(SegError::transform_failed(
                        self.name(),
                        format!("channel_dim {channel} out of range for a 4-d tensor"),
                    ));
                }
                let channel = channel as usize;
                if channel == 0 {
                    return Ok(data);
                }
                let mut perm: Vec<usize> = vec![channel];
                perm.extend((0..data.ndim()).filter(|&axis| axis != channel));
                Ok(data
                    .permuted_axes(perm.as_slice())
                    .as_standard_layout()
                    .into_owned())
            }
            other => Err(SegError::transform_failed(
                self.name(),
                format!("expected a 3-d or 4-d tensor, got {other} dims"),
            )),
        }
    }
}

impl Transform for EnsureChannelFirst {
    fn name(&self) -> &'static str {
        "EnsureChannelFirstd"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let data = record.take_tensor(self.name(), key)?;
            let data = self.rearrange(data)?;
            record.insert_tensor(key.clone(), data);
        }
        Ok(record)
    }
}

/// Interpolation mode for [`Resize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpMode {
    Nearest,
    Trilinear,
}

/// Resamples each channel onto a fixed spatial shape.
#[derive(Debug)]
pub struct Resize {
    keys: Vec<String>,
    spatial_size: [usize; 3],
    mode: InterpMode,
    align_corners: bool,
}

impl Resize {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "Resized";
        let spatial_size = registry::optional_shape3(args, "spatial_size", component)?
            .ok_or_else(|| {
                SegError::config(format!("component '{component}': 'spatial_size' is required"))
            })?;
        if spatial_size.iter().any(|&d| d == 0) {
            return Err(SegError::config(format!(
                "component '{component}': 'spatial_size' must be positive"
            )));
        }
        let mode = match registry::optional_string(args, "mode", component)?.as_deref() {
            None | Some("trilinear") | Some("linear") => InterpMode::Trilinear,
            Some("nearest") => InterpMode::Nearest,
            Some(other) => {
                return Err(SegError::config(format!(
                    "component '{component}': unsupported mode '{other}' (accepted: nearest, trilinear)"
                )))
            }
        };
        Ok(Self {
            keys: registry::keys(args, component)?,
            spatial_size,
            mode,
            align_corners: registry::bool_or(args, "align_corners", false, component)?,
        })
    }

    fn resize_volume(&self, volume: ArrayView3<'_, f32>) -> Array3<f32> {
        match self.mode {
            InterpMode::Nearest => resample_nearest(volume, self.spatial_size),
            InterpMode::Trilinear => {
                resample_trilinear(volume, self.spatial_size, self.align_corners)
            }
        }
    }
}

impl Transform for Resize {
    fn name(&self) -> &'static str {
        "Resized"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let data = record.take_tensor(self.name(), key)?;
            let resized = match data.ndim() {
                3 => {
                    let volume = data
                        .view()
                        .into_dimensionality::<Ix3>()
                        .map_err(SegError::Tensor)?;
                    self.resize_volume(volume).into_dyn()
                }
                4 => {
                    let channels = data.shape()[0];
                    let [d, h, w] = self.spatial_size;
                    let mut out = ArrayD::<f32>::zeros(vec![channels, d, h, w]);
                    for c in 0..channels {
                        let volume = data
                            .index_axis(Axis(0), c)
                            .into_dimensionality::<Ix3>()
                            .map_err(SegError::Tensor)?;
                        out.index_axis_mut(Axis(0), c)
                            .assign(&self.resize_volume(volume));
                    }
                    out
                }
                other => {
                    return Err(SegError::transform_failed(
                        self.name(),
                        format!("expected a 3-d or 4-d tensor, got {other} dims"),
                    ))
                }
            };
            record.insert_tensor(key.clone(), resized);
        }
        Ok(record)
    }
}

/// Nearest-neighbour resampling with pixel-center index mapping.
pub fn resample_nearest(src: ArrayView3<'_, f32>, target: [usize; 3]) -> Array3<f32> {
    let (sd, sh, sw) = src.dim();
    let [td, th, tw] = target;
    if (sd, sh, sw) == (td, th, tw) {
        return src.to_owned();
    }
    let map = |i: usize, src_len: usize, dst_len: usize| -> usize {
        let scale = src_len as f64 / dst_len as f64;
        (((i as f64 + 0.5) * scale) as usize).min(src_len - 1)
    };
    Array3::from_shape_fn((td, th, tw), |(z, y, x)| {
        src[[map(z, sd, td), map(y, sh, th), map(x, sw, tw)]]
    })
}

/// Trilinear resampling.
///
/// With `align_corners` the first and last samples of each axis coincide
/// with the source corners; otherwise pixel-center mapping is used and
/// out-of-range coordinates clamp to the border.
pub fn resample_trilinear(
    src: ArrayView3<'_, f32>,
    target: [usize; 3],
    align_corners: bool,
) -> Array3<f32> {
    let (sd, sh, sw) = src.dim();
    let [td, th, tw] = target;
    if (sd, sh, sw) == (td, th, tw) {
        return src.to_owned();
    }
    let coord = |i: usize, src_len: usize, dst_len: usize| -> f64 {
        if align_corners {
            if dst_len <= 1 {
                0.0
            } else {
                i as f64 * (src_len - 1) as f64 / (dst_len - 1) as f64
            }
        } else {
            let scale = src_len as f64 / dst_len as f64;
            ((i as f64 + 0.5) * scale - 0.5).clamp(0.0, (src_len - 1) as f64)
        }
    };
    Array3::from_shape_fn((td, th, tw), |(z, y, x)| {
        let cz = coord(z, sd, td);
        let cy = coord(y, sh, th);
        let cx = coord(x, sw, tw);
        let (z0, y0, x0) = (cz as usize, cy as usize, cx as usize);
        let (z1, y1, x1) = (
            (z0 + 1).min(sd - 1),
            (y0 + 1).min(sh - 1),
            (x0 + 1).min(sw - 1),
        );
        let (fz, fy, fx) = (
            (cz - z0 as f64) as f32,
            (cy - y0 as f64) as f32,
            (cx - x0 as f64) as f32,
        );
        let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
        let c00 = lerp(src[[z0, y0, x0]], src[[z0, y0, x1]], fx);
        let c01 = lerp(src[[z0, y1, x0]], src[[z0, y1, x1]], fx);
        let c10 = lerp(src[[z1, y0, x0]], src[[z1, y0, x1]], fx);
        let c11 = lerp(src[[z1, y1, x0]], src[[z1, y1, x1]], fx);
        lerp(lerp(c00, c01, fy), lerp(c10, c11, fy), fz)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array4};
    use serde_json::json;

    fn args(value: serde_json::Value) -> ArgTable {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn three_dims_gain_a_channel_axis() {
        let transform = EnsureChannelFirst::from_args(&ArgTable::new()).unwrap();
        let mut record = DataRecord::new();
        record.insert_tensor("image", ArrayD::<f32>::zeros(vec![4, 5, 6]));
        let out = transform.apply(record).unwrap();
        assert_eq!(out.tensor("image").unwrap().shape(), &[1, 4, 5, 6]);
    }

    #[test]
    fn channel_last_moves_to_front() {
        let transform = EnsureChannelFirst::from_args(&ArgTable::new()).unwrap();
        let mut data = Array4::<f32>::zeros((4, 5, 6, 2));
        data[[1, 2, 3, 1]] = 9.0;
        let mut record = DataRecord::new();
        record.insert_tensor("image", data.into_dyn());
        let out = transform.apply(record).unwrap();
        let moved = out.tensor("image").unwrap();
        assert_eq!(moved.shape(), &[2, 4, 5, 6]);
        assert_eq!(moved[[1, 1, 2, 3]], 9.0);
    }

    #[test]
    fn explicit_channel_dim_zero_is_a_no_op() {
        let transform = EnsureChannelFirst::from_args(&args(json!({"channel_dim": 0}))).unwrap();
        let mut record = DataRecord::new();
        record.insert_tensor("image", ArrayD::<f32>::zeros(vec![2, 4, 5, 6]));
        let out = transform.apply(record).unwrap();
        assert_eq!(out.tensor("image").unwrap().shape(), &[2, 4, 5, 6]);
    }

    #[test]
    fn nearest_resampling_picks_the_closest_voxel() {
        let src = array![[[0.0f32, 1.0], [2.0, 3.0]], [[4.0, 5.0], [6.0, 7.0]]];
        let out = resample_nearest(src.view(), [1, 1, 1]);
        assert_eq!(out[[0, 0, 0]], 7.0);
        let same = resample_nearest(src.view(), [2, 2, 2]);
        assert_eq!(same, src);
    }

    #[test]
    fn trilinear_upsampling_interpolates_between_samples() {
        let src = Array3::from_shape_vec((1, 1, 2), vec![0.0f32, 1.0]).unwrap();
        let out = resample_trilinear(src.view(), [1, 1, 4], false);
        let got: Vec<f32> = out.iter().copied().collect();
        assert_eq!(got, vec![0.0, 0.25, 0.75, 1.0]);
        let corners = resample_trilinear(src.view(), [1, 1, 4], true);
        let got: Vec<f32> = corners.iter().copied().collect();
        assert!((got[1] - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(got[3], 1.0);
    }

    #[test]
    fn resize_keeps_channels_separate() {
        let transform = Resize::from_args(&args(json!({
            "spatial_size": [2, 2, 2], "mode": "nearest"
        })))
        .unwrap();
        let mut data = Array4::<f32>::zeros((2, 4, 4, 4));
        data.index_axis_mut(Axis(0), 1).fill(5.0);
        let mut record = DataRecord::new();
        record.insert_tensor("image", data.into_dyn());
        let out = transform.apply(record).unwrap();
        let resized = out.tensor("image").unwrap();
        assert_eq!(resized.shape(), &[2, 2, 2, 2]);
        assert_eq!(resized[[0, 0, 0, 0]], 0.0);
        assert_eq!(resized[[1, 1, 1, 1]], 5.0);
    }
}
