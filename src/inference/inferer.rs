//! Inference drivers: whole-volume and overlapping sliding-window.

use itertools::iproduct;
use ndarray::{concatenate, s, Array1, Array3, Array5, Axis};

use crate::core::errors::{SegError, SegResult};
use crate::inference::network::VolumeNetwork;
use crate::transforms::registry::{self, ArgTable};

/// How overlapping window predictions are blended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Every voxel of a window contributes equally.
    Constant,
    /// Voxels near the window centre outweigh the borders.
    Gaussian,
}

/// Sliding-window inference over `[N, C, D, H, W]` volumes.
///
/// The volume is padded up to the window size when needed, scanned with a
/// stride of `roi * (1 - overlap)`, and the final window of each axis is
/// pulled flush with the border. Overlaps are blended by the configured
/// importance map and renormalized at the end.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlidingWindowInferer {
    pub roi_size: [usize; 3],
    pub sw_batch_size: usize,
    pub overlap: f64,
    pub mode: BlendMode,
    pub sigma_scale: f64,
}

impl Default for SlidingWindowInferer {
    fn default() -> Self {
        Self {
            roi_size: [96, 96, 96],
            sw_batch_size: 1,
            overlap: 0.25,
            mode: BlendMode::Constant,
            sigma_scale: 0.125,
        }
    }
}

impl SlidingWindowInferer {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "SlidingWindowInferer";
        let roi_size = registry::optional_shape3(args, "roi_size", component)?.ok_or_else(|| {
            SegError::config(format!("component '{component}': 'roi_size' is required"))
        })?;
        if roi_size.iter().any(|&d| d == 0) {
            return Err(SegError::config(format!(
                "component '{component}': 'roi_size' must be positive"
            )));
        }
        let overlap = registry::optional_f64(args, "overlap", component)?.unwrap_or(0.25);
        if !(0.0..1.0).contains(&overlap) {
            return Err(SegError::config(format!(
                "component '{component}': 'overlap' must lie in [0, 1), got {overlap}"
            )));
        }
        let sw_batch_size = registry::optional_usize(args, "sw_batch_size", component)?.unwrap_or(1);
        if sw_batch_size == 0 {
            return Err(SegError::config(format!(
                "component '{component}': 'sw_batch_size' must be positive"
            )));
        }
        let mode = match registry::optional_string(args, "mode", component)?.as_deref() {
            None | Some("constant") => BlendMode::Constant,
            Some("gaussian") => BlendMode::Gaussian,
            Some(other) => {
                return Err(SegError::config(format!(
                    "component '{component}': unsupported mode '{other}' (accepted: constant, gaussian)"
                )))
            }
        };
        Ok(Self {
            roi_size,
            sw_batch_size,
            overlap,
            mode,
            sigma_scale: registry::optional_f64(args, "sigma_scale", component)?.unwrap_or(0.125),
        })
    }

    /// Runs the window scan, calling `forward` on `[n, C, rz, ry, rx]`
    /// batches of up to `sw_batch_size` windows.
    pub(crate) fn run<F>(&self, input: &Array5<f32>, mut forward: F) -> SegResult<Array5<f32>>
    where
        F: FnMut(&Array5<f32>) -> SegResult<Array5<f32>>,
    {
        let (batch, channels, d, h, w) = input.dim();
        if batch != 1 {
            return Err(SegError::invalid_input(format!(
                "sliding-window inference expects a single-item batch, got {batch}"
            )));
        }
        let [rz, ry, rx] = self.roi_size;
        let (pd, ph, pw) = (d.max(rz), h.max(ry), w.max(rx));
        let (oz, oy, ox) = ((pd - d) / 2, (ph - h) / 2, (pw - w) / 2);

        // Pad symmetrically with zeros up to the window size.
        let padded = if (pd, ph, pw) == (d, h, w) {
            input.clone()
        } else {
            let mut padded = Array5::<f32>::zeros((1, channels, pd, ph, pw));
            padded
                .slice_mut(s![.., .., oz..oz + d, oy..oy + h, ox..ox + w])
                .assign(input);
            padded
        };

        let starts_z = window_starts(pd, rz, self.overlap);
        let starts_y = window_starts(ph, ry, self.overlap);
        let starts_x = window_starts(pw, rx, self.overlap);
        let origins: Vec<_> = iproduct!(starts_z, starts_y, starts_x).collect();
        tracing::debug!(
            windows = origins.len(),
            roi = ?self.roi_size,
            overlap = self.overlap,
            "scanning volume"
        );

        let importance = self.importance_map();
        let mut acc: Option<Array5<f32>> = None;
        let mut weight = Array3::<f32>::zeros((pd, ph, pw));

        for chunk in origins.chunks(self.sw_batch_size) {
            let windows: Vec<_> = chunk
                .iter()
                .map(|&(z, y, x)| padded.slice(s![.., .., z..z + rz, y..y + ry, x..x + rx]))
                .collect();
            let stacked = concatenate(Axis(0), &windows).map_err(SegError::Tensor)?;
            let output = forward(&stacked)?;
            let (n_out, c_out, vz, vy, vx) = output.dim();
            if n_out != windows.len() || (vz, vy, vx) != (rz, ry, rx) {
                return Err(SegError::invalid_input(format!(
                    "network turned {} windows of {:?} into output {:?}",
                    windows.len(),
                    (rz, ry, rx),
                    output.shape()
                )));
            }
            let acc = acc.get_or_insert_with(|| Array5::<f32>::zeros((1, c_out, pd, ph, pw)));
            if acc.dim().1 != c_out {
                return Err(SegError::invalid_input(
                    "network changed its output channel count between windows",
                ));
            }
            for (i, &(z, y, x)) in chunk.iter().enumerate() {
                let window_out = output.index_axis(Axis(0), i);
                let mut region = acc.slice_mut(s![0, .., z..z + rz, y..y + ry, x..x + rx]);
                let broadcast_map = importance.view().insert_axis(Axis(0));
                ndarray::Zip::from(&mut region)
                    .and(&window_out)
                    .and_broadcast(&broadcast_map)
                    .for_each(|r, &o, &m| *r += o * m);
                let mut wregion = weight.slice_mut(s![z..z + rz, y..y + ry, x..x + rx]);
                wregion += &importance;
            }
        }

        let mut acc = match acc {
            Some(acc) => acc,
            None => return Err(SegError::invalid_input("volume produced no scan windows")),
        };
        for mut channel in acc.index_axis_mut(Axis(0), 0).axis_iter_mut(Axis(0)) {
            channel /= &weight;
        }
        Ok(acc
            .slice(s![.., .., oz..oz + d, oy..oy + h, ox..ox + w])
            .to_owned())
    }

    /// The per-window blend weights.
    fn importance_map(&self) -> Array3<f32> {
        let [rz, ry, rx] = self.roi_size;
        match self.mode {
            BlendMode::Constant => Array3::ones((rz, ry, rx)),
            BlendMode::Gaussian => {
                let gz = gaussian_1d(rz, self.sigma_scale);
                let gy = gaussian_1d(ry, self.sigma_scale);
                let gx = gaussian_1d(rx, self.sigma_scale);
                Array3::from_shape_fn((rz, ry, rx), |(z, y, x)| gz[z] * gy[y] * gx[x])
            }
        }
    }
}

/// Window origin offsets along one axis: stride `roi * (1 - overlap)`,
/// final window flush with the border.
pub(crate) fn window_starts(dim: usize, roi: usize, overlap: f64) -> Vec<usize> {
    if roi >= dim {
        return vec![0];
    }
    let stride = ((roi as f64) * (1.0 - overlap)).floor() as usize;
    let stride = stride.max(1);
    let mut starts = Vec::new();
    let mut start = 0;
    loop {
        if start + roi >= dim {
            starts.push(dim - roi);
            break;
        }
        starts.push(start);
        start += stride;
    }
    starts
}

/// A centred gaussian profile normalized to peak 1.
fn gaussian_1d(len: usize, sigma_scale: f64) -> Array1<f32> {
    let sigma = (sigma_scale * len as f64).max(f64::EPSILON);
    let center = (len as f64 - 1.0) / 2.0;
    Array1::from_shape_fn(len, |i| {
        let d = (i as f64 - center) / sigma;
        (-0.5 * d * d).exp() as f32
    })
}

/// The inference driver selected by a bundle config.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inferer {
    /// One forward pass over the whole volume.
    Simple,
    /// Overlapping window scan.
    SlidingWindow(SlidingWindowInferer),
}

impl Default for Inferer {
    fn default() -> Self {
        Inferer::SlidingWindow(SlidingWindowInferer::default())
    }
}

impl Inferer {
    pub fn infer(&self, input: &Array5<f32>, network: &VolumeNetwork) -> SegResult<Array5<f32>> {
        match self {
            Inferer::Simple => network.forward(input),
            Inferer::SlidingWindow(sw) => sw.run(input, |windows| network.forward(windows)),
        }
    }
}
