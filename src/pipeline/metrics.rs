//! Segmentation quality metrics.

use ndarray::{ArrayD, Axis, Ix3};

#[cfg(feature = "hausdorff")]
use ndarray::Array3;

use crate::core::errors::{SegError, SegResult};
use crate::transforms::registry::{self, ArgTable};

/// Smoothing term keeping empty-mask scores finite and non-zero.
pub const DICE_EPSILON: f64 = 1e-6;

/// Binarization settings for metric evaluation.
///
/// File-based evaluation consumes the `sigmoid` flag (applied to the
/// prediction before thresholding); the remaining fields mirror the bundle
/// vocabulary so declared settings round-trip even when they have no
/// effect on mask-vs-mask scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiceHelper {
    pub include_background: bool,
    pub sigmoid: bool,
    pub softmax: bool,
    pub ignore_empty: bool,
    pub num_classes: Option<usize>,
}

impl Default for DiceHelper {
    fn default() -> Self {
        Self {
            include_background: true,
            sigmoid: false,
            softmax: false,
            ignore_empty: true,
            num_classes: None,
        }
    }
}

impl DiceHelper {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "DiceHelper";
        let defaults = Self::default();
        Ok(Self {
            include_background: registry::bool_or(
                args,
                "include_background",
                defaults.include_background,
                component,
            )?,
            sigmoid: registry::bool_or(args, "sigmoid", defaults.sigmoid, component)?,
            softmax: registry::bool_or(args, "softmax", defaults.softmax, component)?,
            ignore_empty: registry::bool_or(
                args,
                "ignore_empty",
                defaults.ignore_empty,
                component,
            )?,
            num_classes: registry::optional_usize(args, "num_classes", component)?,
        })
    }

    /// Binarizes a prediction: optional sigmoid, then `> 0.5`.
    pub fn binarize_pred(&self, data: &ArrayD<f32>) -> ArrayD<f32> {
        data.mapv(|v| {
            let v = if self.sigmoid { 1.0 / (1.0 + (-v).exp()) } else { v };
            if v > 0.5 {
                1.0
            } else {
                0.0
            }
        })
    }
}

/// Plain `> 0.5` binarization for reference labels.
pub fn binarize_label(data: &ArrayD<f32>) -> ArrayD<f32> {
    data.mapv(|v| if v > 0.5 { 1.0 } else { 0.0 })
}

/// Dice coefficient over two equally shaped binary masks.
pub fn dice_score(pred: &ArrayD<f32>, target: &ArrayD<f32>) -> SegResult<f64> {
    if pred.shape() != target.shape() {
        return Err(SegError::invalid_input(format!(
            "dice inputs disagree in shape: {:?} vs {:?}",
            pred.shape(),
            target.shape()
        )));
    }
    let mut intersection = 0.0f64;
    let mut total = 0.0f64;
    for (&p, &t) in pred.iter().zip(target.iter()) {
        let p = f64::from(p);
        let t = f64::from(t);
        intersection += p * t;
        total += p + t;
    }
    Ok((2.0 * intersection + DICE_EPSILON) / (total + DICE_EPSILON))
}

/// Collapses a mask tensor to three spatial dimensions: leading singleton
/// axes are dropped, a genuine channel axis folds by any-class maximum.
pub fn collapse_to_mask(mut data: ArrayD<f32>) -> SegResult<ArrayD<f32>> {
    while data.ndim() > 3 && data.shape()[0] == 1 {
        data = data.index_axis_move(Axis(0), 0);
    }
    while data.ndim() > 3 {
        data = data.map_axis(Axis(0), |lane| {
            lane.iter().fold(0.0f32, |acc, &v| acc.max(v))
        });
    }
    if data.ndim() != 3 {
        return Err(SegError::invalid_input(format!(
            "expected a volumetric mask, got {} dims",
            data.ndim()
        )));
    }
    Ok(data)
}

/// Resamples `label` onto `shape` by nearest neighbour when it disagrees.
pub fn align_label(label: ArrayD<f32>, shape: &[usize]) -> SegResult<ArrayD<f32>> {
    if label.shape() == shape {
        return Ok(label);
    }
    if shape.len() != 3 {
        return Err(SegError::invalid_input(
            "label alignment needs a three-dimensional target shape",
        ));
    }
    let volume = label.view().into_dimensionality::<Ix3>().map_err(SegError::Tensor)?;
    let resampled =
        crate::transforms::resample_nearest(volume, [shape[0], shape[1], shape[2]]);
    Ok(resampled.into_dyn())
}

/// Scores one prediction/label pair: dice plus, when compiled in, the
/// 95th-percentile Hausdorff distance.
pub fn score_pair(
    pred: &ArrayD<f32>,
    label: &ArrayD<f32>,
    helper: &DiceHelper,
) -> SegResult<(f64, Option<f64>)> {
    let pred_mask = collapse_to_mask(helper.binarize_pred(pred))?;
    let label_mask = collapse_to_mask(binarize_label(label))?;
    let label_mask = align_label(label_mask, pred_mask.shape())?;
    let dice = dice_score(&pred_mask, &label_mask)?;
    let hausdorff = hausdorff_if_enabled(&pred_mask, &label_mask);
    Ok((dice, hausdorff))
}

#[cfg(feature = "hausdorff")]
fn hausdorff_if_enabled(pred: &ArrayD<f32>, label: &ArrayD<f32>) -> Option<f64> {
    let pred = pred.view().into_dimensionality::<Ix3>().ok()?;
    let label = label.view().into_dimensionality::<Ix3>().ok()?;
    hausdorff95(&pred.to_owned(), &label.to_owned())
}

#[cfg(not(feature = "hausdorff"))]
fn hausdorff_if_enabled(_pred: &ArrayD<f32>, _label: &ArrayD<f32>) -> Option<f64> {
    None
}

/// 95th-percentile symmetric Hausdorff distance between two binary masks.
///
/// Mask boundaries are extracted by 6-neighbour erosion, voxel distances
/// come from an exact Euclidean distance transform, and the nearest-rank
/// 95th percentile is taken over each directed direction; the result is
/// the larger of the two. Returns `None` when either mask is empty.
#[cfg(feature = "hausdorff")]
pub fn hausdorff95(pred: &Array3<f32>, target: &Array3<f32>) -> Option<f64> {
    if pred.dim() != target.dim() {
        return None;
    }
    let (pred_edges, pred_voxels) = boundary(pred);
    let (target_edges, target_voxels) = boundary(target);
    if pred_voxels.is_empty() || target_voxels.is_empty() {
        return None;
    }
    let to_target = squared_distance_field(&target_edges);
    let to_pred = squared_distance_field(&pred_edges);
    let forward = directed_percentile(&pred_voxels, &to_target);
    let backward = directed_percentile(&target_voxels, &to_pred);
    Some(forward.max(backward))
}

/// Boundary voxels of a mask: set voxels with at least one 6-neighbour
/// outside the mask (the volume border counts as outside).
#[cfg(feature = "hausdorff")]
fn boundary(mask: &Array3<f32>) -> (Array3<bool>, Vec<[usize; 3]>) {
    let (d, h, w) = mask.dim();
    let set = |z: isize, y: isize, x: isize| -> bool {
        z >= 0
            && y >= 0
            && x >= 0
            && (z as usize) < d
            && (y as usize) < h
            && (x as usize) < w
            && mask[[z as usize, y as usize, x as usize]] > 0.5
    };
    let mut edges = Array3::from_elem((d, h, w), false);
    let mut voxels = Vec::new();
    for z in 0..d {
        for y in 0..h {
            for x in 0..w {
                if mask[[z, y, x]] <= 0.5 {
                    continue;
                }
                let (zi, yi, xi) = (z as isize, y as isize, x as isize);
                let interior = set(zi - 1, yi, xi)
                    && set(zi + 1, yi, xi)
                    && set(zi, yi - 1, xi)
                    && set(zi, yi + 1, xi)
                    && set(zi, yi, xi - 1)
                    && set(zi, yi, xi + 1);
                if !interior {
                    edges[[z, y, x]] = true;
                    voxels.push([z, y, x]);
                }
            }
        }
    }
    (edges, voxels)
}

/// Exact squared Euclidean distance to the nearest seed, via the
/// separable lower-envelope transform applied along each axis in turn.
/// Lanes are independent, so each pass runs them in parallel.
#[cfg(feature = "hausdorff")]
fn squared_distance_field(seeds: &Array3<bool>) -> Array3<f64> {
    let (d, h, w) = seeds.dim();
    // Finite stand-in for "unreached", beyond any achievable squared distance.
    let far = (d * d + h * h + w * w) as f64 + 1.0;
    let mut field =
        Array3::from_shape_fn((d, h, w), |idx| if seeds[idx] { 0.0 } else { far });
    for axis in 0..3 {
        ndarray::Zip::from(field.lanes_mut(Axis(axis))).par_for_each(|mut lane| {
            let f: Vec<f64> = lane.iter().copied().collect();
            let transformed = distance_transform_1d(&f);
            for (dst, src) in lane.iter_mut().zip(transformed) {
                *dst = src;
            }
        });
    }
    field
}

/// One-dimensional squared distance transform of a sampled function.
#[cfg(feature = "hausdorff")]
fn distance_transform_1d(f: &[f64]) -> Vec<f64> {
    let n = f.len();
    if n == 1 {
        return f.to_vec();
    }
    let mut d = vec![0.0; n];
    let mut v = vec![0usize; n];
    let mut z = vec![0.0f64; n + 1];
    let mut k = 0usize;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersection_point(f, q, v[k]);
        while s <= z[k] {
            k -= 1;
            s = intersection_point(f, q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }
    k = 0;
    for (q, out) in d.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dq = q as f64 - v[k] as f64;
        *out = dq * dq + f[v[k]];
    }
    d
}

#[cfg(feature = "hausdorff")]
fn intersection_point(f: &[f64], q: usize, p: usize) -> f64 {
    let (qf, pf) = (q as f64, p as f64);
    ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
}

/// Nearest-rank 95th percentile of the distances from `voxels` into
/// `field`.
#[cfg(feature = "hausdorff")]
fn directed_percentile(voxels: &[[usize; 3]], field: &Array3<f64>) -> f64 {
    let mut distances: Vec<f64> = voxels
        .iter()
        .map(|&[z, y, x]| field[[z, y, x]].sqrt())
        .collect();
    distances.sort_by(f64::total_cmp);
    let rank = ((0.95 * distances.len() as f64).ceil() as usize).max(1) - 1;
    distances[rank.min(distances.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> ArgTable {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn cube(shape: (usize, usize, usize), lo: usize, hi: usize) -> ArrayD<f32> {
        ArrayD::from_shape_fn(vec![shape.0, shape.1, shape.2], |idx| {
            let inside = (lo..hi).contains(&idx[0])
                && (lo..hi).contains(&idx[1])
                && (lo..hi).contains(&idx[2]);
            if inside {
                1.0
            } else {
                0.0
            }
        })
    }

    #[test]
    fn identical_masks_score_one() {
        let mask = cube((8, 8, 8), 2, 6);
        let dice = dice_score(&mask, &mask).unwrap();
        assert!((dice - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_masks_score_epsilon_not_zero() {
        let a = cube((8, 8, 8), 0, 2);
        let b = cube((8, 8, 8), 4, 6);
        let dice = dice_score(&a, &b).unwrap();
        assert!(dice > 0.0);
        let volume = a.sum() as f64 + b.sum() as f64;
        let expected = DICE_EPSILON / (volume + DICE_EPSILON);
        assert!((dice - expected).abs() < 1e-12);
    }

    #[test]
    fn mismatched_labels_are_resampled_to_the_prediction() {
        let pred = cube((10, 10, 10), 2, 8);
        let label = cube((12, 12, 12), 2, 10);
        let aligned = align_label(label, pred.shape()).unwrap();
        assert_eq!(aligned.shape(), pred.shape());
        let (dice, _) = score_pair(&pred, &cube((12, 12, 12), 2, 10), &DiceHelper::default())
            .unwrap();
        assert!(dice > 0.5);
    }

    #[test]
    fn helper_applies_sigmoid_before_thresholding() {
        let helper = DiceHelper::from_args(&args(json!({"sigmoid": true}))).unwrap();
        let logits = ArrayD::from_shape_vec(vec![2], vec![-2.0f32, 2.0]).unwrap();
        let mask = helper.binarize_pred(&logits);
        assert_eq!(mask.as_slice().unwrap(), &[0.0, 1.0]);

        let plain = DiceHelper::default().binarize_pred(&logits);
        assert_eq!(plain.as_slice().unwrap(), &[0.0, 1.0]);
    }

    #[test]
    fn channel_masks_collapse_to_foreground() {
        let data = ArrayD::from_shape_fn(vec![2, 4, 4, 4], |idx| {
            if idx[0] == 1 && idx[1] < 2 {
                1.0
            } else {
                0.0
            }
        });
        let collapsed = collapse_to_mask(data).unwrap();
        assert_eq!(collapsed.shape(), &[4, 4, 4]);
        assert_eq!(collapsed[[0, 0, 0]], 1.0);
        assert_eq!(collapsed[[3, 0, 0]], 0.0);
    }

    #[cfg(feature = "hausdorff")]
    mod hausdorff {
        use super::*;
        use ndarray::Array3;

        fn plane(x: usize) -> Array3<f32> {
            Array3::from_shape_fn((8, 8, 8), |(_, _, xx)| if xx == x { 1.0 } else { 0.0 })
        }

        #[test]
        fn identical_masks_have_zero_distance() {
            let mask = plane(3);
            assert_eq!(hausdorff95(&mask, &mask), Some(0.0));
        }

        #[test]
        fn parallel_planes_measure_their_separation() {
            let h = hausdorff95(&plane(3), &plane(5)).unwrap();
            assert!((h - 2.0).abs() < 1e-9);
        }

        #[test]
        fn empty_masks_yield_no_distance() {
            let empty = Array3::<f32>::zeros((8, 8, 8));
            assert_eq!(hausdorff95(&plane(3), &empty), None);
            assert_eq!(hausdorff95(&empty, &empty), None);
        }

        #[test]
        fn the_transform_is_exact_on_a_line() {
            let f = vec![81.0, 0.0, 81.0, 81.0, 81.0];
            let d = distance_transform_1d(&f);
            assert_eq!(d, vec![1.0, 0.0, 1.0, 4.0, 9.0]);
        }
    }
}
