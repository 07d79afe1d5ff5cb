//! NIfTI volume input and output.
//!
//! Thin wrapper over the `nifti` crate: volumes load as `f32` tensors next
//! to their header and decoded spatial affines, and tensors save back with a
//! chosen affine and optional reference header. Compression is inferred from
//! the `.gz` extension.
//!
//! The best affine follows NIfTI precedence: the sform when its code is
//! positive, else the qform, else a diagonal built from the voxel spacing.

use ndarray::ArrayD;
use nifti::{DataElement, IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

use crate::core::errors::SegResult;
use crate::core::record::Affine;

/// A volume read from disk together with its spatial frame.
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    /// Voxel data, converted to `f32` with any header scaling applied.
    pub data: ArrayD<f32>,
    /// The raw NIfTI header.
    pub header: NiftiHeader,
    /// The preferred voxel-to-world affine.
    pub affine: Affine,
    /// The quaternion-method affine, when the header declares one.
    pub qform: Option<Affine>,
    /// The sform affine, when the header declares one.
    pub sform: Option<Affine>,
}

/// Reads a NIfTI volume from `path`.
pub fn load_volume(path: impl AsRef<Path>) -> SegResult<LoadedVolume> {
    let path = path.as_ref();
    let object = ReaderOptions::new().read_file(path)?;
    let header = object.header().clone();
    let data = object.into_volume().into_ndarray::<f32>()?;

    let qform = qform_affine(&header);
    let sform = sform_affine(&header);
    let affine = sform.or(qform).unwrap_or_else(|| base_affine(&header));

    Ok(LoadedVolume {
        data,
        header,
        affine,
        qform,
        sform,
    })
}

/// Writes a volume to `path` with the given affine.
///
/// When a reference header is supplied its fields are carried over; the
/// affine always wins over whatever frame the reference declared. Scaling
/// fields are neutralized because the written data is raw.
pub fn save_volume<A: DataElement + bytemuck::Pod>(
    path: impl AsRef<Path>,
    data: &ArrayD<A>,
    affine: &Affine,
    reference: Option<&NiftiHeader>,
) -> SegResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut header = reference.cloned().unwrap_or_default();
    header.scl_slope = 1.0;
    header.scl_inter = 0.0;
    write_sform(&mut header, affine);

    nifti::writer::WriterOptions::new(path)
        .reference_header(&header)
        .write_nifti(data)?;
    Ok(())
}

/// Encodes `affine` into the header's sform rows. The qform is dropped so
/// the two frames cannot disagree; readers take the sform first.
fn write_sform(header: &mut NiftiHeader, affine: &Affine) {
    header.sform_code = 2;
    header.qform_code = 0;
    header.srow_x = [
        affine[(0, 0)] as f32,
        affine[(0, 1)] as f32,
        affine[(0, 2)] as f32,
        affine[(0, 3)] as f32,
    ];
    header.srow_y = [
        affine[(1, 0)] as f32,
        affine[(1, 1)] as f32,
        affine[(1, 2)] as f32,
        affine[(1, 3)] as f32,
    ];
    header.srow_z = [
        affine[(2, 0)] as f32,
        affine[(2, 1)] as f32,
        affine[(2, 2)] as f32,
        affine[(2, 3)] as f32,
    ];
    for column in 0..3 {
        let spacing = (affine[(0, column)].powi(2)
            + affine[(1, column)].powi(2)
            + affine[(2, column)].powi(2))
        .sqrt();
        header.pixdim[column + 1] = spacing as f32;
    }
}

/// Returns true when `path` looks like a NIfTI volume.
pub fn is_nifti(path: impl AsRef<Path>) -> bool {
    let name = match path.as_ref().file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

/// Returns the filename with any `.nii` / `.nii.gz` extension stripped.
pub fn nifti_stem(path: impl AsRef<Path>) -> String {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(".nii.gz") {
        stem.to_string()
    } else if let Some(stem) = name.strip_suffix(".nii") {
        stem.to_string()
    } else {
        name.to_string()
    }
}

/// Decodes the sform affine from the header's row fields.
pub fn sform_affine(header: &NiftiHeader) -> Option<Affine> {
    if header.sform_code <= 0 {
        return None;
    }
    let x = header.srow_x;
    let y = header.srow_y;
    let z = header.srow_z;
    Some(Affine::new(
        x[0] as f64, x[1] as f64, x[2] as f64, x[3] as f64,
        y[0] as f64, y[1] as f64, y[2] as f64, y[3] as f64,
        z[0] as f64, z[1] as f64, z[2] as f64, z[3] as f64,
        0.0, 0.0, 0.0, 1.0,
    ))
}

/// Decodes the qform affine using the NIfTI quaternion method.
pub fn qform_affine(header: &NiftiHeader) -> Option<Affine> {
    if header.qform_code <= 0 {
        return None;
    }
    let b = header.quatern_b as f64;
    let c = header.quatern_c as f64;
    let d = header.quatern_d as f64;
    let a = (1.0 - b * b - c * c - d * d).max(0.0).sqrt();

    // pixdim[0] carries the qfac handedness flag.
    let qfac = if (header.pixdim[0] as f64) < 0.0 { -1.0 } else { 1.0 };
    let sx = header.pixdim[1] as f64;
    let sy = header.pixdim[2] as f64;
    let sz = header.pixdim[3] as f64 * qfac;

    let r = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * b * c - 2.0 * a * d,
            2.0 * b * d + 2.0 * a * c,
        ],
        [
            2.0 * b * c + 2.0 * a * d,
            a * a + c * c - b * b - d * d,
            2.0 * c * d - 2.0 * a * b,
        ],
        [
            2.0 * b * d - 2.0 * a * c,
            2.0 * c * d + 2.0 * a * b,
            a * a + d * d - b * b - c * c,
        ],
    ];

    Some(Affine::new(
        r[0][0] * sx, r[0][1] * sy, r[0][2] * sz, header.quatern_x as f64,
        r[1][0] * sx, r[1][1] * sy, r[1][2] * sz, header.quatern_y as f64,
        r[2][0] * sx, r[2][1] * sy, r[2][2] * sz, header.quatern_z as f64,
        0.0, 0.0, 0.0, 1.0,
    ))
}

/// Fallback affine built from the voxel spacing alone.
pub fn base_affine(header: &NiftiHeader) -> Affine {
    let sx = header.pixdim[1] as f64;
    let sy = header.pixdim[2] as f64;
    let sz = header.pixdim[3] as f64;
    Affine::new(
        sx, 0.0, 0.0, 0.0,
        0.0, sy, 0.0, 0.0,
        0.0, 0.0, sz, 0.0,
        0.0, 0.0, 0.0, 1.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn stem_strips_both_extensions() {
        assert_eq!(nifti_stem("/data/case_01.nii.gz"), "case_01");
        assert_eq!(nifti_stem("/data/case_01.nii"), "case_01");
        assert_eq!(nifti_stem("case_01.seg.nii.gz"), "case_01.seg");
        assert_eq!(nifti_stem("README.md"), "README.md");
    }

    #[test]
    fn is_nifti_checks_extensions_case_insensitively() {
        assert!(is_nifti("a.nii"));
        assert!(is_nifti("a.NII.GZ"));
        assert!(!is_nifti("a.mha"));
        assert!(!is_nifti("a.gz"));
    }

    #[test]
    fn sform_rows_decode_into_an_affine() {
        let mut header = NiftiHeader::default();
        header.sform_code = 1;
        header.srow_x = [2.0, 0.0, 0.0, -10.0];
        header.srow_y = [0.0, 2.0, 0.0, -20.0];
        header.srow_z = [0.0, 0.0, 2.0, -30.0];

        let affine = sform_affine(&header).unwrap();
        assert_eq!(affine[(0, 0)], 2.0);
        assert_eq!(affine[(1, 3)], -20.0);
        assert_eq!(affine[(3, 3)], 1.0);
    }

    #[test]
    fn identity_quaternion_scales_by_pixdim() {
        let mut header = NiftiHeader::default();
        header.qform_code = 1;
        header.quatern_b = 0.0;
        header.quatern_c = 0.0;
        header.quatern_d = 0.0;
        header.pixdim = [1.0, 1.5, 2.0, 2.5, 0.0, 0.0, 0.0, 0.0];
        header.quatern_x = 5.0;

        let affine = qform_affine(&header).unwrap();
        assert!((affine[(0, 0)] - 1.5).abs() < 1e-6);
        assert!((affine[(1, 1)] - 2.0).abs() < 1e-6);
        assert!((affine[(2, 2)] - 2.5).abs() < 1e-6);
        assert!((affine[(0, 3)] - 5.0).abs() < 1e-6);
    }

    #[test]
    fn negative_qfac_flips_the_third_column() {
        let mut header = NiftiHeader::default();
        header.qform_code = 1;
        header.pixdim = [-1.0, 1.0, 1.0, 3.0, 0.0, 0.0, 0.0, 0.0];

        let affine = qform_affine(&header).unwrap();
        assert!((affine[(2, 2)] + 3.0).abs() < 1e-6);
    }

    #[test]
    fn volume_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.nii.gz");

        let mut data = ArrayD::<f32>::zeros(IxDyn(&[4, 3, 2]));
        data[[1, 2, 0]] = 7.5;
        data[[3, 0, 1]] = -2.0;
        let affine = Affine::new(
            2.0, 0.0, 0.0, -8.0,
            0.0, 2.0, 0.0, -6.0,
            0.0, 0.0, 2.0, -4.0,
            0.0, 0.0, 0.0, 1.0,
        );

        save_volume(&path, &data, &affine, None).unwrap();
        let loaded = load_volume(&path).unwrap();

        assert_eq!(loaded.data.shape(), &[4, 3, 2]);
        assert!((loaded.data[[1, 2, 0]] - 7.5).abs() < 1e-5);
        assert!((loaded.data[[3, 0, 1]] + 2.0).abs() < 1e-5);
        for i in 0..4 {
            for j in 0..4 {
                assert!(
                    (loaded.affine[(i, j)] - affine[(i, j)]).abs() < 1e-4,
                    "affine mismatch at ({i}, {j})"
                );
            }
        }
    }

    #[test]
    fn uncompressed_nii_also_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.nii");

        let mut data = ArrayD::<u8>::zeros(IxDyn(&[5, 5, 5]));
        data[[2, 2, 2]] = 1;
        save_volume(&path, &data, &Affine::identity(), None).unwrap();

        let loaded = load_volume(&path).unwrap();
        assert_eq!(loaded.data.shape(), &[5, 5, 5]);
        assert!((loaded.data[[2, 2, 2]] - 1.0).abs() < 1e-6);
        assert_eq!(loaded.data.sum(), 1.0);
    }
}
