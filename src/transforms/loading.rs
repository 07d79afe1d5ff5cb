//! Volume loading steps.

use ndarray::Axis;

use crate::core::errors::SegResult;
use crate::core::record::{meta_key, DataRecord, MetaMap, MetaValue};
use crate::io;
use crate::transforms::registry::{self, ArgTable};
use crate::transforms::Transform;

/// Replaces path entries with loaded volume tensors and attaches their
/// spatial metadata under the conventional `<key>_meta_dict` entry.
///
/// Trailing singleton dimensions beyond the third are squeezed so plain 3-D
/// scans saved as 4-D volumes load as 3-D tensors. The loaded tensor is
/// rearranged into standard layout so downstream steps can slice it cheaply.
#[derive(Debug, Clone)]
pub struct LoadImage {
    keys: Vec<String>,
    ensure_channel_first: bool,
}

impl LoadImage {
    /// Creates a loader for the given record keys.
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys,
            ensure_channel_first: false,
        }
    }

    /// Builds the step from a bundle component declaration.
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        Ok(Self {
            keys: registry::keys(args, "LoadImaged")?,
            ensure_channel_first: registry::bool_or(
                args,
                "ensure_channel_first",
                false,
                "LoadImaged",
            )?,
        })
    }
}

impl Transform for LoadImage {
    fn name(&self) -> &'static str {
        "LoadImaged"
    }

    fn apply(&self, mut record: DataRecord) -> SegResult<DataRecord> {
        for key in &self.keys {
            let path = record.require_path(self.name(), key)?.to_path_buf();
            let loaded = io::load_volume(&path)?;

            let mut data = loaded.data.as_standard_layout().into_owned();
            while data.ndim() > 3 && data.shape()[data.ndim() - 1] == 1 {
                let last = data.ndim() - 1;
                data = data.index_axis_move(Axis(last), 0);
            }
            if self.ensure_channel_first && data.ndim() == 3 {
                data = data.insert_axis(Axis(0));
            }

            let mut meta = MetaMap::new();
            meta.insert("affine".into(), MetaValue::Affine(loaded.affine));
            meta.insert("original_affine".into(), MetaValue::Affine(loaded.affine));
            if let Some(qform) = loaded.qform {
                meta.insert("qform".into(), MetaValue::Affine(qform));
            }
            if let Some(sform) = loaded.sform {
                meta.insert("sform".into(), MetaValue::Affine(sform));
            }
            meta.insert(
                "spatial_shape".into(),
                MetaValue::Ints(data.shape().iter().map(|&s| s as i64).collect()),
            );
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                meta.insert("filename".into(), MetaValue::Text(name.to_string()));
            }

            record.insert_tensor(key.clone(), data);
            record.insert_meta(meta_key(key), meta);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::record::Affine;
    use ndarray::{ArrayD, IxDyn};

    fn write_volume(dir: &std::path::Path, name: &str, shape: &[usize]) -> std::path::PathBuf {
        let path = dir.join(name);
        let data = ArrayD::<f32>::ones(IxDyn(shape));
        io::save_volume(&path, &data, &Affine::identity(), None).unwrap();
        path
    }

    #[test]
    fn loads_tensor_and_meta_for_each_key() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_volume(dir.path(), "scan.nii.gz", &[6, 5, 4]);

        let step = LoadImage::new(vec!["image".into()]);
        let out = step.apply(DataRecord::from_image_path(&img)).unwrap();

        assert_eq!(out.tensor("image").unwrap().shape(), &[6, 5, 4]);
        let meta = out.meta_for("image").unwrap();
        assert!(meta.contains_key("affine"));
        assert!(meta.contains_key("original_affine"));
        assert_eq!(
            meta.get("filename").and_then(MetaValue::as_text),
            Some("scan.nii.gz")
        );
    }

    #[test]
    fn missing_key_reports_the_recoverable_kind() {
        let step = LoadImage::new(vec!["image".into(), "label".into()]);
        let dir = tempfile::tempdir().unwrap();
        let img = write_volume(dir.path(), "scan.nii.gz", &[4, 4, 4]);

        let err = step.apply(DataRecord::from_image_path(&img)).unwrap_err();
        assert_eq!(err.missing_record_key(), Some("label"));
    }

    #[test]
    fn squeezes_trailing_singleton_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_volume(dir.path(), "scan4d.nii.gz", &[6, 5, 4, 1]);

        let step = LoadImage::new(vec!["image".into()]);
        let out = step.apply(DataRecord::from_image_path(&img)).unwrap();
        assert_eq!(out.tensor("image").unwrap().shape(), &[6, 5, 4]);
    }

    #[test]
    fn optional_channel_axis_is_prepended() {
        let dir = tempfile::tempdir().unwrap();
        let img = write_volume(dir.path(), "scan.nii.gz", &[6, 5, 4]);

        let mut args = ArgTable::new();
        args.insert("ensure_channel_first".into(), serde_json::json!(true));
        let step = LoadImage::from_args(&args).unwrap();

        let out = step.apply(DataRecord::from_image_path(&img)).unwrap();
        assert_eq!(out.tensor("image").unwrap().shape(), &[1, 6, 5, 4]);
    }
}
