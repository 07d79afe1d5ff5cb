//! The keyed data record that flows through transform chains.
//!
//! Bundle pipelines pass volumes around as string-keyed records: a key can
//! hold an on-disk path before loading, a tensor after loading, or a metadata
//! map describing the spatial frame of a sibling key. By convention the
//! metadata for key `k` lives under `k_meta_dict`.

use ndarray::ArrayD;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::errors::{SegError, SegResult};

/// Homogeneous 4x4 voxel-to-world transform.
pub type Affine = nalgebra::Matrix4<f64>;

/// A single metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    /// A spatial affine.
    Affine(Affine),
    /// Free-form text (for example the source filename).
    Text(String),
    /// A list of floats (for example voxel spacing).
    Floats(Vec<f64>),
    /// A list of integers (for example the spatial shape).
    Ints(Vec<i64>),
}

impl MetaValue {
    /// Returns the affine when this value holds one.
    pub fn as_affine(&self) -> Option<&Affine> {
        match self {
            MetaValue::Affine(a) => Some(a),
            _ => None,
        }
    }

    /// Returns the text when this value holds some.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(t) => Some(t),
            _ => None,
        }
    }
}

/// Metadata attached to a record key.
pub type MetaMap = HashMap<String, MetaValue>;

/// A value stored in a [`DataRecord`].
#[derive(Debug, Clone)]
pub enum RecordValue {
    /// An on-disk path, typically before a loading step ran.
    Path(PathBuf),
    /// A volume tensor.
    Tensor(ArrayD<f32>),
    /// A metadata map for a sibling key.
    Meta(MetaMap),
}

/// Returns the conventional metadata key for `key`.
pub fn meta_key(key: &str) -> String {
    format!("{key}_meta_dict")
}

/// The string-keyed record passed between transform chain steps.
#[derive(Debug, Clone, Default)]
pub struct DataRecord {
    entries: HashMap<String, RecordValue>,
}

impl DataRecord {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record holding a single image path, the shape every
    /// inference run starts from.
    pub fn from_image_path(path: impl AsRef<Path>) -> Self {
        let mut record = Self::new();
        record.insert_path("image", path);
        record
    }

    /// Inserts a path value.
    pub fn insert_path(&mut self, key: impl Into<String>, path: impl AsRef<Path>) {
        self.entries.insert(
            key.into(),
            RecordValue::Path(path.as_ref().to_path_buf()),
        );
    }

    /// Inserts a tensor value.
    pub fn insert_tensor(&mut self, key: impl Into<String>, tensor: ArrayD<f32>) {
        self.entries.insert(key.into(), RecordValue::Tensor(tensor));
    }

    /// Inserts a metadata map.
    pub fn insert_meta(&mut self, key: impl Into<String>, meta: MetaMap) {
        self.entries.insert(key.into(), RecordValue::Meta(meta));
    }

    /// Returns the raw value at `key`.
    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.entries.get(key)
    }

    /// Removes and returns the raw value at `key`.
    pub fn remove(&mut self, key: &str) -> Option<RecordValue> {
        self.entries.remove(key)
    }

    /// Returns true when the record contains `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the tensor at `key`, if the key holds one.
    pub fn tensor(&self, key: &str) -> Option<&ArrayD<f32>> {
        match self.entries.get(key) {
            Some(RecordValue::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    /// Returns the path at `key`, if the key holds one.
    pub fn path(&self, key: &str) -> Option<&Path> {
        match self.entries.get(key) {
            Some(RecordValue::Path(p)) => Some(p),
            _ => None,
        }
    }

    /// Returns the metadata map at `key`, if the key holds one.
    pub fn meta(&self, key: &str) -> Option<&MetaMap> {
        match self.entries.get(key) {
            Some(RecordValue::Meta(m)) => Some(m),
            _ => None,
        }
    }

    /// Returns the metadata map conventionally attached to `key`.
    pub fn meta_for(&self, key: &str) -> Option<&MetaMap> {
        self.meta(&meta_key(key))
    }

    /// Returns the tensor at `key` or a transform error attributable to
    /// `transform`.
    ///
    /// A missing key reports the recoverable missing-key kind; a key holding
    /// a non-tensor value reports the wrong-kind one.
    pub fn require_tensor(&self, transform: &str, key: &str) -> SegResult<&ArrayD<f32>> {
        match self.entries.get(key) {
            Some(RecordValue::Tensor(t)) => Ok(t),
            Some(_) => Err(SegError::wrong_kind(transform, key, "tensor")),
            None => Err(SegError::missing_key(transform, key)),
        }
    }

    /// Removes and returns the tensor at `key`, with the same error contract
    /// as [`DataRecord::require_tensor`].
    pub fn take_tensor(&mut self, transform: &str, key: &str) -> SegResult<ArrayD<f32>> {
        match self.entries.remove(key) {
            Some(RecordValue::Tensor(t)) => Ok(t),
            Some(other) => {
                self.entries.insert(key.to_string(), other);
                Err(SegError::wrong_kind(transform, key, "tensor"))
            }
            None => Err(SegError::missing_key(transform, key)),
        }
    }

    /// Returns the path at `key` or a transform error attributable to
    /// `transform`.
    pub fn require_path(&self, transform: &str, key: &str) -> SegResult<&Path> {
        match self.entries.get(key) {
            Some(RecordValue::Path(p)) => Ok(p.as_path()),
            Some(_) => Err(SegError::wrong_kind(transform, key, "path")),
            None => Err(SegError::missing_key(transform, key)),
        }
    }

    /// Iterates over the record keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Number of entries in the record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when the record holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn tensor(shape: &[usize]) -> ArrayD<f32> {
        ArrayD::zeros(ndarray::IxDyn(shape))
    }

    #[test]
    fn from_image_path_seeds_the_image_key() {
        let record = DataRecord::from_image_path("/data/case_01.nii.gz");
        assert_eq!(
            record.path("image"),
            Some(Path::new("/data/case_01.nii.gz"))
        );
        assert_eq!(record.len(), 1);
    }

    #[test]
    fn require_tensor_reports_missing_key_kind() {
        let record = DataRecord::new();
        let err = record.require_tensor("AsDiscreted", "pred").unwrap_err();
        assert_eq!(err.missing_record_key(), Some("pred"));
    }

    #[test]
    fn require_tensor_rejects_path_values_without_missing_kind() {
        let record = DataRecord::from_image_path("/tmp/x.nii");
        let err = record.require_tensor("Resized", "image").unwrap_err();
        assert_eq!(err.missing_record_key(), None);
        assert!(err.to_string().contains("tensor"));
    }

    #[test]
    fn take_tensor_leaves_non_tensor_values_in_place() {
        let mut record = DataRecord::from_image_path("/tmp/x.nii");
        assert!(record.take_tensor("Resized", "image").is_err());
        assert!(record.contains("image"));

        record.insert_tensor("pred", tensor(&[1, 4, 4, 4]));
        let taken = record.take_tensor("Resized", "pred").unwrap();
        assert_eq!(taken.shape(), &[1, 4, 4, 4]);
        assert!(!record.contains("pred"));
    }

    #[test]
    fn meta_for_follows_the_naming_convention() {
        let mut record = DataRecord::new();
        let mut meta = MetaMap::new();
        meta.insert("filename".into(), MetaValue::Text("x.nii.gz".into()));
        record.insert_meta(meta_key("image"), meta);

        let fetched = record.meta_for("image").unwrap();
        assert_eq!(
            fetched.get("filename").and_then(MetaValue::as_text),
            Some("x.nii.gz")
        );
    }
}
