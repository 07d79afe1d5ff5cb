//! Checkpoint discovery and tolerant network loading.

use std::path::{Path, PathBuf};

use crate::core::device::Device;
use crate::core::errors::{SegError, SegResult};
use crate::inference::network::{read_embedded_spec, NetworkSpec, VolumeNetwork};

/// Conventional checkpoint locations, tried in order under the bundle root.
pub const CHECKPOINT_CANDIDATES: [&str; 3] = [
    "models/best_metric_model.onnx",
    "models/model_final.onnx",
    "models/model.onnx",
];

/// Resolves which checkpoint file to load.
///
/// Priority: the explicit argument, then a config-declared path, then the
/// conventional filenames. Relative paths count from the bundle root and
/// the result is always absolute.
///
/// # Errors
///
/// A Checkpoint error when an explicitly requested or declared file is
/// missing, or when no conventional candidate exists.
pub fn resolve_checkpoint(
    bundle_dir: &Path,
    explicit: Option<&Path>,
    declared: Option<&Path>,
) -> SegResult<PathBuf> {
    if let Some(path) = explicit {
        let path = absolutize(bundle_dir, path);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(SegError::checkpoint(format!(
                "requested checkpoint '{}' does not exist",
                path.display()
            )))
        };
    }
    if let Some(path) = declared {
        let path = absolutize(bundle_dir, path);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(SegError::checkpoint(format!(
                "bundle-declared checkpoint '{}' does not exist",
                path.display()
            )))
        };
    }
    for candidate in CHECKPOINT_CANDIDATES {
        let path = bundle_dir.join(candidate);
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(SegError::checkpoint(format!(
        "no checkpoint found under '{}' (tried {})",
        bundle_dir.display(),
        CHECKPOINT_CANDIDATES.join(", ")
    )))
}

fn absolutize(bundle_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        bundle_dir.join(path)
    }
}

/// Loads the network from `checkpoint`, reconciling structural surprises.
///
/// A structural failure triggers one fallback: the checkpoint's embedded
/// `network` metadata (when present) yields a replacement [`NetworkSpec`]
/// and the bind is retried. Without an embedded description the original
/// error stands.
pub fn load_network(
    checkpoint: &Path,
    spec: &NetworkSpec,
    device: Device,
) -> SegResult<VolumeNetwork> {
    match VolumeNetwork::load(checkpoint, spec, device) {
        Ok(network) => Ok(network),
        Err(original @ SegError::StructuralLoad { .. }) => {
            tracing::warn!(
                checkpoint = %checkpoint.display(),
                error = %original,
                "structural load failure; consulting the checkpoint's embedded network description"
            );
            match read_embedded_spec(checkpoint) {
                Some(embedded) => VolumeNetwork::load(checkpoint, &embedded, device),
                None => Err(original),
            }
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"onnx").unwrap();
    }

    #[test]
    fn explicit_path_wins_and_is_absolutized() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("custom/weights.onnx"));
        touch(&dir.path().join("models/model.onnx"));
        let resolved = resolve_checkpoint(
            dir.path(),
            Some(Path::new("custom/weights.onnx")),
            Some(Path::new("models/model.onnx")),
        )
        .unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("custom/weights.onnx"));
    }

    #[test]
    fn missing_explicit_path_is_a_checkpoint_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("models/model.onnx"));
        let err = resolve_checkpoint(dir.path(), Some(Path::new("nope.onnx")), None).unwrap_err();
        assert!(matches!(err, SegError::Checkpoint { .. }));
    }

    #[test]
    fn declared_path_outranks_conventional_names() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("weights/final.onnx"));
        touch(&dir.path().join("models/best_metric_model.onnx"));
        let resolved =
            resolve_checkpoint(dir.path(), None, Some(Path::new("weights/final.onnx"))).unwrap();
        assert!(resolved.ends_with("weights/final.onnx"));
    }

    #[test]
    fn conventional_names_resolve_in_order() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("models/model_final.onnx"));
        touch(&dir.path().join("models/model.onnx"));
        let resolved = resolve_checkpoint(dir.path(), None, None).unwrap();
        assert!(resolved.ends_with("models/model_final.onnx"));

        touch(&dir.path().join("models/best_metric_model.onnx"));
        let resolved = resolve_checkpoint(dir.path(), None, None).unwrap();
        assert!(resolved.ends_with("models/best_metric_model.onnx"));
    }

    #[test]
    fn an_empty_bundle_names_the_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_checkpoint(dir.path(), None, None).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("best_metric_model.onnx"));
        assert!(matches!(err, SegError::Checkpoint { .. }));
    }
}
