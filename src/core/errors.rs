//! Error types for the bundle inference pipeline.
//!
//! This module defines the fatal error classes of the pipeline (bundle
//! resolution, configuration, engine compatibility, checkpoint lookup and
//! structural weight loading) together with the ambient errors that wrap the
//! inference session, the tensor layer and the NIfTI codec. It also provides
//! utility functions for creating these errors with appropriate context.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias used across the crate.
pub type SegResult<T> = Result<T, SegError>;

/// The failure modes a transform chain step can report.
///
/// The missing-key kind is distinguished because it is the only recoverable
/// class: the predictor retries a chain once with a synthetic `label` entry
/// when a step reports it.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformErrorKind {
    /// The record does not contain a key the step requires.
    MissingKey {
        /// The key that was absent from the record.
        key: String,
    },
    /// The record contains the key, but not with the expected value kind.
    WrongKind {
        /// The key whose value had the wrong kind.
        key: String,
        /// The kind the step expected (for example "tensor").
        expected: &'static str,
    },
    /// Any other failure, with free-form context.
    Failed {
        /// Additional context about the failure.
        context: String,
    },
}

impl std::fmt::Display for TransformErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformErrorKind::MissingKey { key } => {
                write!(f, "record is missing required key '{key}'")
            }
            TransformErrorKind::WrongKind { key, expected } => {
                write!(f, "record key '{key}' does not hold a {expected}")
            }
            TransformErrorKind::Failed { context } => write!(f, "{context}"),
        }
    }
}

/// Enum representing the errors that can occur while assembling or running a
/// bundle inference pipeline.
///
/// The first five variants are the fatal classes: they abort the run and are
/// never retried. Transform errors drive the predictor's one-shot retry when
/// they carry the missing-key kind. The remaining variants transparently wrap
/// errors from the session, tensor and codec layers.
#[derive(Error, Debug)]
pub enum SegError {
    /// A bundle reference could not be turned into a local directory.
    #[error("bundle resolution: {message}")]
    Resolution {
        /// A message describing the unresolvable reference.
        message: String,
    },

    /// The bundle carries no recognized configuration, or a declared
    /// component is malformed.
    #[error("bundle configuration: {message}")]
    Config {
        /// A message describing the configuration problem.
        message: String,
    },

    /// Drift between the bundle and the engine that the shims could not
    /// reconcile. The message names the recommended engine range.
    #[error("engine compatibility: {message}")]
    Compatibility {
        /// A message describing the incompatibility.
        message: String,
    },

    /// No usable weights file could be located for the bundle.
    #[error("checkpoint: {message}")]
    Checkpoint {
        /// A message describing the failed lookup.
        message: String,
    },

    /// The weights file is structurally incompatible with the declared
    /// network, even after reconciliation against its embedded description.
    #[error("structural load of '{path}': {message}")]
    StructuralLoad {
        /// The weights file that failed to load.
        path: PathBuf,
        /// A message describing the structural mismatch.
        message: String,
    },

    /// A transform chain step failed.
    #[error("transform '{transform}': {kind}")]
    Transform {
        /// The name of the step that failed.
        transform: String,
        /// The failure kind.
        kind: TransformErrorKind,
    },

    /// Error indicating invalid input.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// A message describing the invalid input.
        message: String,
    },

    /// Error from the ONNX Runtime session.
    #[error(transparent)]
    Session(#[from] ort::Error),

    /// Error from tensor operations.
    #[error("tensor operation")]
    Tensor(#[from] ndarray::ShapeError),

    /// Error from the NIfTI codec.
    #[error("nifti codec")]
    Nifti(#[from] nifti::NiftiError),

    /// IO error.
    #[error("io")]
    Io(#[from] std::io::Error),
}

impl SegError {
    /// Creates a SegError for an unresolvable bundle reference.
    ///
    /// # Arguments
    ///
    /// * `message` - A message describing the reference and why it failed.
    ///
    /// # Returns
    ///
    /// A SegError instance.
    pub fn resolution(message: impl Into<String>) -> Self {
        Self::Resolution {
            message: message.into(),
        }
    }

    /// Creates a SegError for configuration problems.
    ///
    /// # Arguments
    ///
    /// * `message` - A message describing the configuration error.
    ///
    /// # Returns
    ///
    /// A SegError instance.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a SegError for engine drift the shims cannot reconcile.
    pub fn compatibility(message: impl Into<String>) -> Self {
        Self::Compatibility {
            message: message.into(),
        }
    }

    /// Creates a SegError for a failed checkpoint lookup.
    pub fn checkpoint(message: impl Into<String>) -> Self {
        Self::Checkpoint {
            message: message.into(),
        }
    }

    /// Creates a SegError for a structurally incompatible weights file.
    ///
    /// # Arguments
    ///
    /// * `path` - The weights file that failed to load.
    /// * `message` - A message describing the structural mismatch.
    pub fn structural_load(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::StructuralLoad {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Creates a SegError for a record key a transform step required but did
    /// not find.
    pub fn missing_key(transform: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Transform {
            transform: transform.into(),
            kind: TransformErrorKind::MissingKey { key: key.into() },
        }
    }

    /// Creates a SegError for a record value of the wrong kind.
    pub fn wrong_kind(
        transform: impl Into<String>,
        key: impl Into<String>,
        expected: &'static str,
    ) -> Self {
        Self::Transform {
            transform: transform.into(),
            kind: TransformErrorKind::WrongKind {
                key: key.into(),
                expected,
            },
        }
    }

    /// Creates a SegError for a failed transform step.
    ///
    /// # Arguments
    ///
    /// * `transform` - The name of the step that failed.
    /// * `context` - Additional context about the failure.
    ///
    /// # Returns
    ///
    /// A SegError instance.
    pub fn transform_failed(transform: impl Into<String>, context: impl Into<String>) -> Self {
        Self::Transform {
            transform: transform.into(),
            kind: TransformErrorKind::Failed {
                context: context.into(),
            },
        }
    }

    /// Creates a SegError for invalid input.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Returns the missing record key when this error carries the
    /// recoverable missing-key kind.
    ///
    /// The predictor uses this to decide whether a transform chain deserves
    /// its single fallback invocation with a synthetic `label`.
    pub fn missing_record_key(&self) -> Option<&str> {
        match self {
            SegError::Transform {
                kind: TransformErrorKind::MissingKey { key },
                ..
            } => Some(key),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_transform_name_and_key() {
        let err = SegError::missing_key("LoadImaged", "label");
        let text = err.to_string();
        assert!(text.contains("LoadImaged"));
        assert!(text.contains("label"));
    }

    #[test]
    fn missing_record_key_only_matches_missing_kind() {
        assert_eq!(
            SegError::missing_key("AsDiscreted", "label").missing_record_key(),
            Some("label")
        );
        assert_eq!(
            SegError::transform_failed("AsDiscreted", "bad shape").missing_record_key(),
            None
        );
        assert_eq!(SegError::config("boom").missing_record_key(), None);
    }

    #[test]
    fn fatal_classes_render_their_category() {
        assert!(SegError::resolution("x")
            .to_string()
            .starts_with("bundle resolution"));
        assert!(SegError::checkpoint("x").to_string().starts_with("checkpoint"));
        assert!(SegError::compatibility("x")
            .to_string()
            .starts_with("engine compatibility"));
    }
}
