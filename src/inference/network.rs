//! ONNX Runtime session handling for volumetric segmentation networks.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array5;
use ort::session::Session;
use ort::value::{TensorRef, ValueType};
use serde::{Deserialize, Serialize};

use crate::core::device::Device;
use crate::core::errors::{SegError, SegResult};
use crate::transforms::registry::{self, ArgTable};

/// Input tensor names worth probing when the declared one is absent.
const COMMON_INPUT_NAMES: [&str; 4] = ["image", "input", "x", "data"];

/// The declared contract of a bundle's network component.
///
/// Everything is optional; whatever is declared is bound tolerantly
/// against the loaded session. The same shape is embedded as JSON under
/// the `network` model-metadata key by exporters, which is how structurally
/// surprising checkpoints can still describe themselves.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkSpec {
    /// Checkpoint path declared inline, relative to the bundle root.
    pub path: Option<PathBuf>,
    pub input_name: Option<String>,
    pub output_name: Option<String>,
    pub in_channels: Option<i64>,
    pub out_channels: Option<i64>,
}

impl NetworkSpec {
    pub fn from_args(args: &ArgTable) -> SegResult<Self> {
        let component = "OnnxNetwork";
        Ok(Self {
            path: registry::optional_string(args, "path", component)?.map(PathBuf::from),
            input_name: registry::optional_string(args, "input_name", component)?,
            output_name: registry::optional_string(args, "output_name", component)?,
            in_channels: registry::optional_usize(args, "in_channels", component)?
                .map(|v| v as i64),
            out_channels: registry::optional_usize(args, "out_channels", component)?
                .map(|v| v as i64),
        })
    }

    /// Parses the JSON form embedded in checkpoint metadata.
    pub fn from_json(text: &str) -> SegResult<Self> {
        serde_json::from_str(text).map_err(|err| {
            SegError::config(format!("embedded network description does not parse: {err}"))
        })
    }
}

/// A loaded segmentation network: one ONNX session plus the resolved
/// tensor names.
///
/// The session mutex serializes forwards; batch runs are sequential so the
/// lock is uncontended in practice.
pub struct VolumeNetwork {
    session: Mutex<Session>,
    input_name: String,
    output_name: Option<String>,
    model_path: PathBuf,
    device: Device,
}

impl std::fmt::Debug for VolumeNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeNetwork")
            .field("input_name", &self.input_name)
            .field("output_name", &self.output_name)
            .field("model_path", &self.model_path)
            .field("device", &self.device)
            .finish()
    }
}

impl VolumeNetwork {
    /// Builds a session from `path` on `device` and binds `spec` to it
    /// non-strictly.
    ///
    /// Declared tensor names the session lacks fall back to detection with
    /// a warning; channel mismatches against static session shapes warn.
    /// Structural problems (no tensor input, rank incompatible with
    /// `[N, C, D, H, W]`) are `StructuralLoad` errors.
    pub fn load(path: &Path, spec: &NetworkSpec, device: Device) -> SegResult<Self> {
        let providers = device.execution_providers()?;
        let session = Session::builder()?
            .with_execution_providers(providers)?
            .commit_from_file(path)
            .map_err(|err| {
                SegError::structural_load(path, format!("cannot create ONNX session: {err}"))
            })?;

        let tensor_inputs: Vec<(String, Vec<i64>)> = session
            .inputs
            .iter()
            .filter_map(|input| match &input.input_type {
                ValueType::Tensor { shape, .. } => {
                    Some((input.name.clone(), shape.iter().copied().collect()))
                }
                _ => None,
            })
            .collect();
        if tensor_inputs.is_empty() {
            return Err(SegError::structural_load(
                path,
                "model exposes no tensor-typed input",
            ));
        }

        let names: Vec<&str> = tensor_inputs.iter().map(|(name, _)| name.as_str()).collect();
        let (input_name, fell_back) = pick_input_name(spec.input_name.as_deref(), &names);
        if fell_back {
            tracing::warn!(
                declared = spec.input_name.as_deref().unwrap_or("<none>"),
                chosen = %input_name,
                available = ?names,
                "declared input tensor not found; bound by detection"
            );
        }

        let input_shape = tensor_inputs
            .iter()
            .find(|(name, _)| *name == input_name)
            .map(|(_, shape)| shape.clone())
            .unwrap_or_default();
        if input_shape.len() != 5 {
            return Err(SegError::structural_load(
                path,
                format!(
                    "input '{input_name}' has rank {}, incompatible with volumetric [N, C, D, H, W] input",
                    input_shape.len()
                ),
            ));
        }
        if let (Some(declared), Some(&actual)) = (spec.in_channels, input_shape.get(1)) {
            if actual > 0 && actual != declared {
                tracing::warn!(
                    declared,
                    actual,
                    "declared in_channels disagrees with the session's static input shape"
                );
            }
        }

        let output_name = match &spec.output_name {
            Some(declared) if session.outputs.iter().any(|o| &o.name == declared) => {
                Some(declared.clone())
            }
            Some(declared) => {
                tracing::warn!(
                    declared = %declared,
                    "declared output tensor not found; using the session's first output"
                );
                None
            }
            None => None,
        };
        if let Some(declared) = spec.out_channels {
            let static_out = session.outputs.first().and_then(|o| match &o.output_type {
                ValueType::Tensor { shape, .. } => shape.get(1).copied(),
                _ => None,
            });
            if let Some(actual) = static_out {
                if actual > 0 && actual != declared {
                    tracing::warn!(
                        declared,
                        actual,
                        "declared out_channels disagrees with the session's static output shape"
                    );
                }
            }
        }

        tracing::info!(
            model = %path.display(),
            %device,
            input = %input_name,
            output = output_name.as_deref().unwrap_or("<first>"),
            "segmentation network loaded"
        );
        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            model_path: path.to_path_buf(),
            device,
        })
    }

    /// One forward pass over a batched volume.
    pub fn forward(&self, x: &Array5<f32>) -> SegResult<Array5<f32>> {
        let owned;
        let view = match x.as_slice() {
            Some(_) => x.view(),
            None => {
                owned = x.as_standard_layout().into_owned();
                owned.view()
            }
        };
        let input_tensor = TensorRef::from_array_view(view).map_err(SegError::Session)?;
        let inputs = ort::inputs![self.input_name.as_str() => input_tensor];

        let mut session_guard = self
            .session
            .lock()
            .map_err(|_| SegError::invalid_input("network session lock poisoned"))?;
        let output_name = match &self.output_name {
            Some(name) => name.clone(),
            None => session_guard
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| SegError::invalid_input("model exposes no outputs"))?,
        };
        let outputs = session_guard.run(inputs)?;
        let (shape, data) = outputs[output_name.as_str()].try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        if dims.len() != 5 {
            return Err(SegError::invalid_input(format!(
                "network returned a rank-{} tensor, expected [N, C, D, H, W]",
                dims.len()
            )));
        }
        let array = Array5::from_shape_vec(
            (dims[0], dims[1], dims[2], dims[3], dims[4]),
            data.to_vec(),
        )
        .map_err(SegError::Tensor)?;
        Ok(array)
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }
}

/// Picks the input tensor to bind: the declared name when the session has
/// it, else a conventional name, else the first tensor input. The flag
/// reports whether a declared name had to be abandoned.
fn pick_input_name(declared: Option<&str>, available: &[&str]) -> (String, bool) {
    if let Some(name) = declared {
        if available.contains(&name) {
            return (name.to_string(), false);
        }
    }
    let detected = COMMON_INPUT_NAMES
        .iter()
        .copied()
        .find(|name| available.contains(name))
        .or_else(|| available.first().copied())
        .unwrap_or("image");
    (detected.to_string(), declared.is_some())
}

/// Reads the `network` JSON a checkpoint may carry in its model metadata.
///
/// Any failure along the way reads as "no embedded description".
pub fn read_embedded_spec(path: &Path) -> Option<NetworkSpec> {
    let session = Session::builder().and_then(|b| b.commit_from_file(path)).ok()?;
    let metadata = session.metadata().ok()?;
    let text = metadata.custom("network").ok()??;
    NetworkSpec::from_json(&text).ok()
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

    #[test]
    fn spec_parses_from_component_args() {
        let spec = NetworkSpec::from_args(&args(json!({
            "input_name": "image", "in_channels": 1, "out_channels": 2
        })))
        .unwrap();
        assert_eq!(spec.input_name.as_deref(), Some("image"));
        assert_eq!(spec.in_channels, Some(1));
        assert_eq!(spec.path, None);
    }

    #[test]
    fn spec_parses_from_embedded_json() {
        let spec = NetworkSpec::from_json(
            r#"{"input_name": "x", "output_name": "logits", "out_channels": 3}"#,
        )
        .unwrap();
        assert_eq!(spec.input_name.as_deref(), Some("x"));
        assert_eq!(spec.output_name.as_deref(), Some("logits"));
        assert_eq!(spec.out_channels, Some(3));
        assert!(NetworkSpec::from_json("not json").is_err());
    }

    #[test]
    fn declared_input_wins_when_present() {
        let (name, fell_back) = pick_input_name(Some("volume"), &["volume", "x"]);
        assert_eq!(name, "volume");
        assert!(!fell_back);
    }

    #[test]
    fn missing_declared_input_falls_back_to_detection() {
        let (name, fell_back) = pick_input_name(Some("volume"), &["x", "other"]);
        assert_eq!(name, "x");
        assert!(fell_back);

        let (name, fell_back) = pick_input_name(Some("volume"), &["strange"]);
        assert_eq!(name, "strange");
        assert!(fell_back);
    }

    #[test]
    fn undeclared_input_detects_without_warning_flag() {
        let (name, fell_back) = pick_input_name(None, &["data", "aux"]);
        assert_eq!(name, "data");
        assert!(!fell_back);
    }
}
