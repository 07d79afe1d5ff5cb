//! The component registry backing declarative bundle configs.
//!
//! Bundles declare pipeline components as tables with a `type` discriminant
//! plus named arguments. The registry maps each bundle-facing type name onto
//! a constructor and records the parameter names the constructor accepts.
//! The parameter lists double as the probe surface for the compatibility
//! shims: adapters inspect them to decide which argument spellings a target
//! understands.
//!
//! A registry is an owned value built once per run. Shim adaptations (alias
//! installation) mutate that value and never any shared state.

use std::collections::HashMap;

use serde_json::Value;

use crate::core::errors::{SegError, SegResult};
use crate::inference::inferer::{Inferer, SlidingWindowInferer};
use crate::inference::network::NetworkSpec;
use crate::pipeline::metrics::DiceHelper;
use crate::transforms::{
    Activations, AsDiscrete, EnsureChannelFirst, LoadImage, NormalizeIntensity,
    RandScaleIntensityFixedMean, Resize, SaveImage, ScaleIntensity, ScaleIntensityRange,
    Transform,
};

/// The argument table of a component declaration (everything but `type`).
pub type ArgTable = serde_json::Map<String, Value>;

/// A constructed component.
#[derive(Debug)]
pub enum Component {
    /// A transform chain step.
    Transform(Box<dyn Transform>),
    /// An inference driver.
    Inferer(Inferer),
    /// A declared network contract.
    Network(NetworkSpec),
    /// A metric helper.
    Metric(DiceHelper),
}

impl Component {
    /// Unwraps a transform, or reports what the component actually was.
    pub fn into_transform(self, name: &str) -> SegResult<Box<dyn Transform>> {
        match self {
            Component::Transform(t) => Ok(t),
            other => Err(SegError::config(format!(
                "component '{name}' is not a transform (got {})",
                other.kind()
            ))),
        }
    }

    /// Unwraps an inferer, or reports what the component actually was.
    pub fn into_inferer(self, name: &str) -> SegResult<Inferer> {
        match self {
            Component::Inferer(i) => Ok(i),
            other => Err(SegError::config(format!(
                "component '{name}' is not an inferer (got {})",
                other.kind()
            ))),
        }
    }

    /// Unwraps a network contract, or reports what the component actually was.
    pub fn into_network(self, name: &str) -> SegResult<NetworkSpec> {
        match self {
            Component::Network(n) => Ok(n),
            other => Err(SegError::config(format!(
                "component '{name}' is not a network (got {})",
                other.kind()
            ))),
        }
    }

    /// Unwraps a metric helper, or reports what the component actually was.
    pub fn into_metric(self, name: &str) -> SegResult<DiceHelper> {
        match self {
            Component::Metric(m) => Ok(m),
            other => Err(SegError::config(format!(
                "component '{name}' is not a metric (got {})",
                other.kind()
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Component::Transform(_) => "a transform",
            Component::Inferer(_) => "an inferer",
            Component::Network(_) => "a network",
            Component::Metric(_) => "a metric",
        }
    }
}

/// A registry entry: the accepted parameter names plus the constructor.
#[derive(Clone, Copy)]
pub struct ComponentEntry {
    /// Parameter names the constructor accepts, in declaration order.
    pub params: &'static [&'static str],
    /// The constructor.
    pub build: fn(&ArgTable) -> SegResult<Component>,
}

impl std::fmt::Debug for ComponentEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentEntry")
            .field("params", &self.params)
            .finish()
    }
}

/// The name-to-constructor table for one run.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, ComponentEntry>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the registry with the engine's full component vocabulary.
    pub fn engine_default() -> Self {
        let mut registry = Self::new();

        registry.register(
            "LoadImaged",
            ComponentEntry {
                params: &["keys", "ensure_channel_first", "image_only"],
                build: |args| Ok(Component::Transform(Box::new(LoadImage::from_args(args)?))),
            },
        );
        registry.register(
            "EnsureChannelFirstd",
            ComponentEntry {
                params: &["keys", "channel_dim"],
                build: |args| {
                    Ok(Component::Transform(Box::new(EnsureChannelFirst::from_args(args)?)))
                },
            },
        );
        registry.register(
            "ScaleIntensityd",
            ComponentEntry {
                params: &["keys", "minv", "maxv", "factor"],
                build: |args| {
                    Ok(Component::Transform(Box::new(ScaleIntensity::from_args(args)?)))
                },
            },
        );
        registry.register(
            "ScaleIntensityRanged",
            ComponentEntry {
                params: &["keys", "a_min", "a_max", "b_min", "b_max", "clip"],
                build: |args| {
                    Ok(Component::Transform(Box::new(ScaleIntensityRange::from_args(args)?)))
                },
            },
        );
        registry.register(
            "NormalizeIntensityd",
            ComponentEntry {
                params: &["keys", "subtrahend", "divisor", "nonzero", "channel_wise"],
                build: |args| {
                    Ok(Component::Transform(Box::new(NormalizeIntensity::from_args(args)?)))
                },
            },
        );
        registry.register(
            "RandScaleIntensityFixedMeanD",
            ComponentEntry {
                params: &["keys", "factors", "prob", "fixed_mean"],
                build: |args| {
                    Ok(Component::Transform(Box::new(
                        RandScaleIntensityFixedMean::from_args(args)?,
                    )))
                },
            },
        );
        registry.register(
            "Resized",
            ComponentEntry {
                params: &["keys", "spatial_size", "mode", "align_corners"],
                build: |args| Ok(Component::Transform(Box::new(Resize::from_args(args)?))),
            },
        );
        registry.register(
            "Activationsd",
            ComponentEntry {
                params: &["keys", "sigmoid", "softmax"],
                build: |args| Ok(Component::Transform(Box::new(Activations::from_args(args)?))),
            },
        );
        registry.register(
            "AsDiscreted",
            ComponentEntry {
                params: &["keys", "argmax", "threshold", "to_onehot", "rounding"],
                build: |args| Ok(Component::Transform(Box::new(AsDiscrete::from_args(args)?))),
            },
        );
        registry.register(
            "SaveImaged",
            ComponentEntry {
                params: &[
                    "keys",
                    "output_dir",
                    "output_postfix",
                    "output_ext",
                    "resample",
                    "separate_folder",
                ],
                build: |args| Ok(Component::Transform(Box::new(SaveImage::from_args(args)?))),
            },
        );

        registry.register(
            "SimpleInferer",
            ComponentEntry {
                params: &[],
                build: |_| Ok(Component::Inferer(Inferer::Simple)),
            },
        );
        registry.register(
            "SlidingWindowInferer",
            ComponentEntry {
                params: &["roi_size", "sw_batch_size", "overlap", "mode", "sigma_scale"],
                build: |args| {
                    Ok(Component::Inferer(Inferer::SlidingWindow(
                        SlidingWindowInferer::from_args(args)?,
                    )))
                },
            },
        );

        registry.register(
            "OnnxNetwork",
            ComponentEntry {
                params: &["path", "input_name", "output_name", "in_channels", "out_channels"],
                build: |args| Ok(Component::Network(NetworkSpec::from_args(args)?)),
            },
        );

        registry.register(
            "DiceHelper",
            ComponentEntry {
                params: &["include_background", "sigmoid", "softmax", "ignore_empty", "num_classes"],
                build: |args| Ok(Component::Metric(DiceHelper::from_args(args)?)),
            },
        );

        registry
    }

    /// Registers (or replaces) an entry under `name`.
    pub fn register(&mut self, name: impl Into<String>, entry: ComponentEntry) {
        self.entries.insert(name.into(), entry);
    }

    /// True when the registry knows `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The accepted parameter names of `name`, when registered.
    pub fn params(&self, name: &str) -> Option<&'static [&'static str]> {
        self.entries.get(name).map(|entry| entry.params)
    }

    /// Binds `alias` to the entry registered under `target`.
    ///
    /// Returns false when `target` is not registered.
    pub fn alias(&mut self, alias: &str, target: &str) -> bool {
        match self.entries.get(target) {
            Some(entry) => {
                let entry = *entry;
                self.entries.insert(alias.to_string(), entry);
                true
            }
            None => false,
        }
    }

    /// Builds the component registered under `name` from `args`.
    ///
    /// Unknown component names and unknown argument names are configuration
    /// errors; the compatibility shims are the only sanctioned remapping.
    pub fn build(&self, name: &str, args: &ArgTable) -> SegResult<Component> {
        let entry = self.entries.get(name).ok_or_else(|| {
            SegError::config(format!("unknown component type '{name}'"))
        })?;
        for key in args.keys() {
            if !entry.params.contains(&key.as_str()) {
                return Err(SegError::config(format!(
                    "component '{name}' does not accept parameter '{key}' (accepted: {})",
                    entry.params.join(", ")
                )));
            }
        }
        (entry.build)(args)
    }
}

// Argument extraction helpers shared by the component constructors. A null
// value counts as an absent argument, matching how bundle configs spell
// "use the default".

pub(crate) fn keys(args: &ArgTable, component: &str) -> SegResult<Vec<String>> {
    match args.get("keys") {
        None | Some(Value::Null) => Ok(vec!["image".to_string()]),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => keys.push(s.clone()),
                    other => {
                        return Err(SegError::config(format!(
                            "component '{component}': 'keys' must hold strings, got {other}"
                        )))
                    }
                }
            }
            if keys.is_empty() {
                return Err(SegError::config(format!(
                    "component '{component}': 'keys' must not be empty"
                )));
            }
            Ok(keys)
        }
        Some(other) => Err(SegError::config(format!(
            "component '{component}': 'keys' must be a string or list of strings, got {other}"
        ))),
    }
}

pub(crate) fn optional_bool(
    args: &ArgTable,
    name: &str,
    component: &str,
) -> SegResult<Option<bool>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(SegError::config(format!(
            "component '{component}': '{name}' must be a boolean, got {other}"
        ))),
    }
}

pub(crate) fn bool_or(
    args: &ArgTable,
    name: &str,
    default: bool,
    component: &str,
) -> SegResult<bool> {
    Ok(optional_bool(args, name, component)?.unwrap_or(default))
}

pub(crate) fn optional_f64(args: &ArgTable, name: &str, component: &str) -> SegResult<Option<f64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_f64().map(Some).ok_or_else(|| {
            SegError::config(format!(
                "component '{component}': '{name}' is not representable as a float"
            ))
        }),
        Some(other) => Err(SegError::config(format!(
            "component '{component}': '{name}' must be a number, got {other}"
        ))),
    }
}

pub(crate) fn optional_usize(
    args: &ArgTable,
    name: &str,
    component: &str,
) -> SegResult<Option<usize>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Some(v as usize)),
            None => Err(SegError::config(format!(
                "component '{component}': '{name}' must be a non-negative integer, got {n}"
            ))),
        },
        Some(other) => Err(SegError::config(format!(
            "component '{component}': '{name}' must be an integer, got {other}"
        ))),
    }
}

pub(crate) fn optional_string(
    args: &ArgTable,
    name: &str,
    component: &str,
) -> SegResult<Option<String>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SegError::config(format!(
            "component '{component}': '{name}' must be a string, got {other}"
        ))),
    }
}

/// Reads a three-element spatial shape; a single integer broadcasts.
pub(crate) fn optional_shape3(
    args: &ArgTable,
    name: &str,
    component: &str,
) -> SegResult<Option<[usize; 3]>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => match n.as_u64() {
            Some(v) => Ok(Some([v as usize; 3])),
            None => Err(SegError::config(format!(
                "component '{component}': '{name}' must be positive, got {n}"
            ))),
        },
        Some(Value::Array(items)) if items.len() == 3 => {
            let mut shape = [0usize; 3];
            for (slot, item) in shape.iter_mut().zip(items) {
                *slot = item.as_u64().ok_or_else(|| {
                    SegError::config(format!(
                        "component '{component}': '{name}' must hold non-negative integers"
                    ))
                })? as usize;
            }
            Ok(Some(shape))
        }
        Some(other) => Err(SegError::config(format!(
            "component '{component}': '{name}' must be an integer or a three-element list, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn table(value: Value) -> ArgTable {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    #[test]
    fn engine_default_knows_the_vocabulary() {
        let registry = Registry::engine_default();
        for name in [
            "LoadImaged",
            "EnsureChannelFirstd",
            "ScaleIntensityRanged",
            "NormalizeIntensityd",
            "RandScaleIntensityFixedMeanD",
            "Resized",
            "Activationsd",
            "AsDiscreted",
            "SaveImaged",
            "SimpleInferer",
            "SlidingWindowInferer",
            "OnnxNetwork",
            "DiceHelper",
        ] {
            assert!(registry.contains(name), "missing {name}");
        }
    }

    #[test]
    fn unknown_component_type_is_a_config_error() {
        let registry = Registry::engine_default();
        let err = registry.build("SpatialPadd", &ArgTable::new()).unwrap_err();
        assert!(err.to_string().contains("SpatialPadd"));
    }

    #[test]
    fn unknown_parameter_is_rejected_with_the_accepted_list() {
        let registry = Registry::engine_default();
        let args = table(json!({"keys": ["image"], "sigmoidd": true}));
        let err = registry.build("Activationsd", &args).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("sigmoidd"));
        assert!(text.contains("sigmoid"));
    }

    #[test]
    fn alias_copies_the_target_entry() {
        let mut registry = Registry::engine_default();
        assert!(registry.alias("RandScaleIntensityFixedMeand", "RandScaleIntensityFixedMeanD"));
        assert_eq!(
            registry.params("RandScaleIntensityFixedMeand"),
            registry.params("RandScaleIntensityFixedMeanD")
        );
        assert!(!registry.alias("Whatever", "NoSuchTarget"));
    }

    #[test]
    fn keys_defaults_to_image() {
        assert_eq!(keys(&ArgTable::new(), "X").unwrap(), vec!["image"]);
        let args = table(json!({"keys": ["image", "label"]}));
        assert_eq!(keys(&args, "X").unwrap(), vec!["image", "label"]);
        let args = table(json!({"keys": "pred"}));
        assert_eq!(keys(&args, "X").unwrap(), vec!["pred"]);
    }

    #[test]
    fn shape3_broadcasts_scalars() {
        let args = table(json!({"spatial_size": 96}));
        assert_eq!(
            optional_shape3(&args, "spatial_size", "X").unwrap(),
            Some([96, 96, 96])
        );
        let args = table(json!({"spatial_size": [64, 64, 32]}));
        assert_eq!(
            optional_shape3(&args, "spatial_size", "X").unwrap(),
            Some([64, 64, 32])
        );
        let args = table(json!({"spatial_size": [64, 64]}));
        assert!(optional_shape3(&args, "spatial_size", "X").is_err());
    }
}
