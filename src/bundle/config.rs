//! Bundle configuration discovery and parsing.
//!
//! A bundle ships its pipeline declaration under `configs/`. Several
//! filenames are recognized, in a fixed priority order; YAML and JSON both
//! parse into the same `serde_json::Value` document so the assembler reads
//! one shape regardless of the on-disk format.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::core::errors::{SegError, SegResult};

/// Recognized configuration filenames, highest priority first.
pub const CONFIG_CANDIDATES: [(&str, ConfigKind); 5] = [
    ("inference.yaml", ConfigKind::Inference),
    ("inference.json", ConfigKind::Inference),
    ("evaluate.yaml", ConfigKind::Evaluate),
    ("evaluate.json", ConfigKind::Evaluate),
    ("hyper_parameters.yaml", ConfigKind::HyperParameters),
];

/// What flavour of configuration was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// A dedicated inference declaration.
    Inference,
    /// An evaluation declaration, reused for inference.
    Evaluate,
    /// Training hyper-parameters, the marker of scripted bundles.
    HyperParameters,
}

impl std::fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigKind::Inference => write!(f, "inference"),
            ConfigKind::Evaluate => write!(f, "evaluate"),
            ConfigKind::HyperParameters => write!(f, "hyper-parameters"),
        }
    }
}

/// A parsed bundle configuration plus its optional metadata document.
#[derive(Debug, Clone)]
pub struct BundleConfig {
    /// Absolute bundle root.
    pub bundle_dir: PathBuf,
    /// The configuration file that was selected.
    pub source: PathBuf,
    /// Which candidate matched.
    pub kind: ConfigKind,
    /// The parsed configuration document.
    pub document: Value,
    /// `configs/metadata.json`, when present.
    pub metadata: Option<Value>,
}

impl BundleConfig {
    /// Finds and parses the highest-priority configuration in `bundle_dir`.
    ///
    /// # Errors
    ///
    /// Returns a Config error when no candidate exists or the selected
    /// file does not parse into a mapping.
    pub fn load(bundle_dir: &Path) -> SegResult<Self> {
        let configs = bundle_dir.join("configs");
        for (name, kind) in CONFIG_CANDIDATES {
            let path = configs.join(name);
            if !path.is_file() {
                continue;
            }
            let document = parse_document(&path)?;
            let metadata = load_metadata(&configs)?;
            tracing::info!(config = %path.display(), kind = %kind, "loaded bundle configuration");
            return Ok(Self {
                bundle_dir: bundle_dir.to_path_buf(),
                source: path,
                kind,
                document,
                metadata,
            });
        }
        let names: Vec<&str> = CONFIG_CANDIDATES.iter().map(|(name, _)| *name).collect();
        Err(SegError::config(format!(
            "no recognized configuration under '{}' (looked for {})",
            configs.display(),
            names.join(", ")
        )))
    }

    /// The engine version the bundle declares in its metadata, if any.
    pub fn engine_version(&self) -> Option<&str> {
        self.metadata
            .as_ref()?
            .get("engine_version")?
            .as_str()
    }

    /// A top-level component declaration, with explicit nulls treated as
    /// absent.
    pub fn component(&self, key: &str) -> Option<&Value> {
        match self.document.get(key) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }
}

fn parse_document(path: &Path) -> SegResult<Value> {
    let text = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let document: Value = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&text).map_err(|err| {
            SegError::config(format!("cannot parse '{}': {err}", path.display()))
        })?,
        "json" => serde_json::from_str(&text).map_err(|err| {
            SegError::config(format!("cannot parse '{}': {err}", path.display()))
        })?,
        other => {
            return Err(SegError::config(format!(
                "unsupported configuration extension '{other}' at '{}'",
                path.display()
            )))
        }
    };
    if !document.is_object() {
        return Err(SegError::config(format!(
            "configuration '{}' is not a mapping",
            path.display()
        )));
    }
    Ok(document)
}

fn load_metadata(configs: &Path) -> SegResult<Option<Value>> {
    let path = configs.join("metadata.json");
    if !path.is_file() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)?;
    let value = serde_json::from_str(&text).map_err(|err| {
        SegError::config(format!("cannot parse '{}': {err}", path.display()))
    })?;
    Ok(Some(value))
}
