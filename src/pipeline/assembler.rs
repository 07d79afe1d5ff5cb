//! Turns a bundle's declared configuration into an executable pipeline.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::bundle::compat::{self, DiceCompat};
use crate::bundle::config::{BundleConfig, ConfigKind};
use crate::core::device::Device;
use crate::core::errors::{SegError, SegResult};
use crate::inference::checkpoint;
use crate::inference::inferer::Inferer;
use crate::inference::network::VolumeNetwork;
use crate::inference::scripted::{
    self, ScriptContext, ScriptOverrides, ScriptedSegmenter, ScriptedSegmenterFactory,
    SCRIPT_RELATIVE_PATH,
};
use crate::pipeline::metrics::DiceHelper;
use crate::transforms::registry::{ArgTable, Registry};
use crate::transforms::Compose;

/// Executable form of a bundle: either a declarative transform/inference
/// chain or an opaque scripted segmenter supplied by an external factory.
#[derive(Debug)]
pub enum Pipeline {
    Scripted(Box<dyn ScriptedSegmenter>),
    Declarative(DeclarativePipeline),
}

/// The declarative chain: optional pre/post transforms around a loaded
/// session plus the window strategy and any declared metric settings.
#[derive(Debug)]
pub struct DeclarativePipeline {
    pub preprocessing: Option<Compose>,
    pub network: VolumeNetwork,
    pub inferer: Inferer,
    pub postprocessing: Option<Compose>,
    pub metric: Option<DiceHelper>,
}

/// Assembles the pipeline a bundle declares.
///
/// Scripted bundles (hyper-parameter config plus an inference script) are
/// handed to the registered factory with the override set the script
/// expects. Declarative bundles resolve their network, checkpoint, device
/// and transform chains through the component registry, with the
/// compatibility shim applied first.
pub fn assemble(
    bundle_dir: &Path,
    config: &BundleConfig,
    device: Option<&str>,
    checkpoint: Option<&Path>,
    script_factory: Option<&dyn ScriptedSegmenterFactory>,
) -> SegResult<Pipeline> {
    let mut registry = Registry::engine_default();
    compat::report_runtime_versions(config.engine_version());

    if config.kind == ConfigKind::HyperParameters && scripted::has_inference_script(bundle_dir)
    {
        return assemble_scripted(bundle_dir, config, checkpoint, script_factory, registry);
    }
    assemble_declarative(bundle_dir, config, device, checkpoint, &mut registry)
}

fn assemble_scripted(
    bundle_dir: &Path,
    config: &BundleConfig,
    checkpoint: Option<&Path>,
    script_factory: Option<&dyn ScriptedSegmenterFactory>,
    mut registry: Registry,
) -> SegResult<Pipeline> {
    let report = compat::prepare_script_compat(&mut registry)?;
    let factory = script_factory.ok_or_else(|| {
        SegError::compatibility(format!(
            "bundle ships its own inference script but no scripted segmenter factory \
             is registered; supported engine range is {}",
            compat::recommended_range()
        ))
    })?;
    let context = ScriptContext {
        bundle_dir: bundle_dir.to_path_buf(),
        script: bundle_dir.join(SCRIPT_RELATIVE_PATH),
        config_file: config.source.clone(),
        overrides: ScriptOverrides::for_bundle(bundle_dir, checkpoint),
        compat: report,
    };
    let segmenter = factory.load(&context).map_err(|err| {
        SegError::compatibility(format!(
            "{err}; supported engine range is {}",
            compat::recommended_range()
        ))
    })?;
    info!(
        bundle = %bundle_dir.display(),
        script = SCRIPT_RELATIVE_PATH,
        "loaded scripted segmenter"
    );
    Ok(Pipeline::Scripted(segmenter))
}

fn assemble_declarative(
    bundle_dir: &Path,
    config: &BundleConfig,
    device: Option<&str>,
    checkpoint: Option<&Path>,
    registry: &mut Registry,
) -> SegResult<Pipeline> {
    let alias = compat::install_transform_alias(registry)?;
    if let Some(alias) = alias {
        debug!(alias, "transform alias available to this bundle");
    }
    let dice = DiceCompat::from_registry(registry);

    let network_value = config
        .component("network")
        .or_else(|| config.component("network_def"))
        .ok_or_else(|| {
            SegError::config("bundle declares neither 'network' nor 'network_def'")
        })?;
    let (network_type, network_args) = component_parts(network_value, "network")?;
    let spec = registry
        .build(&network_type, &network_args)?
        .into_network(&network_type)?;

    let device = match device {
        Some(value) => Device::parse(value)?,
        None => Device::auto(),
    };

    let declared = config
        .document
        .get("checkpoint")
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .or_else(|| spec.path.clone());
    let checkpoint_path =
        checkpoint::resolve_checkpoint(bundle_dir, checkpoint, declared.as_deref())?;
    let network = checkpoint::load_network(&checkpoint_path, &spec, device)?;

    let preprocessing = match config.component("preprocessing") {
        Some(value) => Some(build_transform_chain(registry, value, "preprocessing")?),
        None => None,
    };
    let mut postprocessing = match config.component("postprocessing") {
        Some(value) => Some(build_transform_chain(registry, value, "postprocessing")?),
        None => None,
    };
    if let Some(chain) = postprocessing.as_mut() {
        let stripped = chain.strip_output_writers();
        if !stripped.is_empty() {
            info!(
                steps = ?stripped,
                "dropped persist-to-disk steps from postprocessing; the runner owns output"
            );
        }
    }

    let inferer = resolve_inferer(registry, config.component("inferer"))?;
    let metric = resolve_metric(registry, &dice, config)?;

    info!(
        bundle = %bundle_dir.display(),
        device = %device,
        preprocessing = preprocessing.as_ref().map(Compose::len).unwrap_or(0),
        postprocessing = postprocessing.as_ref().map(Compose::len).unwrap_or(0),
        "assembled declarative pipeline"
    );
    Ok(Pipeline::Declarative(DeclarativePipeline {
        preprocessing,
        network,
        inferer,
        postprocessing,
        metric,
    }))
}

/// Splits a component declaration into its type name and argument table.
fn component_parts(value: &Value, key: &str) -> SegResult<(String, ArgTable)> {
    let object = value.as_object().ok_or_else(|| {
        SegError::config(format!(
            "component '{key}' must be an object with a 'type' field"
        ))
    })?;
    let type_name = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| SegError::config(format!("component '{key}' is missing its 'type' field")))?
        .to_string();
    let mut args = object.clone();
    args.remove("type");
    Ok((type_name, args))
}

/// Builds a transform chain from a declaration: a bare list is an implicit
/// `Compose`, an explicit `Compose` carries its steps under `transforms`,
/// and a single component becomes a one-step chain.
fn build_transform_chain(registry: &Registry, value: &Value, key: &str) -> SegResult<Compose> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(object) if object.get("type").and_then(Value::as_str) == Some("Compose") =>
        {
            let steps = object.get("transforms").and_then(Value::as_array).ok_or_else(
                || {
                    SegError::config(format!(
                        "Compose under '{key}' is missing its 'transforms' list"
                    ))
                },
            )?;
            steps.iter().collect()
        }
        Value::Object(_) => vec![value],
        _ => {
            return Err(SegError::config(format!(
                "'{key}' must be a component object or a list of components"
            )))
        }
    };
    let mut steps = Vec::with_capacity(items.len());
    for item in items {
        let (type_name, args) = component_parts(item, key)?;
        let step = registry.build(&type_name, &args)?.into_transform(&type_name)?;
        steps.push(step);
    }
    Ok(Compose::new(steps))
}

fn resolve_inferer(registry: &Registry, value: Option<&Value>) -> SegResult<Inferer> {
    match value {
        Some(value) => {
            let (type_name, args) = component_parts(value, "inferer")?;
            registry.build(&type_name, &args)?.into_inferer(&type_name)
        }
        None => Ok(Inferer::default()),
    }
}

fn resolve_metric(
    registry: &Registry,
    dice: &DiceCompat,
    config: &BundleConfig,
) -> SegResult<Option<DiceHelper>> {
    for key in ["key_metric", "metric"] {
        if let Some(value) = config.component(key) {
            let (type_name, args) = component_parts(value, key)?;
            let args = dice.remap(&args);
            let helper = registry.build(&type_name, &args)?.into_metric(&type_name)?;
            return Ok(Some(helper));
        }
    }
    Ok(None)
}
