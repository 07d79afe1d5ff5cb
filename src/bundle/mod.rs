//! Bundle acquisition: reference resolution, configuration discovery and
//! the compatibility shims applied before assembly.

pub mod compat;
pub mod config;
#[cfg(feature = "hub")]
pub mod hub;
pub mod resolver;

pub use compat::{
    install_transform_alias, prepare_script_compat, recommended_range, report_runtime_versions,
    CompatReport, DiceCompat, ENGINE_SUPPORTED_MAX, ENGINE_SUPPORTED_MIN,
};
pub use config::{BundleConfig, ConfigKind, CONFIG_CANDIDATES};
pub use resolver::{parse_repo_id, resolve_bundle_dir};
