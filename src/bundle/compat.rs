//! Compatibility shims for bundles authored against drifting engine APIs.
//!
//! Bundles declare components against whatever engine version their authors
//! trained with. Two known drift points are reconciled here: the dice
//! metric's activation argument renames, and a transform whose published
//! casing changed between releases. Everything else passes through
//! unmodified so genuine configuration mistakes still surface as errors.

use semver::Version;

use crate::core::errors::{SegError, SegResult};
use crate::transforms::registry::{ArgTable, Registry};

/// Inclusive lower bound of the tested engine range.
pub const ENGINE_SUPPORTED_MIN: &str = "1.3.0";
/// Exclusive upper bound of the tested engine range.
pub const ENGINE_SUPPORTED_MAX: &str = "1.6.0";

/// The transform name older bundles reference with broken casing.
const MISNAMED_TRANSFORM: &str = "RandScaleIntensityFixedMeand";
/// Spellings newer engines publish, in preference order.
const TRANSFORM_SPELLINGS: [&str; 3] = [
    "RandScaleIntensityFixedMeanD",
    "RandScaleIntensityFixedMeanDict",
    "RandScaleIntensityFixedMean",
];

/// The tested engine range, for log and error messages.
pub fn recommended_range() -> String {
    format!("[{ENGINE_SUPPORTED_MIN}, {ENGINE_SUPPORTED_MAX})")
}

/// Logs runtime and bundle versions, warning when the bundle falls outside
/// the tested engine range. Never fatal; shims are applied best-effort
/// either way.
pub fn report_runtime_versions(declared: Option<&str>) {
    tracing::info!(
        crate_version = env!("CARGO_PKG_VERSION"),
        declared_engine = declared.unwrap_or("<none>"),
        "checking bundle engine compatibility"
    );
    match declared.and_then(parse_lenient) {
        Some(version) if engine_version_in_range(&version) => {
            tracing::debug!(%version, "bundle engine version is inside the tested range");
        }
        Some(version) => {
            tracing::warn!(
                %version,
                supported = %recommended_range(),
                "bundle engine version is outside the tested range; applying compatibility shims best-effort"
            );
        }
        None => {
            tracing::warn!(
                supported = %recommended_range(),
                "bundle declares no parseable engine version; applying compatibility shims best-effort"
            );
        }
    }
}

/// Parses version strings the way bundle authors actually write them.
///
/// Accepts a leading `v`, missing patch or minor components, and trailing
/// non-numeric suffixes glued onto a component (`1.4.0rc2`).
pub fn parse_lenient(text: &str) -> Option<Version> {
    let text = text.trim().trim_start_matches('v');
    let mut parts = [0u64; 3];
    let mut seen = 0;
    for (slot, piece) in parts.iter_mut().zip(text.split('.')) {
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            break;
        }
        *slot = digits.parse().ok()?;
        seen += 1;
    }
    if seen == 0 {
        return None;
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// True when `version` lies inside the half-open tested range.
pub fn engine_version_in_range(version: &Version) -> bool {
    let min = Version::parse(ENGINE_SUPPORTED_MIN);
    let max = Version::parse(ENGINE_SUPPORTED_MAX);
    match (min, max) {
        (Ok(min), Ok(max)) => *version >= min && *version < max,
        _ => false,
    }
}

/// Adapter reconciling the dice metric's activation argument renames.
///
/// Older engines spell the activation argument `threshold`, newer ones
/// `sigmoid` (preferred) or `activate`. The adapter is probed from the
/// registry entry actually in force and rewrites only arguments the target
/// cannot accept; a name with no remap target passes through so the
/// builder rejects it exactly as an unshimmed call would.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiceCompat {
    accepts_threshold: bool,
    accepts_sigmoid: bool,
    accepts_activate: bool,
}

impl DiceCompat {
    /// Probes the accepted parameter names of a dice metric target.
    pub fn probe(params: &[&str]) -> Self {
        Self {
            accepts_threshold: params.contains(&"threshold"),
            accepts_sigmoid: params.contains(&"sigmoid"),
            accepts_activate: params.contains(&"activate"),
        }
    }

    /// Probes the registry's `DiceHelper` entry.
    pub fn from_registry(registry: &Registry) -> Self {
        Self::probe(registry.params("DiceHelper").unwrap_or(&[]))
    }

    /// Rewrites one argument table for the probed target.
    pub fn remap(&self, args: &ArgTable) -> ArgTable {
        let mut out = ArgTable::new();
        for (name, value) in args {
            let renamed = match name.as_str() {
                "threshold" if !self.accepts_threshold && self.accepts_sigmoid => "sigmoid",
                "threshold" if !self.accepts_threshold && self.accepts_activate => "activate",
                "sigmoid" if !self.accepts_sigmoid && self.accepts_threshold => "threshold",
                other => other,
            };
            if renamed != name {
                tracing::debug!(from = %name, to = %renamed, "remapping dice metric argument");
            }
            out.insert(renamed.to_string(), value.clone());
        }
        out
    }
}

/// Binds the mis-cased transform name older bundles reference to whichever
/// supported spelling the registry exposes.
///
/// Returns the spelling that was aliased, `None` when the mis-cased name
/// already resolves. When no spelling exists at all the bundle cannot run
/// on this engine and a Compatibility error names the tested range.
pub fn install_transform_alias(registry: &mut Registry) -> SegResult<Option<&'static str>> {
    if registry.contains(MISNAMED_TRANSFORM) {
        return Ok(None);
    }
    for spelling in TRANSFORM_SPELLINGS {
        if registry.alias(MISNAMED_TRANSFORM, spelling) {
            tracing::info!(
                alias = MISNAMED_TRANSFORM,
                target = spelling,
                "installed transform name alias"
            );
            return Ok(Some(spelling));
        }
    }
    Err(SegError::compatibility(format!(
        "transform '{MISNAMED_TRANSFORM}' is unavailable under any known spelling; \
         the bundle expects an engine in {}",
        recommended_range()
    )))
}

/// The shim decisions taken while preparing one bundle.
#[derive(Debug, Clone, Copy)]
pub struct CompatReport {
    /// The dice argument adapter in force.
    pub dice: DiceCompat,
    /// Which transform spelling the mis-cased alias was bound to.
    pub transform_alias: Option<&'static str>,
}

/// Runs the full shim sequence for a scripted bundle.
///
/// Scripted bundles resolve names at load time inside their own code, so
/// the aliases must be in place before the factory runs.
pub fn prepare_script_compat(registry: &mut Registry) -> SegResult<CompatReport> {
    let transform_alias = install_transform_alias(registry)?;
    let dice = DiceCompat::from_registry(registry);
    tracing::debug!(?dice, ?transform_alias, "script compatibility prepared");
    Ok(CompatReport {
        dice,
        transform_alias,
    })
}
