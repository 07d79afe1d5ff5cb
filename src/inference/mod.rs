//! Network loading and inference drivers.

pub mod checkpoint;
pub mod inferer;
pub mod network;
pub mod scripted;

pub use checkpoint::{load_network, resolve_checkpoint, CHECKPOINT_CANDIDATES};
pub use inferer::{BlendMode, Inferer, SlidingWindowInferer};
pub use network::{NetworkSpec, VolumeNetwork};
pub use scripted::{
    has_inference_script, ScriptContext, ScriptLoadError, ScriptOverrides, ScriptedSegmenter,
    ScriptedSegmenterFactory, SCRIPT_RELATIVE_PATH,
};
