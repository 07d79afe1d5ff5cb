//! The transform vocabulary bundles declare their pre- and postprocessing
//! chains with.
//!
//! Every step implements [`Transform`] over a [`DataRecord`]: it consumes the
//! record and returns the updated one, or a transform error. [`Compose`]
//! folds a record through a step list. Construction from bundle declarations
//! goes through the [`registry`] module, which maps the bundle-facing
//! component names onto constructors and exposes each entry's accepted
//! parameter names for compatibility probing.

pub mod intensity;
pub mod loading;
pub mod post;
pub mod registry;
pub mod spatial;

pub use intensity::{
    NormalizeIntensity, RandScaleIntensityFixedMean, ScaleIntensity, ScaleIntensityRange,
};
pub use loading::LoadImage;
pub use post::{Activations, AsDiscrete, SaveImage};
pub use registry::{ArgTable, Component, ComponentEntry, Registry};
pub use spatial::{resample_nearest, resample_trilinear, EnsureChannelFirst, Resize};

use crate::core::errors::SegResult;
use crate::core::record::DataRecord;

/// A single step of a transform chain.
pub trait Transform: Send + Sync + std::fmt::Debug {
    /// The bundle-facing name of this step, used in error reports.
    fn name(&self) -> &'static str;

    /// Applies the step to a record.
    fn apply(&self, record: DataRecord) -> SegResult<DataRecord>;

    /// True when the step persists data to disk. The assembler strips such
    /// steps from postprocessing chains because output writing is owned by
    /// the batch runner.
    fn writes_output(&self) -> bool {
        false
    }
}

/// An ordered chain of transform steps.
#[derive(Debug, Default)]
pub struct Compose {
    steps: Vec<Box<dyn Transform>>,
}

impl Compose {
    /// Creates a chain from the given steps.
    pub fn new(steps: Vec<Box<dyn Transform>>) -> Self {
        Self { steps }
    }

    /// Folds a record through every step in order.
    pub fn apply(&self, record: DataRecord) -> SegResult<DataRecord> {
        let mut record = record;
        for step in &self.steps {
            record = step.apply(record)?;
        }
        Ok(record)
    }

    /// Removes the steps that persist to disk, returning their names.
    pub fn strip_output_writers(&mut self) -> Vec<&'static str> {
        let mut removed = Vec::new();
        self.steps.retain(|step| {
            if step.writes_output() {
                removed.push(step.name());
                false
            } else {
                true
            }
        });
        removed
    }

    /// The names of the steps, in order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Number of steps in the chain.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True when the chain has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
