//! Core primitives shared by every pipeline stage: the error taxonomy, the
//! keyed data record, and compute device selection.

pub mod device;
pub mod errors;
pub mod record;

pub use device::Device;
pub use errors::{SegError, SegResult, TransformErrorKind};
pub use record::{meta_key, Affine, DataRecord, MetaMap, MetaValue, RecordValue};
