//! Serializable run descriptions and the toy data used to exercise them.

pub mod spec;
pub mod synthetic;

pub use spec::{BackboneSpec, ExperimentSpec, ModelSpec};
pub use synthetic::synthetic_dataset;
