//! A/B experimentation: deterministic assignment, event recording, and
//! statistical significance readouts.

pub mod assignment;
pub mod model;
pub mod significance;

pub use assignment::AssignmentEngine;
pub use model::{
    AssignmentResult, Experiment, ExperimentAssignment, ExperimentEvent, ExperimentResults,
    ExperimentStatus, EventType, RecommendedAction, Variant, VariantResult, VariantStats,
    CONTROL_VARIANT_ID,
};
