//! Multi-model conversion attribution: credit allocation across
//! touchpoints and channel-level ROI reporting.

pub mod engine;
pub mod model;

pub use engine::AttributionEngine;
pub use model::{
    roi, AttributionModel, AttributionResult, ChannelPerformance, ChannelReport, Conversion,
    CreditedTouchpoint, Touchpoint,
};
