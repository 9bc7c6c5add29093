//! Signalpath Core - Attribution & Experimentation Engine
//!
//! The engine answers two questions for a marketing platform:
//!
//! - **Which variant does this actor see?** Deterministic, sticky A/B
//!   assignment with a statistical significance readout
//!   ([`experiments`]).
//! - **Which channels earned this conversion?** Multi-model credit
//!   allocation over the touchpoint stream with channel-level ROI
//!   ([`attribution`]).
//!
//! Both engines are pure over their storage traits ([`store`]), emit
//! outbound events through a pluggable sink ([`events`]), and are
//! served over HTTP by [`api`].

pub mod api;
pub mod attribution;
pub mod config;
pub mod error;
pub mod events;
pub mod experiments;
pub mod store;
pub mod telemetry;

pub use config::Config;
pub use error::{EngineError, ErrorCode, ErrorContext, Result};

/// Commonly used types, importable in one line.
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::attribution::{AttributionEngine, AttributionModel, Conversion, Touchpoint};
    pub use crate::config::Config;
    pub use crate::error::{EngineError, ErrorCode, Result};
    pub use crate::events::{EventSink, MpscEventSink, NullEventSink};
    pub use crate::experiments::{
        AssignmentEngine, EventType, Experiment, ExperimentStatus, RecommendedAction, Variant,
        CONTROL_VARIANT_ID,
    };
    pub use crate::store::{
        ExperimentStore, InMemoryStore, PostgresStore, SpendLedger, TouchpointStore,
    };
}
