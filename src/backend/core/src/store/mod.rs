//! Storage traits for the engines.
//!
//! Engines hold stores behind trait objects or generics rather than
//! reaching into process-global state, so tests run against the
//! in-memory backend while the server runs Postgres.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::attribution::model::{Conversion, Touchpoint};
use crate::error::Result;
use crate::experiments::model::{
    Experiment, ExperimentAssignment, ExperimentEvent, ExperimentStatus, VariantStats,
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Outcome of an insert-if-absent on the assignment table.
///
/// Concurrent first calls for the same (experiment, actor) race on the
/// store; exactly one caller observes `Inserted`, the rest read back
/// the row that won.
#[derive(Debug, Clone)]
pub enum AssignmentInsert {
    Inserted,
    Existing(ExperimentAssignment),
}

/// Persistence for experiments, assignments, and experiment events.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()>;

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>>;

    /// Persist a status transition, together with the timestamps and
    /// winner the transition sets. Validation happens in the engine.
    async fn update_experiment_status(
        &self,
        id: Uuid,
        status: ExperimentStatus,
        winner_variant_id: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Insert the assignment only if no row exists for its
    /// (experiment_id, actor_id). The existing row, when there is one,
    /// is returned so the caller can serve the sticky variant.
    async fn insert_assignment_if_absent(
        &self,
        assignment: &ExperimentAssignment,
    ) -> Result<AssignmentInsert>;

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<ExperimentAssignment>>;

    async fn append_event(&self, event: &ExperimentEvent) -> Result<()>;

    /// Aggregate impression/conversion/revenue counters per variant.
    async fn variant_stats(&self, experiment_id: Uuid) -> Result<Vec<VariantStats>>;
}

/// Read-only access to the marketing touchpoint and conversion streams.
#[async_trait]
pub trait TouchpointStore: Send + Sync {
    /// Touchpoints for one actor in [start, end), ascending by time.
    async fn touchpoints_in_window(
        &self,
        actor_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>>;

    /// Conversions for one organization in [start, end).
    async fn conversions_in_window(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Conversion>>;
}

/// Recorded marketing spend per channel, for ROI computation.
#[async_trait]
pub trait SpendLedger: Send + Sync {
    /// Total spend per channel for one organization in [start, end).
    async fn spend_by_channel(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, f64>>;
}
