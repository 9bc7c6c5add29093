//! In-memory store backend.
//!
//! Backs unit and integration tests; also useful for local runs
//! without Postgres. All maps live behind `parking_lot` locks held
//! only for the duration of each operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

use crate::attribution::model::{Conversion, Touchpoint};
use crate::error::Result;
use crate::experiments::model::{
    EventType, Experiment, ExperimentAssignment, ExperimentEvent, ExperimentStatus, VariantStats,
};
use crate::store::{AssignmentInsert, ExperimentStore, SpendLedger, TouchpointStore};

struct SpendEntry {
    org_id: Uuid,
    channel: String,
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    amount: f64,
}

#[derive(Default)]
struct Inner {
    experiments: HashMap<Uuid, Experiment>,
    assignments: HashMap<(Uuid, String), ExperimentAssignment>,
    events: Vec<ExperimentEvent>,
    touchpoints: HashMap<String, Vec<Touchpoint>>,
    conversions: HashMap<Uuid, Vec<Conversion>>,
    spend: Vec<SpendEntry>,
}

#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a touchpoint for an actor.
    pub fn add_touchpoint(&self, actor_id: &str, touchpoint: Touchpoint) {
        self.inner
            .write()
            .touchpoints
            .entry(actor_id.to_string())
            .or_default()
            .push(touchpoint);
    }

    /// Seed a conversion for an organization.
    pub fn add_conversion(&self, org_id: Uuid, conversion: Conversion) {
        self.inner
            .write()
            .conversions
            .entry(org_id)
            .or_default()
            .push(conversion);
    }

    /// Seed recorded spend for a channel over a spend period.
    pub fn add_spend(
        &self,
        org_id: Uuid,
        channel: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        amount: f64,
    ) {
        self.inner.write().spend.push(SpendEntry {
            org_id,
            channel: channel.to_string(),
            period_start,
            period_end,
            amount,
        });
    }

    /// Number of stored experiment events, for test assertions.
    pub fn event_count(&self, experiment_id: Uuid) -> usize {
        self.inner
            .read()
            .events
            .iter()
            .filter(|e| e.experiment_id == experiment_id)
            .count()
    }
}

#[async_trait]
impl ExperimentStore for InMemoryStore {
    async fn insert_experiment(&self, experiment: &Experiment) -> Result<()> {
        self.inner
            .write()
            .experiments
            .insert(experiment.id, experiment.clone());
        Ok(())
    }

    async fn get_experiment(&self, id: Uuid) -> Result<Option<Experiment>> {
        Ok(self.inner.read().experiments.get(&id).cloned())
    }

    async fn update_experiment_status(
        &self,
        id: Uuid,
        status: ExperimentStatus,
        winner_variant_id: Option<&str>,
        started_at: Option<DateTime<Utc>>,
        ended_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(experiment) = inner.experiments.get_mut(&id) {
            experiment.status = status;
            if let Some(winner) = winner_variant_id {
                experiment.winner_variant_id = Some(winner.to_string());
            }
            experiment.started_at = started_at;
            experiment.ended_at = ended_at;
        }
        Ok(())
    }

    async fn insert_assignment_if_absent(
        &self,
        assignment: &ExperimentAssignment,
    ) -> Result<AssignmentInsert> {
        let mut inner = self.inner.write();
        let key = (assignment.experiment_id, assignment.actor_id.clone());
        match inner.assignments.get(&key) {
            Some(existing) => Ok(AssignmentInsert::Existing(existing.clone())),
            None => {
                inner.assignments.insert(key, assignment.clone());
                Ok(AssignmentInsert::Inserted)
            }
        }
    }

    async fn get_assignment(
        &self,
        experiment_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<ExperimentAssignment>> {
        Ok(self
            .inner
            .read()
            .assignments
            .get(&(experiment_id, actor_id.to_string()))
            .cloned())
    }

    async fn append_event(&self, event: &ExperimentEvent) -> Result<()> {
        self.inner.write().events.push(event.clone());
        Ok(())
    }

    async fn variant_stats(&self, experiment_id: Uuid) -> Result<Vec<VariantStats>> {
        let inner = self.inner.read();
        let mut by_variant: HashMap<String, VariantStats> = HashMap::new();

        for event in inner.events.iter().filter(|e| e.experiment_id == experiment_id) {
            let entry = by_variant
                .entry(event.variant_id.clone())
                .or_insert_with(|| VariantStats {
                    variant_id: event.variant_id.clone(),
                    ..VariantStats::default()
                });
            match event.event_type {
                EventType::Impression => entry.impressions += 1,
                EventType::Conversion => {
                    entry.conversions += 1;
                    entry.revenue += event.value.unwrap_or(0.0);
                }
                EventType::Custom => {}
            }
        }

        let mut stats: Vec<VariantStats> = by_variant.into_values().collect();
        stats.sort_by(|a, b| a.variant_id.cmp(&b.variant_id));
        Ok(stats)
    }
}

#[async_trait]
impl TouchpointStore for InMemoryStore {
    async fn touchpoints_in_window(
        &self,
        actor_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Touchpoint>> {
        let inner = self.inner.read();
        let mut touchpoints: Vec<Touchpoint> = inner
            .touchpoints
            .get(actor_id)
            .map(|tps| {
                tps.iter()
                    .filter(|tp| tp.occurred_at >= start && tp.occurred_at < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        touchpoints.sort_by_key(|tp| tp.occurred_at);
        Ok(touchpoints)
    }

    async fn conversions_in_window(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Conversion>> {
        let inner = self.inner.read();
        Ok(inner
            .conversions
            .get(&org_id)
            .map(|cs| {
                cs.iter()
                    .filter(|c| c.occurred_at >= start && c.occurred_at < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl SpendLedger for InMemoryStore {
    async fn spend_by_channel(
        &self,
        org_id: Uuid,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashMap<String, f64>> {
        let inner = self.inner.read();
        // Overlap semantics match the Postgres backend: any spend
        // period intersecting the report window counts in full.
        let mut totals: HashMap<String, f64> = HashMap::new();
        for entry in inner
            .spend
            .iter()
            .filter(|e| e.org_id == org_id && e.period_start < end && e.period_end > start)
        {
            *totals.entry(entry.channel.clone()).or_insert(0.0) += entry.amount;
        }
        Ok(totals)
    }
}
