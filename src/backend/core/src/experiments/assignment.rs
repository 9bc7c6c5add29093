//! Deterministic variant assignment and the experiment lifecycle.
//!
//! Bucketing is a pure function of (experiment_id, actor_id): the first
//! eight bytes of SHA-256 over `"{experiment_id}:{actor_id}"` scaled
//! into [0, 1), walked over the cumulative variant allocations in fixed
//! (sorted) order. No RNG, no clock, no stored counter; two calls for
//! the same pair always land on the same variant, even across restarts.

use chrono::Utc;
use metrics::counter;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::ExperimentsConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventEnvelope, EventSink};
use crate::experiments::model::{
    AssignmentResult, Experiment, ExperimentAssignment, ExperimentEvent, ExperimentResults,
    ExperimentStatus, EventType,
};
use crate::experiments::significance;
use crate::store::{AssignmentInsert, ExperimentStore};

/// Variant assignment, event recording, and lifecycle transitions.
///
/// Generic over the store so tests run in memory; the event sink is a
/// trait object because the concrete sink is a deployment decision.
pub struct AssignmentEngine<S> {
    store: Arc<S>,
    events: Arc<dyn EventSink>,
    config: ExperimentsConfig,
}

impl<S: ExperimentStore> AssignmentEngine<S> {
    pub fn new(store: Arc<S>, events: Arc<dyn EventSink>, config: ExperimentsConfig) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Fetch an experiment by id.
    pub async fn get_experiment(&self, experiment_id: Uuid) -> Result<Experiment> {
        self.require_experiment(experiment_id).await
    }

    /// Persist a new draft experiment.
    #[instrument(skip(self, experiment), fields(experiment_id = %experiment.id))]
    pub async fn create_experiment(&self, experiment: &Experiment) -> Result<()> {
        if experiment.status != ExperimentStatus::Draft {
            return Err(EngineError::validation(
                "new experiments must start in draft status",
            ));
        }
        self.store.insert_experiment(experiment).await?;
        info!(experiment_id = %experiment.id, name = %experiment.name, "Experiment created");
        Ok(())
    }

    /// Move a draft or paused experiment into running.
    ///
    /// The variant configuration is validated here so traffic never
    /// reaches a misconfigured experiment.
    #[instrument(skip(self))]
    pub async fn activate(&self, experiment_id: Uuid) -> Result<Experiment> {
        let experiment = self.require_experiment(experiment_id).await?;
        experiment.validate_for_activation(self.config.allocation_epsilon)?;
        self.transition(experiment, ExperimentStatus::Running, None)
            .await
    }

    #[instrument(skip(self))]
    pub async fn pause(&self, experiment_id: Uuid) -> Result<Experiment> {
        let experiment = self.require_experiment(experiment_id).await?;
        self.transition(experiment, ExperimentStatus::Paused, None)
            .await
    }

    /// Complete the experiment, optionally recording the deployed
    /// winner.
    #[instrument(skip(self))]
    pub async fn complete(
        &self,
        experiment_id: Uuid,
        winner_variant_id: Option<String>,
    ) -> Result<Experiment> {
        let experiment = self.require_experiment(experiment_id).await?;

        if let Some(winner) = &winner_variant_id {
            if !experiment.variants.contains_key(winner) {
                return Err(EngineError::validation(format!(
                    "winner '{}' is not a variant of this experiment",
                    winner
                )));
            }
        }

        self.transition(experiment, ExperimentStatus::Completed, winner_variant_id)
            .await
    }

    async fn transition(
        &self,
        mut experiment: Experiment,
        next: ExperimentStatus,
        winner_variant_id: Option<String>,
    ) -> Result<Experiment> {
        let from = experiment.status;
        if !from.can_transition_to(next) {
            return Err(EngineError::invalid_status_transition(
                from.as_str(),
                next.as_str(),
            ));
        }

        let now = Utc::now();
        let started_at = match (next, experiment.started_at) {
            (ExperimentStatus::Running, None) => Some(now),
            (_, existing) => existing,
        };
        let ended_at = match next {
            ExperimentStatus::Completed => Some(now),
            _ => experiment.ended_at,
        };

        self.store
            .update_experiment_status(
                experiment.id,
                next,
                winner_variant_id.as_deref(),
                started_at,
                ended_at,
            )
            .await?;

        experiment.status = next;
        experiment.started_at = started_at;
        experiment.ended_at = ended_at;
        if winner_variant_id.is_some() {
            experiment.winner_variant_id = winner_variant_id;
        }

        self.events
            .emit(EventEnvelope::new(EngineEvent::ExperimentStatusChanged {
                experiment_id: experiment.id,
                from: from.as_str().to_string(),
                to: next.as_str().to_string(),
            }));

        info!(
            experiment_id = %experiment.id,
            from = from.as_str(),
            to = next.as_str(),
            "Experiment status changed"
        );

        Ok(experiment)
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Assignment
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Assign an actor to a variant, sticky per (experiment, actor).
    ///
    /// The first call for a pair persists the assignment and records an
    /// impression; under concurrent first calls the store decides a
    /// single winner and every caller serves that winner's variant.
    #[instrument(skip(self), fields(%experiment_id))]
    pub async fn assign(&self, experiment_id: Uuid, actor_id: &str) -> Result<AssignmentResult> {
        let experiment = self.require_running(experiment_id).await?;

        let bucket = bucket(experiment_id, actor_id);
        let variant_id = select_variant(&experiment, bucket);

        let assignment = ExperimentAssignment {
            experiment_id,
            actor_id: actor_id.to_string(),
            variant_id: variant_id.clone(),
            assigned_at: Utc::now(),
        };

        let (variant_id, is_new_assignment) =
            match self.store.insert_assignment_if_absent(&assignment).await? {
                AssignmentInsert::Inserted => {
                    self.store
                        .append_event(&ExperimentEvent {
                            experiment_id,
                            actor_id: actor_id.to_string(),
                            variant_id: variant_id.clone(),
                            event_type: EventType::Impression,
                            value: None,
                            occurred_at: assignment.assigned_at,
                        })
                        .await?;

                    self.events
                        .emit(EventEnvelope::new(EngineEvent::AssignmentCreated {
                            experiment_id,
                            actor_id: actor_id.to_string(),
                            variant_id: variant_id.clone(),
                        }));

                    counter!(
                        "signalpath_assignments_total",
                        "variant_id" => variant_id.clone()
                    )
                    .increment(1);

                    (variant_id, true)
                }
                AssignmentInsert::Existing(existing) => (existing.variant_id, false),
            };

        let variant_name = experiment
            .variants
            .get(&variant_id)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| variant_id.clone());

        Ok(AssignmentResult {
            variant_id,
            variant_name,
            is_new_assignment,
        })
    }

    /// Record an experiment event for an already-assigned actor.
    ///
    /// An unassigned actor is a silent no-op: conversions arriving for
    /// actors who never entered the experiment carry no variant and
    /// must not distort the counters.
    #[instrument(skip(self), fields(%experiment_id))]
    pub async fn record(
        &self,
        experiment_id: Uuid,
        actor_id: &str,
        event_type: EventType,
        value: Option<f64>,
    ) -> Result<()> {
        self.require_running(experiment_id).await?;

        let Some(assignment) = self.store.get_assignment(experiment_id, actor_id).await? else {
            debug!(
                %experiment_id,
                actor_id,
                event_type = event_type.as_str(),
                "Dropping event for unassigned actor"
            );
            return Ok(());
        };

        self.store
            .append_event(&ExperimentEvent {
                experiment_id,
                actor_id: actor_id.to_string(),
                variant_id: assignment.variant_id.clone(),
                event_type,
                value,
                occurred_at: Utc::now(),
            })
            .await?;

        self.events
            .emit(EventEnvelope::new(EngineEvent::ExperimentEventRecorded {
                experiment_id,
                actor_id: actor_id.to_string(),
                variant_id: assignment.variant_id.clone(),
                event_type: event_type.as_str().to_string(),
                value,
            }));

        counter!(
            "signalpath_experiment_events_total",
            "event_type" => event_type.as_str(),
            "variant_id" => assignment.variant_id
        )
        .increment(1);

        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Results
    // ═══════════════════════════════════════════════════════════════════════════════

    /// Aggregate counters and run the significance readout.
    #[instrument(skip(self), fields(%experiment_id))]
    pub async fn results(&self, experiment_id: Uuid) -> Result<ExperimentResults> {
        let experiment = self.require_experiment(experiment_id).await?;
        let stats = self.store.variant_stats(experiment_id).await?;
        Ok(significance::evaluate(&experiment, stats, &self.config))
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════════════

    async fn require_experiment(&self, experiment_id: Uuid) -> Result<Experiment> {
        self.store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| EngineError::experiment_not_found(experiment_id))
    }

    async fn require_running(&self, experiment_id: Uuid) -> Result<Experiment> {
        let experiment = self.require_experiment(experiment_id).await?;
        if experiment.status != ExperimentStatus::Running {
            return Err(EngineError::experiment_not_active(
                experiment_id,
                experiment.status.as_str(),
            ));
        }
        Ok(experiment)
    }
}

/// Map (experiment, actor) to a bucket position in [0, 1).
pub fn bucket(experiment_id: Uuid, actor_id: &str) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(experiment_id.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(actor_id.as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) as f64 / (u64::MAX as f64 + 1.0)
}

/// Walk cumulative allocations in fixed variant order and return the
/// variant whose band contains the bucket. Accumulated floating-point
/// error can leave a sliver below 1.0; a bucket landing there falls to
/// the last variant.
pub fn select_variant(experiment: &Experiment, bucket: f64) -> String {
    let mut cumulative = 0.0;
    let mut last = None;

    for (variant_id, variant) in &experiment.variants {
        cumulative += variant.allocation;
        if bucket < cumulative {
            return variant_id.clone();
        }
        last = Some(variant_id);
    }

    last.map(|id| id.clone()).unwrap_or_default()
}
