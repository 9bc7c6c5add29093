//! Experiment domain types: experiments, variants, assignments, events,
//! and the significance readout returned by `results`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{EngineError, Result};

/// The reserved variant id used as the comparison baseline.
pub const CONTROL_VARIANT_ID: &str = "control";

// ═══════════════════════════════════════════════════════════════════════════════
// Experiment
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Archived,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(Self::Draft),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(EngineError::validation(format!(
                "Unknown experiment status: {}",
                other
            ))),
        }
    }

    /// Whether a transition to `next` is allowed.
    ///
    /// Completed and archived are terminal except for archival itself.
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Draft, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Paused, Running)
                | (Paused, Completed)
                | (Draft, Archived)
                | (Completed, Archived)
                | (Paused, Archived)
        )
    }
}

/// One treatment arm of an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    /// Human-readable name shown in readouts
    pub name: String,

    /// Fraction of traffic routed to this variant, in [0, 1]
    pub allocation: f64,

    /// Content payload served to assigned actors
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// A named controlled experiment.
///
/// Variants are keyed by id in a `BTreeMap` so iteration order is fixed,
/// which the cumulative-allocation bucket walk relies on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,

    /// The metric this experiment optimizes (e.g. "signup_conversion")
    pub primary_metric: String,

    /// Confidence threshold a variant must meet to be declared winner
    pub confidence_level: f64,

    /// Pre-declared total sample size; when reached without
    /// significance, the readout recommends declaring no difference.
    pub required_sample_size: Option<u64>,

    /// Whether a high-confidence winner may be recommended for
    /// deployment without manual review.
    pub auto_winner_enabled: bool,

    pub status: ExperimentStatus,

    /// Variant id -> variant, in fixed (sorted) order
    pub variants: BTreeMap<String, Variant>,

    pub winner_variant_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Experiment {
    /// Validate the variant configuration before traffic flows.
    ///
    /// Called at activation time, not at assignment time, so a bad
    /// configuration is rejected before any actor is bucketed.
    pub fn validate_for_activation(&self, allocation_epsilon: f64) -> Result<()> {
        if self.variants.len() < 2 {
            return Err(EngineError::invalid_variant_configuration(format!(
                "a running experiment needs at least 2 variants, got {}",
                self.variants.len()
            )));
        }

        if !self.variants.contains_key(CONTROL_VARIANT_ID) {
            return Err(EngineError::invalid_variant_configuration(
                "no 'control' variant defined",
            ));
        }

        for (id, variant) in &self.variants {
            if !(0.0..=1.0).contains(&variant.allocation) {
                return Err(EngineError::invalid_variant_configuration(format!(
                    "variant '{}' allocation {} outside [0, 1]",
                    id, variant.allocation
                )));
            }
        }

        let total: f64 = self.variants.values().map(|v| v.allocation).sum();
        if (total - 1.0).abs() > allocation_epsilon {
            return Err(EngineError::invalid_variant_configuration(format!(
                "variant allocations sum to {}, expected 1.0",
                total
            )));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assignments & Events
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable (experiment, actor) -> variant mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub experiment_id: Uuid,
    pub actor_id: String,
    pub variant_id: String,
    pub assigned_at: DateTime<Utc>,
}

/// Type of an experiment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Impression,
    Conversion,
    Custom,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Impression => "impression",
            Self::Conversion => "conversion",
            Self::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "impression" => Ok(Self::Impression),
            "conversion" => Ok(Self::Conversion),
            "custom" => Ok(Self::Custom),
            other => Err(EngineError::validation(format!(
                "Unknown event type: {}",
                other
            ))),
        }
    }
}

/// An append-only experiment fact, tagged with the actor's variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentEvent {
    pub experiment_id: Uuid,
    pub actor_id: String,
    pub variant_id: String,
    pub event_type: EventType,
    pub value: Option<f64>,
    pub occurred_at: DateTime<Utc>,
}

/// Result of an `assign` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResult {
    pub variant_id: String,
    pub variant_name: String,
    pub is_new_assignment: bool,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Results
// ═══════════════════════════════════════════════════════════════════════════════

/// Raw per-variant counters aggregated from the event store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant_id: String,
    pub impressions: u64,
    pub conversions: u64,
    pub revenue: f64,
}

impl VariantStats {
    /// Conversions per impression; 0 when no impressions.
    pub fn conversion_rate(&self) -> f64 {
        if self.impressions == 0 {
            0.0
        } else {
            self.conversions as f64 / self.impressions as f64
        }
    }
}

/// Per-variant readout within `ExperimentResults`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantResult {
    pub variant_id: String,
    pub name: String,
    pub impressions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub revenue: f64,

    /// Confidence that this variant beats control; absent for control
    /// itself and for variants below the minimum sample threshold.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_vs_control: Option<f64>,

    /// False while this variant has fewer impressions than the minimum
    /// sample size. Surfaced as a field, not an error: callers must be
    /// able to tell "not yet significant" apart from "failed".
    pub sufficient_sample: bool,
}

/// What the decision procedure recommends for an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    /// Significant at the auto-deploy threshold and auto-winner is on
    AutoDeploy,
    /// Significant, but a human should confirm before deploying
    ManualReview,
    /// Required sample reached without significance
    DeclareNoDifference,
    /// Keep collecting data
    ContinueRunning,
}

/// Full significance readout for an experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: Uuid,
    pub variants: Vec<VariantResult>,

    /// Winning variant id, present only when significant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,

    /// Best confidence observed among eligible variants
    pub confidence: f64,

    pub is_significant: bool,
    pub recommended_action: RecommendedAction,

    /// Total impressions across all variants
    pub total_sample: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn experiment_with(allocations: &[(&str, f64)]) -> Experiment {
        let variants = allocations
            .iter()
            .map(|(id, alloc)| {
                (
                    id.to_string(),
                    Variant {
                        name: id.to_string(),
                        allocation: *alloc,
                        payload: serde_json::Value::Null,
                    },
                )
            })
            .collect();

        Experiment {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "checkout-cta".to_string(),
            primary_metric: "conversion".to_string(),
            confidence_level: 0.95,
            required_sample_size: None,
            auto_winner_enabled: false,
            status: ExperimentStatus::Draft,
            variants,
            winner_variant_id: None,
            started_at: None,
            ended_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_activation_accepts_valid_configuration() {
        let exp = experiment_with(&[("control", 0.5), ("v1", 0.5)]);
        assert!(exp.validate_for_activation(1e-6).is_ok());
    }

    #[test]
    fn test_activation_rejects_single_variant() {
        let exp = experiment_with(&[("control", 1.0)]);
        assert!(exp.validate_for_activation(1e-6).is_err());
    }

    #[test]
    fn test_activation_rejects_missing_control() {
        let exp = experiment_with(&[("v1", 0.5), ("v2", 0.5)]);
        assert!(exp.validate_for_activation(1e-6).is_err());
    }

    #[test]
    fn test_activation_rejects_bad_allocation_sum() {
        let exp = experiment_with(&[("control", 0.5), ("v1", 0.4)]);
        assert!(exp.validate_for_activation(1e-6).is_err());
    }

    #[test]
    fn test_status_transitions() {
        use ExperimentStatus::*;
        assert!(Draft.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Archived.can_transition_to(Running));
    }

    #[test]
    fn test_conversion_rate_zero_without_impressions() {
        let stats = VariantStats {
            variant_id: "v1".to_string(),
            impressions: 0,
            conversions: 0,
            revenue: 0.0,
        };
        assert_eq!(stats.conversion_rate(), 0.0);
    }
}
