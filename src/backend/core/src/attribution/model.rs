//! Attribution domain types and credit-allocation models.
//!
//! `AttributionModel` is a closed enum: every model the engine supports
//! is a variant, matched exhaustively. Unknown model names -- including
//! the unsupported "data_driven" -- are rejected where the name enters
//! the system, never silently aliased to another model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::AttributionConfig;
use crate::error::{EngineError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Touchpoints & Conversions
// ═══════════════════════════════════════════════════════════════════════════════

/// A read-only projection of one marketing interaction from the
/// external event store. The attribution engine never writes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Touchpoint {
    pub occurred_at: DateTime<Utc>,
    pub channel: String,
    pub campaign_id: Option<String>,
    pub source: Option<String>,
    pub medium: Option<String>,
    pub interaction: String,
}

/// A terminal actor event carrying a monetary value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub actor_id: String,
    pub value: f64,
    pub occurred_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Attribution Models
// ═══════════════════════════════════════════════════════════════════════════════

/// Credit-allocation model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum AttributionModel {
    /// All credit to the earliest touchpoint
    FirstTouch,
    /// All credit to the latest touchpoint
    LastTouch,
    /// Equal credit to every touchpoint
    Linear,
    /// Credit decays exponentially with distance from the conversion
    TimeDecay { half_life_secs: f64 },
    /// U-shaped: endpoints take fixed shares, interior splits the rest
    PositionBased { first_share: f64, last_share: f64 },
}

impl AttributionModel {
    /// Model name used in API paths, metrics labels, and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FirstTouch => "first_touch",
            Self::LastTouch => "last_touch",
            Self::Linear => "linear",
            Self::TimeDecay { .. } => "time_decay",
            Self::PositionBased { .. } => "position_based",
        }
    }

    /// Resolve a model name against configured parameters.
    ///
    /// This is the only place a model name is interpreted; anything
    /// unknown (including "data_driven") fails here, before any
    /// touchpoints are fetched.
    pub fn from_name(name: &str, config: &AttributionConfig) -> Result<Self> {
        match name {
            "first_touch" => Ok(Self::FirstTouch),
            "last_touch" => Ok(Self::LastTouch),
            "linear" => Ok(Self::Linear),
            "time_decay" => Ok(Self::TimeDecay {
                half_life_secs: (config.time_decay_half_life_days * 86_400) as f64,
            }),
            "position_based" => Ok(Self::PositionBased {
                first_share: config.position_first_share,
                last_share: config.position_last_share,
            }),
            other => Err(EngineError::unsupported_model(other)),
        }
    }

    /// Compute per-touchpoint weights in [0, 1] summing to 1.0.
    ///
    /// `touchpoints` must be ordered ascending by time; weights are
    /// positional and align with the input slice. Empty input yields
    /// an empty weight vector.
    pub fn weights(&self, touchpoints: &[Touchpoint], conversion_at: DateTime<Utc>) -> Vec<f64> {
        let n = touchpoints.len();
        if n == 0 {
            return Vec::new();
        }

        match self {
            Self::FirstTouch => {
                let mut w = vec![0.0; n];
                w[0] = 1.0;
                w
            }
            Self::LastTouch => {
                let mut w = vec![0.0; n];
                w[n - 1] = 1.0;
                w
            }
            Self::Linear => vec![1.0 / n as f64; n],
            Self::TimeDecay { half_life_secs } => {
                let half_life = half_life_secs.max(f64::EPSILON);
                let raw: Vec<f64> = touchpoints
                    .iter()
                    .map(|tp| {
                        let age_secs = (conversion_at - tp.occurred_at).num_seconds().max(0) as f64;
                        (-age_secs / half_life).exp()
                    })
                    .collect();
                normalize(raw)
            }
            Self::PositionBased {
                first_share,
                last_share,
            } => {
                if n == 1 {
                    return vec![1.0];
                }
                if n == 2 {
                    // Endpoints absorb all the mass, renormalized to 1.0
                    return normalize(vec![*first_share, *last_share]);
                }
                let interior = (1.0 - first_share - last_share).max(0.0) / (n - 2) as f64;
                let mut w = vec![interior; n];
                w[0] = *first_share;
                w[n - 1] = *last_share;
                normalize(w)
            }
        }
    }
}

/// Scale a weight vector so it sums to 1.0. A degenerate all-zero
/// vector falls back to a uniform split.
fn normalize(raw: Vec<f64>) -> Vec<f64> {
    let total: f64 = raw.iter().sum();
    if total <= 0.0 {
        let n = raw.len();
        return vec![1.0 / n as f64; n];
    }
    raw.into_iter().map(|w| w / total).collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// Attribution Results
// ═══════════════════════════════════════════════════════════════════════════════

/// One touchpoint with its share of a conversion's value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditedTouchpoint {
    #[serde(flatten)]
    pub touchpoint: Touchpoint,
    pub weight: f64,
    pub credited_value: f64,
}

/// The derived attribution of a single conversion.
///
/// A pure function of (touchpoints, conversion value, model); it is
/// always recomputable and never the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributionResult {
    pub actor_id: String,
    pub model: AttributionModel,
    pub conversion_value: f64,
    pub conversion_at: DateTime<Utc>,

    /// Touchpoints in ascending time order with their credit
    pub touchpoints: Vec<CreditedTouchpoint>,

    /// Channel -> credited value
    pub channel_credit: HashMap<String, f64>,
}

impl AttributionResult {
    /// Whether any touchpoint earned credit. An unattributed
    /// conversion is a normal outcome callers must handle, not an
    /// error.
    pub fn is_attributed(&self) -> bool {
        !self.touchpoints.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Channel Reports
// ═══════════════════════════════════════════════════════════════════════════════

/// Per-channel rollup within a report window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPerformance {
    pub channel: String,
    pub attributed_value: f64,

    /// Conversions in which this channel earned any credit
    pub conversion_count: u64,

    pub spend: f64,
    pub roi: f64,
}

/// Channel-level attribution report over a reporting window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelReport {
    pub org_id: uuid::Uuid,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub model: AttributionModel,
    pub channels: Vec<ChannelPerformance>,

    /// Conversions whose window held no touchpoints
    pub unattributed_conversions: u64,
    pub unattributed_value: f64,

    pub total_conversions: u64,
}

/// ROI with the zero-spend guard: defined as 0 when spend is 0.
pub fn roi(attributed_value: f64, spend: f64) -> f64 {
    if spend == 0.0 {
        0.0
    } else {
        (attributed_value - spend) / spend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn touchpoint(channel: &str, at: DateTime<Utc>) -> Touchpoint {
        Touchpoint {
            occurred_at: at,
            channel: channel.to_string(),
            campaign_id: None,
            source: None,
            medium: None,
            interaction: "click".to_string(),
        }
    }

    fn three_touchpoints(conversion_at: DateTime<Utc>) -> Vec<Touchpoint> {
        vec![
            touchpoint("email", conversion_at - Duration::days(20)),
            touchpoint("social", conversion_at - Duration::days(5)),
            touchpoint("search", conversion_at - Duration::days(1)),
        ]
    }

    fn assert_sums_to_one(weights: &[f64]) {
        let total: f64 = weights.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "weights sum to {}", total);
    }

    #[test]
    fn test_first_touch_weights() {
        let now = Utc::now();
        let w = AttributionModel::FirstTouch.weights(&three_touchpoints(now), now);
        assert_eq!(w, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_last_touch_weights() {
        let now = Utc::now();
        let w = AttributionModel::LastTouch.weights(&three_touchpoints(now), now);
        assert_eq!(w, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_linear_weights() {
        let now = Utc::now();
        let w = AttributionModel::Linear.weights(&three_touchpoints(now), now);
        for weight in &w {
            assert!((weight - 1.0 / 3.0).abs() < 1e-12);
        }
        assert_sums_to_one(&w);
    }

    #[test]
    fn test_time_decay_favors_recent() {
        let now = Utc::now();
        let model = AttributionModel::TimeDecay {
            half_life_secs: 7.0 * 86_400.0,
        };
        let w = model.weights(&three_touchpoints(now), now);
        assert!(w[0] < w[1]);
        assert!(w[1] < w[2]);
        assert_sums_to_one(&w);
    }

    #[test]
    fn test_position_based_shares() {
        let now = Utc::now();
        let model = AttributionModel::PositionBased {
            first_share: 0.4,
            last_share: 0.4,
        };
        let w = model.weights(&three_touchpoints(now), now);
        assert!((w[0] - 0.4).abs() < 1e-12);
        assert!((w[1] - 0.2).abs() < 1e-12);
        assert!((w[2] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_single_touchpoint_gets_full_weight() {
        let now = Utc::now();
        let tps = vec![touchpoint("email", now - Duration::days(3))];
        for model in [
            AttributionModel::FirstTouch,
            AttributionModel::LastTouch,
            AttributionModel::Linear,
            AttributionModel::TimeDecay {
                half_life_secs: 86_400.0,
            },
            AttributionModel::PositionBased {
                first_share: 0.4,
                last_share: 0.4,
            },
        ] {
            let w = model.weights(&tps, now);
            assert_eq!(w.len(), 1);
            assert!((w[0] - 1.0).abs() < 1e-12, "{} failed", model.name());
        }
    }

    #[test]
    fn test_position_based_two_touchpoints_renormalizes() {
        let now = Utc::now();
        let tps = vec![
            touchpoint("email", now - Duration::days(2)),
            touchpoint("search", now - Duration::days(1)),
        ];
        let model = AttributionModel::PositionBased {
            first_share: 0.4,
            last_share: 0.4,
        };
        let w = model.weights(&tps, now);
        assert!((w[0] - 0.5).abs() < 1e-12);
        assert!((w[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_touchpoints_yield_empty_weights() {
        let now = Utc::now();
        assert!(AttributionModel::Linear.weights(&[], now).is_empty());
    }

    #[test]
    fn test_from_name_resolves_configured_parameters() {
        let config = AttributionConfig::default();
        let model = AttributionModel::from_name("time_decay", &config).unwrap();
        assert_eq!(
            model,
            AttributionModel::TimeDecay {
                half_life_secs: 7.0 * 86_400.0
            }
        );
    }

    #[test]
    fn test_from_name_rejects_data_driven() {
        let config = AttributionConfig::default();
        let err = AttributionModel::from_name("data_driven", &config).unwrap_err();
        assert_eq!(
            err.code(),
            crate::error::ErrorCode::UnsupportedAttributionModel
        );
    }

    #[test]
    fn test_roi_zero_spend_guard() {
        assert_eq!(roi(100.0, 0.0), 0.0);
        assert!((roi(150.0, 100.0) - 0.5).abs() < 1e-12);
        assert!((roi(50.0, 100.0) + 0.5).abs() < 1e-12);
    }
}
