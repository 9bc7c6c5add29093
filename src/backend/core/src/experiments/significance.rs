//! Statistical readout for running experiments.
//!
//! Pure functions over aggregated variant counters. Each non-control
//! variant is compared against control with a two-proportion pooled
//! z-test; the resulting confidence feeds a four-way recommendation.

use crate::config::ExperimentsConfig;
use crate::experiments::model::{
    Experiment, ExperimentResults, RecommendedAction, VariantResult, VariantStats,
    CONTROL_VARIANT_ID,
};

/// Abramowitz & Stegun 7.1.26 rational approximation of erf.
/// Maximum absolute error 1.5e-7, well inside confidence tolerances.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();

    sign * y
}

/// Standard normal CDF.
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Confidence that two observed proportions differ, via the pooled
/// two-proportion z-test. Returns a value in [0.5, 1.0); 0.5 when the
/// pooled standard error degenerates to zero (identical all-or-nothing
/// samples).
pub fn two_proportion_confidence(control: &VariantStats, variant: &VariantStats) -> f64 {
    let n1 = control.impressions as f64;
    let n2 = variant.impressions as f64;
    if n1 == 0.0 || n2 == 0.0 {
        return 0.5;
    }

    let p1 = control.conversions as f64 / n1;
    let p2 = variant.conversions as f64 / n2;
    let pooled = (control.conversions + variant.conversions) as f64 / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        return 0.5;
    }

    let z = (p2 - p1) / se;
    normal_cdf(z.abs())
}

/// Turn raw variant counters into the full experiment readout.
///
/// `stats` may omit variants that have no events yet; they are filled
/// in with zero counters so every configured variant appears in the
/// result.
pub fn evaluate(
    experiment: &Experiment,
    stats: Vec<VariantStats>,
    config: &ExperimentsConfig,
) -> ExperimentResults {
    let mut by_id: std::collections::BTreeMap<String, VariantStats> = stats
        .into_iter()
        .map(|s| (s.variant_id.clone(), s))
        .collect();

    for variant_id in experiment.variants.keys() {
        by_id
            .entry(variant_id.clone())
            .or_insert_with(|| VariantStats {
                variant_id: variant_id.clone(),
                ..VariantStats::default()
            });
    }

    let control = by_id.get(CONTROL_VARIANT_ID).cloned().unwrap_or_default();
    let control_sufficient = control.impressions >= config.min_sample_size;
    let control_rate = control.conversion_rate();

    let mut variants = Vec::with_capacity(by_id.len());
    let mut winner: Option<(String, f64)> = None;
    let mut best_confidence = 0.0_f64;
    let mut total_sample = 0_u64;

    for (variant_id, stat) in &by_id {
        total_sample += stat.impressions;

        let sufficient = stat.impressions >= config.min_sample_size;
        let is_control = variant_id == CONTROL_VARIANT_ID;

        let confidence_vs_control = if is_control || !sufficient || !control_sufficient {
            None
        } else {
            Some(two_proportion_confidence(&control, stat))
        };

        if let Some(confidence) = confidence_vs_control {
            best_confidence = best_confidence.max(confidence);

            // Winner must beat control, not merely differ from it.
            // Ties on confidence break toward the lexicographically
            // smaller variant id; BTreeMap order makes that the first
            // candidate seen.
            if confidence >= experiment.confidence_level
                && stat.conversion_rate() > control_rate
                && winner.as_ref().map_or(true, |(_, best)| confidence > *best)
            {
                winner = Some((variant_id.clone(), confidence));
            }
        }

        let name = experiment
            .variants
            .get(variant_id)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| variant_id.clone());

        variants.push(VariantResult {
            variant_id: variant_id.clone(),
            name,
            impressions: stat.impressions,
            conversions: stat.conversions,
            conversion_rate: stat.conversion_rate(),
            revenue: stat.revenue,
            confidence_vs_control,
            sufficient_sample: sufficient,
        });
    }

    let is_significant = winner.is_some();
    let confidence = winner
        .as_ref()
        .map(|(_, c)| *c)
        .unwrap_or(best_confidence);

    let recommended_action = recommend(experiment, winner.as_ref(), total_sample, config);

    ExperimentResults {
        experiment_id: experiment.id,
        variants,
        winner: winner.map(|(id, _)| id),
        confidence,
        is_significant,
        recommended_action,
        total_sample,
    }
}

fn recommend(
    experiment: &Experiment,
    winner: Option<&(String, f64)>,
    total_sample: u64,
    config: &ExperimentsConfig,
) -> RecommendedAction {
    match winner {
        Some((_, confidence)) => {
            if experiment.auto_winner_enabled && *confidence >= config.auto_deploy_threshold {
                RecommendedAction::AutoDeploy
            } else {
                RecommendedAction::ManualReview
            }
        }
        None => match experiment.required_sample_size {
            Some(required) if total_sample >= required => RecommendedAction::DeclareNoDifference,
            _ => RecommendedAction::ContinueRunning,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(variant_id: &str, impressions: u64, conversions: u64) -> VariantStats {
        VariantStats {
            variant_id: variant_id.to_string(),
            impressions,
            conversions,
            revenue: 0.0,
        }
    }

    #[test]
    fn test_normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.96) - 0.975).abs() < 1e-4);
        assert!((normal_cdf(-1.96) - 0.025).abs() < 1e-4);
        assert!(normal_cdf(6.0) > 0.999_999);
    }

    #[test]
    fn test_confidence_for_clear_lift() {
        // 5% vs 8% on 1000 impressions each: z is about 2.72
        let c = two_proportion_confidence(&stats("control", 1000, 50), &stats("v", 1000, 80));
        assert!(c > 0.99, "confidence {}", c);
    }

    #[test]
    fn test_confidence_symmetric_in_direction() {
        let up = two_proportion_confidence(&stats("control", 1000, 50), &stats("v", 1000, 80));
        let down = two_proportion_confidence(&stats("control", 1000, 80), &stats("v", 1000, 50));
        assert!((up - down).abs() < 1e-12);
    }

    #[test]
    fn test_zero_standard_error_degenerates_to_half() {
        assert_eq!(
            two_proportion_confidence(&stats("control", 100, 0), &stats("v", 100, 0)),
            0.5
        );
        assert_eq!(
            two_proportion_confidence(&stats("control", 100, 100), &stats("v", 100, 100)),
            0.5
        );
    }

    #[test]
    fn test_empty_sample_degenerates_to_half() {
        assert_eq!(
            two_proportion_confidence(&stats("control", 0, 0), &stats("v", 100, 10)),
            0.5
        );
    }
}
