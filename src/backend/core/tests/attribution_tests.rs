//! Integration tests for conversion attribution and channel reports.
//!
//! Tests cover:
//! - Credit allocation per model over a seeded touchpoint journey
//! - Lookback window boundaries anchored on the conversion time
//! - Unattributed conversions as explicit zero-credit results
//! - Channel report rollups, spend joins, and the ROI zero-spend guard

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use signalpath_core::attribution::{AttributionEngine, AttributionModel, Conversion, Touchpoint};
use signalpath_core::config::AttributionConfig;
use signalpath_core::events::NullEventSink;
use signalpath_core::store::InMemoryStore;

fn touchpoint(channel: &str, at: DateTime<Utc>) -> Touchpoint {
    Touchpoint {
        occurred_at: at,
        channel: channel.to_string(),
        campaign_id: Some("summer-launch".to_string()),
        source: None,
        medium: None,
        interaction: "click".to_string(),
    }
}

fn engine() -> (AttributionEngine<InMemoryStore>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let engine = AttributionEngine::new(
        store.clone(),
        Arc::new(NullEventSink),
        AttributionConfig::default(),
    );
    (engine, store)
}

/// Journey used across model tests: email 20 days out, social 5 days
/// out, search 1 day out, converting for $100.
fn seed_journey(store: &InMemoryStore, actor: &str, conversion_at: DateTime<Utc>) -> Conversion {
    store.add_touchpoint(actor, touchpoint("email", conversion_at - Duration::days(20)));
    store.add_touchpoint(actor, touchpoint("social", conversion_at - Duration::days(5)));
    store.add_touchpoint(actor, touchpoint("search", conversion_at - Duration::days(1)));
    Conversion {
        actor_id: actor.to_string(),
        value: 100.0,
        occurred_at: conversion_at,
    }
}

// ============================================================================
// Per-model Credit Allocation
// ============================================================================

#[tokio::test]
async fn test_linear_splits_evenly() {
    let (engine, store) = engine();
    let conversion = seed_journey(&store, "actor-1", Utc::now());

    let result = engine
        .attribute(&conversion, AttributionModel::Linear)
        .await
        .unwrap();

    assert!(result.is_attributed());
    for channel in ["email", "social", "search"] {
        let credit = result.channel_credit[channel];
        assert!((credit - 100.0 / 3.0).abs() < 1e-9, "{}: {}", channel, credit);
    }
    let total: f64 = result.channel_credit.values().sum();
    assert!((total - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_last_touch_credits_final_channel() {
    let (engine, store) = engine();
    let conversion = seed_journey(&store, "actor-1", Utc::now());

    let result = engine
        .attribute(&conversion, AttributionModel::LastTouch)
        .await
        .unwrap();

    assert!((result.channel_credit["search"] - 100.0).abs() < 1e-9);
    assert_eq!(result.channel_credit.get("email"), Some(&0.0));
}

#[tokio::test]
async fn test_position_based_u_shape() {
    let (engine, store) = engine();
    let conversion = seed_journey(&store, "actor-1", Utc::now());

    let model = AttributionModel::PositionBased {
        first_share: 0.4,
        last_share: 0.4,
    };
    let result = engine.attribute(&conversion, model).await.unwrap();

    assert!((result.channel_credit["email"] - 40.0).abs() < 1e-9);
    assert!((result.channel_credit["social"] - 20.0).abs() < 1e-9);
    assert!((result.channel_credit["search"] - 40.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_time_decay_favors_recent_channel() {
    let (engine, store) = engine();
    let conversion = seed_journey(&store, "actor-1", Utc::now());

    let model = AttributionModel::TimeDecay {
        half_life_secs: 7.0 * 86_400.0,
    };
    let result = engine.attribute(&conversion, model).await.unwrap();

    assert!(result.channel_credit["search"] > result.channel_credit["social"]);
    assert!(result.channel_credit["social"] > result.channel_credit["email"]);
    let total: f64 = result.channel_credit.values().sum();
    assert!((total - 100.0).abs() < 1e-9);
}

// ============================================================================
// Window Boundaries
// ============================================================================

#[tokio::test]
async fn test_touchpoint_outside_window_excluded() {
    let (engine, store) = engine();
    let now = Utc::now();
    // 40 days out is beyond the default 30-day lookback.
    store.add_touchpoint("actor-1", touchpoint("display", now - Duration::days(40)));
    store.add_touchpoint("actor-1", touchpoint("search", now - Duration::days(2)));
    let conversion = Conversion {
        actor_id: "actor-1".to_string(),
        value: 50.0,
        occurred_at: now,
    };

    let result = engine
        .attribute(&conversion, AttributionModel::Linear)
        .await
        .unwrap();

    assert_eq!(result.touchpoints.len(), 1);
    assert!((result.channel_credit["search"] - 50.0).abs() < 1e-9);
    assert!(!result.channel_credit.contains_key("display"));
}

#[tokio::test]
async fn test_window_anchored_on_conversion_time() {
    let (engine, store) = engine();
    // Historical conversion: a touchpoint 10 days before it counts
    // even though it is far in the past relative to the wall clock.
    let conversion_at = Utc::now() - Duration::days(90);
    store.add_touchpoint("actor-1", touchpoint("email", conversion_at - Duration::days(10)));
    let conversion = Conversion {
        actor_id: "actor-1".to_string(),
        value: 10.0,
        occurred_at: conversion_at,
    };

    let result = engine
        .attribute(&conversion, AttributionModel::FirstTouch)
        .await
        .unwrap();
    assert!(result.is_attributed());
    assert!((result.channel_credit["email"] - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_empty_window_is_unattributed_not_error() {
    let (engine, _store) = engine();
    let conversion = Conversion {
        actor_id: "loner".to_string(),
        value: 75.0,
        occurred_at: Utc::now(),
    };

    let result = engine
        .attribute(&conversion, AttributionModel::Linear)
        .await
        .unwrap();

    assert!(!result.is_attributed());
    assert!(result.channel_credit.is_empty());
    assert_eq!(result.conversion_value, 75.0);
}

// ============================================================================
// Channel Reports
// ============================================================================

#[tokio::test]
async fn test_report_joins_spend_and_computes_roi() {
    let (engine, store) = engine();
    let org_id = Uuid::new_v4();
    let now = Utc::now();

    let conversion = seed_journey(&store, "actor-1", now - Duration::days(1));
    store.add_conversion(org_id, conversion);
    store.add_spend(org_id, "search", now - Duration::days(7), now, 20.0);
    store.add_spend(org_id, "email", now - Duration::days(7), now, 0.0);

    let report = engine
        .attribution_report(org_id, now - Duration::days(7), now, AttributionModel::Linear)
        .await
        .unwrap();

    assert_eq!(report.total_conversions, 1);
    assert_eq!(report.unattributed_conversions, 0);

    let search = report.channels.iter().find(|c| c.channel == "search").unwrap();
    assert!((search.attributed_value - 100.0 / 3.0).abs() < 1e-9);
    assert_eq!(search.conversion_count, 1);
    // (33.33 - 20) / 20
    assert!((search.roi - (100.0 / 3.0 - 20.0) / 20.0).abs() < 1e-9);

    let email = report.channels.iter().find(|c| c.channel == "email").unwrap();
    assert_eq!(email.roi, 0.0, "zero spend must not divide");
}

#[tokio::test]
async fn test_report_accounts_unattributed_value() {
    let (engine, store) = engine();
    let org_id = Uuid::new_v4();
    let now = Utc::now();

    let attributed = seed_journey(&store, "actor-1", now - Duration::days(1));
    store.add_conversion(org_id, attributed);
    store.add_conversion(
        org_id,
        Conversion {
            actor_id: "ghost".to_string(),
            value: 40.0,
            occurred_at: now - Duration::days(2),
        },
    );

    let report = engine
        .attribution_report(org_id, now - Duration::days(7), now, AttributionModel::Linear)
        .await
        .unwrap();

    assert_eq!(report.total_conversions, 2);
    assert_eq!(report.unattributed_conversions, 1);
    assert!((report.unattributed_value - 40.0).abs() < 1e-9);

    let attributed_total: f64 = report.channels.iter().map(|c| c.attributed_value).sum();
    assert!((attributed_total - 100.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_report_counts_only_credited_channels() {
    let (engine, store) = engine();
    let org_id = Uuid::new_v4();
    let now = Utc::now();

    let conversion = seed_journey(&store, "actor-1", now - Duration::days(1));
    store.add_conversion(org_id, conversion);

    // Last-touch gives all credit to "search"; the other channels in
    // the journey must not count the conversion or appear as rows.
    let report = engine
        .attribution_report(
            org_id,
            now - Duration::days(7),
            now,
            AttributionModel::LastTouch,
        )
        .await
        .unwrap();

    assert_eq!(report.channels.len(), 1);
    let search = report.channels.iter().find(|c| c.channel == "search").unwrap();
    assert_eq!(search.conversion_count, 1);
    assert!((search.attributed_value - 100.0).abs() < 1e-9);
    assert!(!report.channels.iter().any(|c| c.channel == "email"));
}

#[tokio::test]
async fn test_spend_outside_report_window_excluded() {
    let (engine, store) = engine();
    let org_id = Uuid::new_v4();
    let now = Utc::now();

    // Last quarter's spend must not leak into this week's report.
    store.add_spend(
        org_id,
        "search",
        now - Duration::days(90),
        now - Duration::days(60),
        400.0,
    );
    store.add_spend(org_id, "search", now - Duration::days(7), now, 25.0);

    let report = engine
        .attribution_report(
            org_id,
            now - Duration::days(7),
            now,
            AttributionModel::Linear,
        )
        .await
        .unwrap();

    let search = report.channels.iter().find(|c| c.channel == "search").unwrap();
    assert!((search.spend - 25.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_report_includes_spend_only_channels() {
    let (engine, store) = engine();
    let org_id = Uuid::new_v4();
    let now = Utc::now();
    store.add_spend(org_id, "billboard", now - Duration::days(7), now, 500.0);

    let report = engine
        .attribution_report(org_id, now - Duration::days(7), now, AttributionModel::Linear)
        .await
        .unwrap();

    let billboard = report
        .channels
        .iter()
        .find(|c| c.channel == "billboard")
        .unwrap();
    assert_eq!(billboard.attributed_value, 0.0);
    assert_eq!(billboard.conversion_count, 0);
    assert!((billboard.roi + 1.0).abs() < 1e-9, "all spend lost");
}
