//! Integration tests for deterministic variant assignment.
//!
//! Tests cover:
//! - Determinism and stickiness of assignment
//! - Stability across engine restarts (same experiment id)
//! - Allocation convergence over a large actor population
//! - Lifecycle gating (draft/paused experiments reject traffic)
//! - Silent no-op recording for unassigned actors

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use signalpath_core::config::ExperimentsConfig;
use signalpath_core::error::ErrorCode;
use signalpath_core::events::NullEventSink;
use signalpath_core::experiments::{
    AssignmentEngine, EventType, Experiment, ExperimentStatus, Variant,
};
use signalpath_core::store::InMemoryStore;

fn variant(name: &str, allocation: f64) -> Variant {
    Variant {
        name: name.to_string(),
        allocation,
        payload: serde_json::Value::Null,
    }
}

fn fifty_fifty_experiment(id: Uuid) -> Experiment {
    let mut variants = BTreeMap::new();
    variants.insert("control".to_string(), variant("Control", 0.5));
    variants.insert("treatment".to_string(), variant("Treatment", 0.5));
    Experiment {
        id,
        org_id: Uuid::new_v4(),
        name: "homepage-cta".to_string(),
        primary_metric: "signup_conversion".to_string(),
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

async fn running_engine(
    experiment: Experiment,
) -> (AssignmentEngine<InMemoryStore>, Arc<InMemoryStore>, Uuid) {
    let store = Arc::new(InMemoryStore::new());
    let engine = AssignmentEngine::new(
        store.clone(),
        Arc::new(NullEventSink),
        ExperimentsConfig::default(),
    );
    let id = experiment.id;
    engine.create_experiment(&experiment).await.unwrap();
    engine.activate(id).await.unwrap();
    (engine, store, id)
}

// ============================================================================
// Determinism & Stickiness
// ============================================================================

#[tokio::test]
async fn test_repeated_assignment_is_sticky() {
    let (engine, _store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    let first = engine.assign(id, "actor-42").await.unwrap();
    assert!(first.is_new_assignment);

    let second = engine.assign(id, "actor-42").await.unwrap();
    assert!(!second.is_new_assignment);
    assert_eq!(first.variant_id, second.variant_id);
}

#[tokio::test]
async fn test_assignment_survives_restart() {
    // Same experiment id on two fresh stores simulates a process
    // restart with an empty assignment cache.
    let id = Uuid::new_v4();
    let (engine_a, _store_a, _) = running_engine(fifty_fifty_experiment(id)).await;
    let (engine_b, _store_b, _) = running_engine(fifty_fifty_experiment(id)).await;

    for actor in ["alice", "bob", "carol", "dave"] {
        let a = engine_a.assign(id, actor).await.unwrap();
        let b = engine_b.assign(id, actor).await.unwrap();
        assert_eq!(a.variant_id, b.variant_id, "actor {} diverged", actor);
    }
}

#[tokio::test]
async fn test_first_assignment_records_impression() {
    let (engine, store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    engine.assign(id, "actor-1").await.unwrap();
    engine.assign(id, "actor-1").await.unwrap();
    engine.assign(id, "actor-2").await.unwrap();

    // One impression per distinct actor, not per call.
    assert_eq!(store.event_count(id), 2);
}

// ============================================================================
// Allocation Convergence
// ============================================================================

#[tokio::test]
async fn test_fifty_fifty_split_converges() {
    let (engine, _store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    let total = 100_000;
    let mut control = 0_u32;
    for i in 0..total {
        let result = engine.assign(id, &format!("actor-{}", i)).await.unwrap();
        if result.variant_id == "control" {
            control += 1;
        }
    }

    let share = control as f64 / total as f64;
    assert!(
        (share - 0.5).abs() < 0.01,
        "control share {} outside 50% +/- 1%",
        share
    );
}

// ============================================================================
// Lifecycle Gating
// ============================================================================

#[tokio::test]
async fn test_draft_experiment_rejects_assignment() {
    let store = Arc::new(InMemoryStore::new());
    let engine = AssignmentEngine::new(
        store,
        Arc::new(NullEventSink),
        ExperimentsConfig::default(),
    );
    let experiment = fifty_fifty_experiment(Uuid::new_v4());
    let id = experiment.id;
    engine.create_experiment(&experiment).await.unwrap();

    let err = engine.assign(id, "actor-1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExperimentNotActive);
}

#[tokio::test]
async fn test_paused_experiment_rejects_assignment() {
    let (engine, _store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;
    engine.pause(id).await.unwrap();

    let err = engine.assign(id, "actor-1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExperimentNotActive);
}

#[tokio::test]
async fn test_unknown_experiment_is_not_found() {
    let (engine, _store, _) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    let err = engine.assign(Uuid::new_v4(), "actor-1").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ExperimentNotFound);
}

#[tokio::test]
async fn test_activation_rejects_bad_allocations() {
    let store = Arc::new(InMemoryStore::new());
    let engine = AssignmentEngine::new(
        store,
        Arc::new(NullEventSink),
        ExperimentsConfig::default(),
    );

    let mut experiment = fifty_fifty_experiment(Uuid::new_v4());
    experiment
        .variants
        .get_mut("treatment")
        .unwrap()
        .allocation = 0.3;
    let id = experiment.id;
    engine.create_experiment(&experiment).await.unwrap();

    let err = engine.activate(id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidVariantConfiguration);
}

#[tokio::test]
async fn test_invalid_status_transition_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let engine = AssignmentEngine::new(
        store,
        Arc::new(NullEventSink),
        ExperimentsConfig::default(),
    );
    let experiment = fifty_fifty_experiment(Uuid::new_v4());
    let id = experiment.id;
    engine.create_experiment(&experiment).await.unwrap();

    // Draft cannot pause.
    let err = engine.pause(id).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidStatusTransition);
}

#[tokio::test]
async fn test_complete_records_winner() {
    let (engine, _store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    let completed = engine
        .complete(id, Some("treatment".to_string()))
        .await
        .unwrap();
    assert_eq!(completed.status, ExperimentStatus::Completed);
    assert_eq!(completed.winner_variant_id.as_deref(), Some("treatment"));
    assert!(completed.ended_at.is_some());
}

// ============================================================================
// Event Recording
// ============================================================================

#[tokio::test]
async fn test_record_for_unassigned_actor_is_noop() {
    let (engine, store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    engine
        .record(id, "ghost", EventType::Conversion, Some(10.0))
        .await
        .unwrap();

    assert_eq!(store.event_count(id), 0);
}

#[tokio::test]
async fn test_recorded_conversion_reaches_results() {
    let (engine, _store, id) = running_engine(fifty_fifty_experiment(Uuid::new_v4())).await;

    let assignment = engine.assign(id, "actor-1").await.unwrap();
    engine
        .record(id, "actor-1", EventType::Conversion, Some(25.0))
        .await
        .unwrap();

    let results = engine.results(id).await.unwrap();
    let variant = results
        .variants
        .iter()
        .find(|v| v.variant_id == assignment.variant_id)
        .unwrap();
    assert_eq!(variant.impressions, 1);
    assert_eq!(variant.conversions, 1);
    assert!((variant.revenue - 25.0).abs() < 1e-12);
}
