//! API request handlers with proper error propagation.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{ApiResponse, AppState};
use crate::attribution::{AttributionModel, Conversion};
use crate::error::{EngineError, Result};
use crate::experiments::model::{EventType, Experiment, ExperimentStatus, Variant};
use crate::store::{ExperimentStore, SpendLedger, TouchpointStore};

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check
// ═══════════════════════════════════════════════════════════════════════════════

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Experiment Lifecycle
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct CreateExperimentRequest {
    pub org_id: Uuid,
    pub name: String,
    pub primary_metric: String,
    pub confidence_level: Option<f64>,
    pub required_sample_size: Option<u64>,
    #[serde(default)]
    pub auto_winner_enabled: bool,
    pub variants: BTreeMap<String, VariantDto>,
}

#[derive(Deserialize)]
pub struct VariantDto {
    pub name: String,
    pub allocation: f64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

pub async fn create_experiment<S>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateExperimentRequest>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    if req.name.trim().is_empty() {
        return Err(EngineError::validation("Experiment name cannot be empty"));
    }
    if req.primary_metric.trim().is_empty() {
        return Err(EngineError::validation("Primary metric cannot be empty"));
    }

    let confidence_level = req.confidence_level.unwrap_or(0.95);
    if !(0.5..1.0).contains(&confidence_level) {
        return Err(EngineError::validation(
            "Confidence level must be in [0.5, 1.0)",
        ));
    }

    let experiment = Experiment {
        id: Uuid::new_v4(),
        org_id: req.org_id,
        name: req.name,
        primary_metric: req.primary_metric,
        confidence_level,
        required_sample_size: req.required_sample_size,
        auto_winner_enabled: req.auto_winner_enabled,
        status: ExperimentStatus::Draft,
        variants: req
            .variants
            .into_iter()
            .map(|(id, v)| {
                (
                    id,
                    Variant {
                        name: v.name,
                        allocation: v.allocation,
                        payload: v.payload,
                    },
                )
            })
            .collect(),
        winner_variant_id: None,
        started_at: None,
        ended_at: None,
        created_at: Utc::now(),
    };

    state.assignments.create_experiment(&experiment).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(experiment))))
}

pub async fn get_experiment<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let experiment = state.assignments.get_experiment(id).await?;
    Ok(Json(ApiResponse::success(experiment)))
}

pub async fn activate_experiment<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let experiment = state.assignments.activate(id).await?;
    Ok(Json(ApiResponse::success(experiment)))
}

pub async fn pause_experiment<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let experiment = state.assignments.pause(id).await?;
    Ok(Json(ApiResponse::success(experiment)))
}

#[derive(Deserialize, Default)]
pub struct CompleteExperimentRequest {
    pub winner_variant_id: Option<String>,
}

pub async fn complete_experiment<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    body: Option<Json<CompleteExperimentRequest>>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let winner = body.and_then(|Json(req)| req.winner_variant_id);
    let experiment = state.assignments.complete(id, winner).await?;
    Ok(Json(ApiResponse::success(experiment)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Assignment & Events
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct AssignRequest {
    pub actor_id: String,
}

pub async fn assign_actor<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(req): Json<AssignRequest>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    if req.actor_id.trim().is_empty() {
        return Err(EngineError::validation("Actor id cannot be empty"));
    }
    let assignment = state.assignments.assign(id, &req.actor_id).await?;
    Ok(Json(ApiResponse::success(assignment)))
}

#[derive(Deserialize)]
pub struct RecordEventRequest {
    pub actor_id: String,
    pub event_type: String,
    pub value: Option<f64>,
}

pub async fn record_event<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
    Json(req): Json<RecordEventRequest>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let event_type = EventType::parse(&req.event_type)?;
    state
        .assignments
        .record(id, &req.actor_id, event_type, req.value)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn experiment_results<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let results = state.assignments.results(id).await?;
    Ok(Json(ApiResponse::success(results)))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Attribution
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Deserialize)]
pub struct AttributeRequest {
    pub actor_id: String,
    pub value: f64,
    pub occurred_at: Option<DateTime<Utc>>,
    pub model: String,
}

pub async fn attribute_conversion<S>(
    State(state): State<AppState<S>>,
    Json(req): Json<AttributeRequest>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    let model = AttributionModel::from_name(&req.model, &state.config.attribution)?;
    let conversion = Conversion {
        actor_id: req.actor_id,
        value: req.value,
        occurred_at: req.occurred_at.unwrap_or_else(Utc::now),
    };
    let result = state.attribution.attribute(&conversion, model).await?;
    Ok(Json(ApiResponse::success(result)))
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub org_id: Uuid,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub model: String,
}

pub async fn attribution_report<S>(
    State(state): State<AppState<S>>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse>
where
    S: ExperimentStore + TouchpointStore + SpendLedger,
{
    if query.end <= query.start {
        return Err(EngineError::validation(
            "Report window end must be after start",
        ));
    }
    let model = AttributionModel::from_name(&query.model, &state.config.attribution)?;
    let report = state
        .attribution
        .attribution_report(query.org_id, query.start, query.end, model)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}
