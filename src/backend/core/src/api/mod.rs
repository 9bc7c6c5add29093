//! HTTP API for the engine, served with Axum.
//!
//! Routes are versioned under `/api/v1`. Handlers return
//! `Result<impl IntoResponse, EngineError>` so failures map to HTTP
//! status codes through the `IntoResponse` impl on `EngineError`.

mod handlers;

use axum::routing::{get, post, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::attribution::AttributionEngine;
use crate::config::Config;
use crate::experiments::AssignmentEngine;
use crate::store::{ExperimentStore, SpendLedger, TouchpointStore};

/// Application state shared across handlers.
pub struct AppState<S> {
    pub assignments: Arc<AssignmentEngine<S>>,
    pub attribution: Arc<AttributionEngine<S>>,
    pub config: Arc<Config>,
}

// Manual impl: `S` itself need not be Clone behind the Arcs.
impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            assignments: Arc::clone(&self.assignments),
            attribution: Arc::clone(&self.attribution),
            config: Arc::clone(&self.config),
        }
    }
}

/// Build the full application router.
pub fn build_router<S>(state: AppState<S>) -> Router
where
    S: ExperimentStore + TouchpointStore + SpendLedger + 'static,
{
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/experiments", post(handlers::create_experiment::<S>))
        .route(
            "/api/v1/experiments/:id",
            get(handlers::get_experiment::<S>),
        )
        .route(
            "/api/v1/experiments/:id/activate",
            post(handlers::activate_experiment::<S>),
        )
        .route(
            "/api/v1/experiments/:id/pause",
            post(handlers::pause_experiment::<S>),
        )
        .route(
            "/api/v1/experiments/:id/complete",
            post(handlers::complete_experiment::<S>),
        )
        .route(
            "/api/v1/experiments/:id/assignments",
            post(handlers::assign_actor::<S>),
        )
        .route(
            "/api/v1/experiments/:id/events",
            post(handlers::record_event::<S>),
        )
        .route(
            "/api/v1/experiments/:id/results",
            get(handlers::experiment_results::<S>),
        )
        .route("/api/v1/attributions", post(handlers::attribute_conversion::<S>))
        .route(
            "/api/v1/reports/attribution",
            get(handlers::attribution_report::<S>),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// API response wrapper.
#[derive(serde::Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;
    use crate::store::InMemoryStore;

    fn state_over_memory_store() -> AppState<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(NullEventSink);
        let config = Arc::new(Config {
            server: Default::default(),
            database: crate::config::DatabaseConfig {
                url: "postgres://localhost/unused".to_string(),
                max_connections: 1,
                min_connections: 1,
            },
            experiments: Default::default(),
            attribution: Default::default(),
            logging: Default::default(),
        });
        AppState {
            assignments: Arc::new(AssignmentEngine::new(
                store.clone(),
                events.clone(),
                config.experiments.clone(),
            )),
            attribution: Arc::new(AttributionEngine::new(
                store,
                events,
                config.attribution.clone(),
            )),
            config,
        }
    }

    #[test]
    fn test_state_clones_and_builds_router() {
        let state = state_over_memory_store();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.config, &cloned.config));
        let _router = build_router(state);
    }

    #[test]
    fn test_api_response_success_shape() {
        let response = ApiResponse::success(42);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json.get("error").is_none());
    }
}
