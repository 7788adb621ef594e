//! HTTP route wiring (teacher's `router::build_router` idiom).

use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::handlers::{health, settlements, workflow};

pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().expect("static origin"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics))
        .route("/api/settlements", post(settlements::ingest_settlement).get(settlements::search_settlements))
        .route("/api/settlements/{id}", get(settlements::get_settlement))
        .route("/api/settlements/groups", get(settlements::distinct_groups))
        .route("/api/recalculate", post(settlements::recalculate))
        .route("/api/workflow/request-release", post(workflow::request_release))
        .route("/api/workflow/authorize", post(workflow::authorize))
        .route("/api/workflow/reject", post(workflow::reject))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(30)))
                .layer(cors),
        )
        .with_state(app_state)
}

/// `GET /metrics` Prometheus exposition (SPEC_FULL.md ambient observability).
async fn metrics(State(state): State<AppState>) -> String {
    state.metrics_handle.render()
}
