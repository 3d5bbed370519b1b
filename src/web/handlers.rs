//! HTTP request handlers.

use super::AppState;
use crate::policy::Verdict;
use crate::scheduler::CheckSnapshot;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};

const DEFAULT_EVENT_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub checks: usize,
    pub critical: usize,
}

/// Liveness of the engine itself; CRITICAL checks are counted, not failed.
pub async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.scheduler.snapshot();
    let critical = snapshot
        .iter()
        .filter(|c| c.last_verdict == Some(Verdict::Critical))
        .count();

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            checks: snapshot.len(),
            critical,
        }),
    )
}

pub async fn handle_get_checks(State(state): State<AppState>) -> Json<Vec<CheckSnapshot>> {
    Json(state.scheduler.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// Most recent events, newest first.
pub async fn handle_get_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    Json(state.events.recent(limit))
}
