// src/api/handlers.rs

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::api::{types::*, ApiState};

/// GET /api/v1/status — Connection counts and live sessions.
pub async fn get_status(State(state): State<ApiState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds().max(0),
        analysis_available: state.pipeline.has_provider(),
        connections: state.router.counts(),
        sessions: state.sessions.list(),
    })
}

/// GET /api/v1/sessions/:id/stats — Cumulative stats for one live session.
pub async fn get_session_stats(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStatsResponse>, (StatusCode, Json<ErrorResponse>)> {
    let Some(slot) = state.sessions.get(&id) else {
        return Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session not found: {id}"),
            }),
        ));
    };

    Ok(Json(SessionStatsResponse {
        session: slot.snapshot(),
        stats: slot.stats(Utc::now()),
    }))
}

/// GET /api/v1/health — Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
