// src/api/types.rs

use serde::Serialize;

use crate::distribution::AudienceCounts;
use crate::session::memory::SessionStats;
use crate::session::Session;

/// System status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub version: String,
    pub uptime_secs: i64,
    pub analysis_available: bool,
    pub connections: AudienceCounts,
    pub sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsResponse {
    pub session: Session,
    pub stats: SessionStats,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
