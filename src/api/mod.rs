// src/api/mod.rs — Distribution server: WebSocket channel plus a small REST surface

pub mod frames;
pub mod handlers;
pub mod types;
pub mod ws;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::analysis::AnalysisPipeline;
use crate::db::DataSink;
use crate::distribution::DistributionRouter;
use crate::escalation::EscalationEngine;
use crate::infra::config::{Config, ServerConfig};
use crate::infra::errors::FieldwatchError;
use crate::provider::VisionProvider;
use crate::session::memory::MemoryLimits;
use crate::session::SessionRegistry;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub router: Arc<DistributionRouter>,
    pub sessions: Arc<SessionRegistry>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub escalation: Arc<EscalationEngine>,
    pub started_at: DateTime<Utc>,
}

impl ApiState {
    pub fn new(
        config: &Config,
        provider: Option<Arc<dyn VisionProvider>>,
        sink: Arc<dyn DataSink>,
    ) -> Result<Self, FieldwatchError> {
        let sessions = Arc::new(SessionRegistry::new(MemoryLimits::from(&config.memory)));
        let pipeline = AnalysisPipeline::new(provider, sessions.clone(), config.analysis.clone())?;
        Ok(Self {
            router: Arc::new(DistributionRouter::new(sink)),
            escalation: Arc::new(EscalationEngine::new(sessions.clone())),
            pipeline: Arc::new(pipeline),
            sessions,
            started_at: Utc::now(),
        })
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let allow_origin = if config.allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin: {o}");
                    None
                }
            })
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

/// Build the axum router with the WebSocket endpoint and REST routes.
pub fn build_router(config: &ServerConfig, state: ApiState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/v1/status", get(handlers::get_status))
        .route("/api/v1/sessions/{id}/stats", get(handlers::get_session_stats))
        .route("/api/v1/health", get(handlers::health))
        .layer(cors_layer(config))
        .with_state(state)
}

/// Start the server on the configured address (blocking until ctrl-c).
pub async fn start_server(config: &ServerConfig, state: ApiState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let router = build_router(config, state);

    tracing::info!("Distribution server listening on ws://{addr}/ws");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
