// src/cli/serve.rs — `fieldwatch serve`

use std::sync::Arc;
use std::time::Duration;

use crate::api::{self, ApiState};
use crate::db::{self, store_server, DataSink, NullSink};
use crate::infra::config::Config;
use crate::provider::resolver;

const STORE_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn run_serve(config: &Config, port: Option<u16>, no_db: bool) -> anyhow::Result<()> {
    let mut server_config = config.server.clone();
    if let Some(port) = port {
        server_config.port = port;
    }

    let (sink, store_task): (Arc<dyn DataSink>, _) = if no_db {
        tracing::warn!("Durable store disabled; events will not be recorded");
        (Arc::new(NullSink), None)
    } else {
        let db_path = config.database.resolved_path();
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let store = db::open(&db_path)?;
        tracing::info!("Store: {}", db_path.display());
        let (handle, join) = store_server::spawn_store_server(store);
        (Arc::new(handle), Some(join))
    };

    let provider = resolver::resolve_provider(&config.analysis);
    match &provider {
        Some(p) => tracing::info!(provider = p.id(), "Classification provider ready"),
        None => tracing::warn!("No classification provider; every analysis will be degraded"),
    }

    let state = ApiState::new(config, provider, sink)?;
    let result = api::start_server(&server_config, state).await;

    // The actor exits once every handle is dropped. Upgraded sockets may
    // still hold one, so bound the wait.
    if let Some(join) = store_task {
        if tokio::time::timeout(STORE_DRAIN_TIMEOUT, join).await.is_err() {
            tracing::warn!("Store did not drain before shutdown");
        }
    }
    result
}
