// src/db/store_server.rs — Async message passing for Store

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::store::{DetectionRow, EventRow, Store, UnitLocation, UnitRow};
use super::DataSink;

#[derive(Debug)]
pub enum StoreCommand {
    UpsertUnitStatus {
        unit_id: String,
        status: String,
        resp: oneshot::Sender<anyhow::Result<()>>,
    },
    UpdateUnitLocation {
        location: UnitLocation,
        resp: oneshot::Sender<anyhow::Result<()>>,
    },
    MarkUnitInactive {
        unit_id: String,
        resp: oneshot::Sender<anyhow::Result<bool>>,
    },
    GetUnit {
        unit_id: String,
        resp: oneshot::Sender<anyhow::Result<Option<UnitRow>>>,
    },
    InsertDetection {
        row: DetectionRow,
        resp: oneshot::Sender<anyhow::Result<()>>,
    },
    CountDetections {
        unit_id: Option<String>,
        resp: oneshot::Sender<anyhow::Result<i64>>,
    },
    InsertEvent {
        row: EventRow,
        resp: oneshot::Sender<anyhow::Result<()>>,
    },
    RecentEvents {
        limit: u32,
        resp: oneshot::Sender<anyhow::Result<Vec<EventRow>>>,
    },
}

/// A handle to the Store that uses message passing.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
}

impl StoreHandle {
    pub fn new(tx: mpsc::Sender<StoreCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<anyhow::Result<T>>) -> StoreCommand,
    ) -> anyhow::Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(build(resp_tx)).await?;
        resp_rx.await?
    }

    pub async fn get_unit(&self, unit_id: &str) -> anyhow::Result<Option<UnitRow>> {
        let unit_id = unit_id.to_string();
        self.request(|resp| StoreCommand::GetUnit { unit_id, resp })
            .await
    }

    pub async fn count_detections(&self, unit_id: Option<&str>) -> anyhow::Result<i64> {
        let unit_id = unit_id.map(str::to_string);
        self.request(|resp| StoreCommand::CountDetections { unit_id, resp })
            .await
    }

    pub async fn recent_events(&self, limit: u32) -> anyhow::Result<Vec<EventRow>> {
        self.request(|resp| StoreCommand::RecentEvents { limit, resp })
            .await
    }
}

#[async_trait]
impl DataSink for StoreHandle {
    async fn upsert_unit_status(&self, unit_id: String, status: String) -> anyhow::Result<()> {
        self.request(|resp| StoreCommand::UpsertUnitStatus {
            unit_id,
            status,
            resp,
        })
        .await
    }

    async fn update_unit_location(&self, location: UnitLocation) -> anyhow::Result<()> {
        self.request(|resp| StoreCommand::UpdateUnitLocation { location, resp })
            .await
    }

    async fn mark_unit_inactive(&self, unit_id: String) -> anyhow::Result<()> {
        let found = self
            .request(|resp| StoreCommand::MarkUnitInactive {
                unit_id: unit_id.clone(),
                resp,
            })
            .await?;
        if !found {
            tracing::debug!(unit_id = %unit_id, "Inactive mark for unrecorded unit");
        }
        Ok(())
    }

    async fn insert_detection(&self, row: DetectionRow) -> anyhow::Result<()> {
        self.request(|resp| StoreCommand::InsertDetection { row, resp })
            .await
    }

    async fn insert_event(&self, row: EventRow) -> anyhow::Result<()> {
        self.request(|resp| StoreCommand::InsertEvent { row, resp })
            .await
    }
}

/// Helper to spawn the store server and return a handle.
pub fn spawn_store_server(store: Store) -> (StoreHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(100);
    let handle = StoreHandle::new(tx);
    let join_handle = tokio::spawn(run_store_server(store, rx));
    (handle, join_handle)
}

/// The background task that owns the Store.
pub async fn run_store_server(store: Store, mut rx: mpsc::Receiver<StoreCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCommand::UpsertUnitStatus {
                unit_id,
                status,
                resp,
            } => {
                let res = store.upsert_unit_status(&unit_id, &status);
                let _ = resp.send(res);
            }
            StoreCommand::UpdateUnitLocation { location, resp } => {
                let res = store.update_unit_location(&location);
                let _ = resp.send(res);
            }
            StoreCommand::MarkUnitInactive { unit_id, resp } => {
                let res = store.mark_unit_inactive(&unit_id);
                let _ = resp.send(res);
            }
            StoreCommand::GetUnit { unit_id, resp } => {
                let res = store.get_unit(&unit_id);
                let _ = resp.send(res);
            }
            StoreCommand::InsertDetection { row, resp } => {
                let res = store.insert_detection(&row);
                let _ = resp.send(res);
            }
            StoreCommand::CountDetections { unit_id, resp } => {
                let res = store.count_detections(unit_id.as_deref());
                let _ = resp.send(res);
            }
            StoreCommand::InsertEvent { row, resp } => {
                let res = store.insert_event(&row);
                let _ = resp.send(res);
            }
            StoreCommand::RecentEvents { limit, resp } => {
                let res = store.recent_events(limit);
                let _ = resp.send(res);
            }
        }
    }
    tracing::debug!("Store server stopped");
}
