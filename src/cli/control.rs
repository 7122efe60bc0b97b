// src/cli/control.rs — `fieldwatch control`: operator console
//
// Incoming alerts pass through the AlertQueue and are announced one at a
// time, highest priority first. Location and status updates are only logged.
// Once the connection manager gives up, the console keeps retrying on its
// own interval instead of going quiet.

use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use crate::client::{
    Alert, AlertQueue, ClientEvent, ConnectionManager, ConnectionOptions, ConnectionStatus,
    LogAnnouncer, PushOutcome,
};
use crate::infra::config::Config;

pub async fn run_control(
    config: &Config,
    operator_id: &str,
    endpoint: Option<&str>,
) -> anyhow::Result<()> {
    let endpoint = endpoint.unwrap_or(&config.client.endpoint);
    let manager = ConnectionManager::new(ConnectionOptions::from(&config.client));
    let mut events = manager.subscribe();
    let mut status = manager.status();

    if !recover(&manager, endpoint, operator_id).await {
        tracing::warn!(endpoint, "Server unreachable, will keep retrying");
    }

    let mut queue = AlertQueue::new(&config.alerts);
    let announcer = LogAnnouncer;
    let mut retry = tokio::time::interval(Duration::from_millis(config.client.max_delay_ms.max(1)));
    retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = retry.tick() => {
                recover(&manager, endpoint, operator_id).await;
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Message { msg_type, payload }) => {
                    if ingest(&mut queue, &msg_type, &payload) {
                        queue.drain(&announcer).await;
                    }
                }
                Ok(ClientEvent::Reconnected) => register(&manager, operator_id).await,
                Ok(_) => {}
                Err(RecvError::Lagged(n)) => tracing::warn!("Console fell behind, {n} events lost"),
                Err(RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                tracing::info!(status = ?current, "Connection");
                if current == ConnectionStatus::Failed {
                    tracing::warn!("Reconnect attempts exhausted, retrying every {:?}", retry.period());
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    let history = queue.replay();
    if !history.is_empty() {
        tracing::info!("Delivered this session: {}", history.len());
    }
    manager.disconnect().await;
    Ok(())
}

/// Reconnect and re-register when the channel is down and nothing else is
/// bringing it back. True when this call re-established the connection.
async fn recover(manager: &ConnectionManager, endpoint: &str, operator_id: &str) -> bool {
    let idle = matches!(
        *manager.status().borrow(),
        ConnectionStatus::Disconnected | ConnectionStatus::Failed
    );
    if !idle {
        return false;
    }
    match manager.connect(endpoint).await {
        Ok(()) => {
            register(manager, operator_id).await;
            true
        }
        Err(e) => {
            tracing::debug!("Still offline: {e}");
            false
        }
    }
}

async fn register(manager: &ConnectionManager, operator_id: &str) {
    if let Err(e) = manager.register_control_center(operator_id).await {
        tracing::warn!(operator_id, "Registration failed, continuing unregistered: {e}");
    }
}

/// Route one wire message. Returns true when something was queued for speech.
fn ingest(queue: &mut AlertQueue, msg_type: &str, payload: &Value) -> bool {
    match msg_type {
        "location_update" => {
            tracing::debug!(
                unit_id = payload["unitId"].as_str().unwrap_or("?"),
                lat = payload["latitude"].as_f64().unwrap_or_default(),
                lon = payload["longitude"].as_f64().unwrap_or_default(),
                "Location"
            );
            false
        }
        "unit_status_changed" => {
            tracing::info!(
                unit_id = payload["unitId"].as_str().unwrap_or("?"),
                status = payload["status"].as_str().unwrap_or("?"),
                "Unit status"
            );
            false
        }
        _ => match Alert::from_message(msg_type, payload) {
            Some(alert) => {
                let outcome = queue.push(alert);
                if outcome == PushOutcome::Displayed {
                    if let Some(latest) = queue.live().last() {
                        tracing::info!(priority = ?latest.priority, "{}", latest.text);
                    }
                }
                outcome == PushOutcome::Queued
            }
            None => false,
        },
    }
}
