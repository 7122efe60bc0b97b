// src/cli/field.rs — `fieldwatch field`: stream image files as a field unit
//
// Frames go out on a fixed interval whether or not the previous one has been
// answered; the server drops frames that arrive mid-analysis. Losing the
// connection never stops the loop, frames are just skipped until the
// connection manager brings the channel back.

use chrono::Utc;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

use crate::client::{ClientEvent, ConnectionManager, ConnectionOptions, ConnectionStatus};
use crate::infra::config::Config;
use crate::provider::FrameImage;

const FRAME_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

pub async fn run_field(
    config: &Config,
    unit_id: &str,
    frames_dir: &Path,
    endpoint: Option<&str>,
    once: bool,
) -> anyhow::Result<()> {
    let frames = list_frames(frames_dir)?;
    if frames.is_empty() {
        anyhow::bail!("No frames found in {}", frames_dir.display());
    }
    tracing::info!(unit_id, frames = frames.len(), "Starting field unit");

    let endpoint = endpoint.unwrap_or(&config.client.endpoint);
    let manager = ConnectionManager::new(ConnectionOptions::from(&config.client));
    let mut events = manager.subscribe();

    manager.connect(endpoint).await?;
    register(&manager, unit_id).await;

    manager.on("command_received", |msg| {
        let command = msg.get("command").and_then(Value::as_str).unwrap_or("?");
        let issued_by = msg.get("issuedBy").and_then(Value::as_str).unwrap_or("control");
        tracing::warn!(issued_by, "COMMAND: {command}");
    });
    manager.on("analysis_result", log_analysis);

    let mut ticker = tokio::time::interval(config.client.frame_interval());
    let mut next = 0usize;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if *manager.status().borrow() == ConnectionStatus::Failed {
                    match manager.connect(endpoint).await {
                        Ok(()) => register(&manager, unit_id).await,
                        Err(e) => tracing::debug!("Still offline: {e}"),
                    }
                }
                if next >= frames.len() {
                    if once {
                        break;
                    }
                    next = 0;
                }
                let path = &frames[next];
                next += 1;
                match encode_frame(path).await {
                    Ok(frame) => {
                        let sent = manager.send(
                            "analyze_frame",
                            json!({ "frame": frame, "capturedAt": Utc::now() }),
                        );
                        if !sent {
                            tracing::debug!(frame = %path.display(), "Offline, frame skipped");
                        }
                    }
                    Err(e) => tracing::warn!(frame = %path.display(), "Failed to read frame: {e}"),
                }
            }
            event = events.recv() => match event {
                Ok(ClientEvent::Reconnected) => register(&manager, unit_id).await,
                Ok(ClientEvent::Failed) => {
                    tracing::warn!("Reconnect attempts exhausted, retrying on the next frame");
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping field unit");
                break;
            }
        }
    }

    manager.send("end_session", Value::Null);
    manager.disconnect().await;
    Ok(())
}

/// Registration failure is not fatal: the unit keeps streaming unregistered.
async fn register(manager: &ConnectionManager, unit_id: &str) {
    match manager.register_unit(unit_id).await {
        Ok(ack) => {
            let session = ack.get("sessionId").and_then(Value::as_str).unwrap_or("-");
            tracing::info!(unit_id, session_id = session, "Registered");
        }
        Err(e) => tracing::warn!(unit_id, "Registration failed, continuing unregistered: {e}"),
    }
}

fn log_analysis(msg: &Value) {
    let result = &msg["result"];
    let mode = result["mode"].as_str().unwrap_or("?");
    let detections = result["detections"].as_array().map_or(0, Vec::len);
    let frame = result["frameNumber"].as_u64().unwrap_or(0);
    tracing::info!(frame, mode, detections, "Analysis");

    if let Some(alert) = msg["escalation"]["voiceAlert"].as_str() {
        tracing::warn!("URGENT: {alert}");
    }
}

fn list_frames(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_frame(p))
        .collect();
    frames.sort();
    Ok(frames)
}

fn is_frame(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

async fn encode_frame(path: &Path) -> anyhow::Result<String> {
    let bytes = tokio::fs::read(path).await?;
    let image = FrameImage {
        media_type: FrameImage::media_type_for(path).to_string(),
        bytes,
    };
    Ok(format!("data:{};base64,{}", image.media_type, image.to_base64()))
}
