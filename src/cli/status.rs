// src/cli/status.rs — System status display

use crate::db;
use crate::infra::config::Config;
use crate::infra::paths;
use crate::provider::resolver;

const RECENT_EVENTS: u32 = 5;

/// Display resolved config, provider availability and a store summary.
pub async fn show_status(config: &Config, config_path: Option<&str>) -> anyhow::Result<()> {
    println!("fieldwatch v{}", env!("CARGO_PKG_VERSION"));
    println!();

    match config_path {
        Some(path) => println!("  Config:     {path} (loaded)"),
        None if paths::config_file_path().exists() => {
            println!("  Config:     {} (loaded)", paths::config_file_path().display())
        }
        None => println!("  Config:     (using defaults)"),
    }
    println!(
        "  Server:     ws://{}:{}/ws",
        config.server.bind, config.server.port
    );
    println!("  Endpoint:   {}", config.client.endpoint);

    match resolver::resolve_provider(&config.analysis) {
        Some(p) => println!(
            "  Analysis:   {} ({})",
            p.id(),
            config.analysis.model.as_deref().unwrap_or(p.default_model())
        ),
        None => println!("  Analysis:   unavailable (results will be degraded)"),
    }

    let db_path = config.database.resolved_path();
    if db_path.exists() {
        let size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
        println!("  Database:   {} ({})", db_path.display(), format_bytes(size));
        match summarize_store(&db_path) {
            Ok(lines) => lines.iter().for_each(|l| println!("{l}")),
            Err(e) => println!("    (unreadable: {e})"),
        }
    } else {
        println!("  Database:   (not initialized)");
    }

    println!();
    println!("  Resolved configuration:");
    for line in toml::to_string_pretty(config)?.lines() {
        println!("    {line}");
    }
    Ok(())
}

fn summarize_store(path: &std::path::Path) -> anyhow::Result<Vec<String>> {
    let store = db::open(path)?;
    let mut lines = vec![format!("    Detections: {}", store.count_detections(None)?)];
    let events = store.recent_events(RECENT_EVENTS)?;
    if !events.is_empty() {
        lines.push("    Recent events:".into());
        for e in events {
            lines.push(format!(
                "      {} [{}] {} {}",
                e.created_at,
                e.event_type,
                e.unit_id.as_deref().unwrap_or("-"),
                crate::util::clip(&e.message, 60)
            ));
        }
    }
    Ok(lines)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::store::EventRow;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_summarize_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fw.db");
        let store = db::open(&path).unwrap();
        store
            .insert_event(&EventRow::new(Some("engine-1"), "urgent_alert", "Explosion risk"))
            .unwrap();
        drop(store);

        let lines = summarize_store(&path).unwrap();
        assert_eq!(lines[0], "    Detections: 0");
        assert!(lines.iter().any(|l| l.contains("urgent_alert") && l.contains("engine-1")));
    }
}
