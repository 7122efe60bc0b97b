// src/infra/paths.rs — Config and data locations
//
// FIELDWATCH_HOME overrides everything. Otherwise config lives in
// ~/.fieldwatch/ and data in the platform data dir.

use directories::ProjectDirs;
use std::path::PathBuf;

/// Returns the FIELDWATCH_HOME override, if set.
fn fieldwatch_home() -> Option<PathBuf> {
    std::env::var_os("FIELDWATCH_HOME").map(PathBuf::from)
}

/// Configuration directory: $FIELDWATCH_HOME/ or ~/.fieldwatch/
pub fn config_dir() -> PathBuf {
    if let Some(home) = fieldwatch_home() {
        return home;
    }
    match directories::BaseDirs::new() {
        Some(base) => base.home_dir().join(".fieldwatch"),
        None => PathBuf::from(".fieldwatch"),
    }
}

/// Data directory: $FIELDWATCH_HOME/data/ or ~/.local/share/fieldwatch/
pub fn data_dir() -> PathBuf {
    if let Some(home) = fieldwatch_home() {
        return home.join("data");
    }
    match ProjectDirs::from("", "", "fieldwatch") {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => config_dir().join("data"),
    }
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("fieldwatch.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure the config and data directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
