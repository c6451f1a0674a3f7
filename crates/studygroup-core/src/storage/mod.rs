mod config;
pub mod database;
pub mod record_store;

pub use config::{Config, PollsConfig, TimerSettings, UserConfig};
pub use database::SqliteRecordStore;
pub use record_store::{MemoryRecordStore, RecordStore, UserRecord};

use std::path::PathBuf;

/// Returns the data directory, creating it if needed.
///
/// `STUDYGROUP_DATA_DIR` overrides the location outright. Otherwise this is
/// `~/.config/studygroup[-dev]/`, with `STUDYGROUP_ENV=dev` selecting the
/// development directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, std::io::Error> {
    let dir = match std::env::var_os("STUDYGROUP_DATA_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("STUDYGROUP_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("studygroup-dev")
            } else {
                base_dir.join("studygroup")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
