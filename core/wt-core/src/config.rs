//! Paths and engine tuning.
//!
//! Persisted state lives under the per-user data directory:
//!
//! ```text
//! <data_dir>/womtrees/
//! ├── womtrees.db        # work items + sessions (SQLite, WAL)
//! └── logs/wt-hook.log   # hook diagnostics (append-only)
//! ```
//!
//! `WT_DATA_DIR` overrides the location. Engine timings can be tuned in
//! `<config_dir>/womtrees/engine.toml`; a missing file means defaults.

use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use crate::backoff::RetryPolicy;
use crate::error::ConfigError;
use crate::watch::WatchConfig;

pub const DATA_DIR_ENV: &str = "WT_DATA_DIR";
const APP_DIR: &str = "womtrees";
const DB_FILE: &str = "womtrees.db";
const LOG_DIR: &str = "logs";
const ENGINE_CONFIG_FILE: &str = "engine.toml";

/// Root directory for persisted state.
pub fn data_dir() -> Result<PathBuf, ConfigError> {
    if let Some(dir) = env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(ConfigError::NoDataDir)
}

pub fn db_path_in(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE)
}

pub fn db_path() -> Result<PathBuf, ConfigError> {
    data_dir().map(|dir| db_path_in(&dir))
}

pub fn log_dir() -> Result<PathBuf, ConfigError> {
    data_dir().map(|dir| dir.join(LOG_DIR))
}

pub fn engine_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(ENGINE_CONFIG_FILE))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryPolicy,
    pub watch: WatchConfig,
}

/// Loads engine tuning from `path` (or the default location).
pub fn load_engine_config(path: Option<PathBuf>) -> Result<EngineConfig, ConfigError> {
    let config_path = match path.or_else(engine_config_path) {
        Some(path) => path,
        None => return Ok(EngineConfig::default()),
    };

    let content = match fs_err::read_to_string(&config_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(EngineConfig::default())
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path,
                source,
            })
        }
    };

    toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path,
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn missing_file_yields_defaults() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let config = load_engine_config(Some(temp_dir.path().join("engine.toml")))
            .expect("load config");
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn parses_partial_overrides() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("engine.toml");
        fs_err::write(
            &path,
            r#"
[retry]
max_attempts = 8

[watch]
debounce_ms = 250
"#,
        )
        .expect("write config");

        let config = load_engine_config(Some(path)).expect("load config");
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.initial_delay_ms, RetryPolicy::default().initial_delay_ms);
        assert_eq!(config.watch.debounce(), Duration::from_millis(250));
        assert_eq!(config.watch.fallback(), WatchConfig::default().fallback());
    }

    #[test]
    fn rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("engine.toml");
        fs_err::write(&path, "[retry\nmax_attempts = ").expect("write config");

        let err = load_engine_config(Some(path)).expect_err("parse failure");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
