use std::env;
use std::path::PathBuf;

use crate::AppResult;

pub const ENV_DB: &str = "NESTBUDGET_DB";
pub const ENV_LOG: &str = "NESTBUDGET_LOG";
pub const ENV_LOG_JSON: &str = "NESTBUDGET_LOG_JSON";
pub const ENV_LOG_DIR: &str = "NESTBUDGET_LOG_DIR";

pub const DEFAULT_LOG_FILTER: &str = "nestbudget=info,sqlx=warn";
const APP_DIR: &str = "nestbudget";
const DB_FILE: &str = "nestbudget.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_path: PathBuf,
    pub log_filter: String,
    /// JSON lines instead of human readable output.
    pub log_json: bool,
    /// Daily rolling log files are written here when set.
    pub log_dir: Option<PathBuf>,
}

pub fn app_data_dir() -> AppResult<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => env::current_dir()?,
    };
    Ok(base.join(APP_DIR))
}

pub fn default_db_path() -> AppResult<PathBuf> {
    Ok(app_data_dir()?.join(DB_FILE))
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let db_path = match non_empty(ENV_DB) {
            Some(path) => PathBuf::from(path),
            None => default_db_path()?,
        };
        Ok(Config {
            db_path,
            log_filter: non_empty(ENV_LOG).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            log_json: non_empty(ENV_LOG_JSON)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            log_dir: non_empty(ENV_LOG_DIR).map(PathBuf::from),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert!(!config.log_json);
        assert!(config.log_dir.is_none());
        assert!(config.db_path.ends_with("nestbudget/nestbudget.sqlite3"));
    }

    #[test]
    fn env_overrides() {
        let config = Config::from_lookup(lookup(&[
            (ENV_DB, "/tmp/budget.db"),
            (ENV_LOG, "nestbudget=debug"),
            (ENV_LOG_JSON, "TRUE"),
            (ENV_LOG_DIR, "/tmp/logs"),
        ]))
        .expect("config");
        assert_eq!(config.db_path, PathBuf::from("/tmp/budget.db"));
        assert_eq!(config.log_filter, "nestbudget=debug");
        assert!(config.log_json);
        assert_eq!(config.log_dir, Some(PathBuf::from("/tmp/logs")));
    }

    #[test]
    fn blank_values_fall_back() {
        let config = Config::from_lookup(lookup(&[(ENV_LOG, "  "), (ENV_LOG_JSON, "0")]))
            .expect("config");
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
        assert!(!config.log_json);
    }
}
