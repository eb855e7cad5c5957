//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/wit/config.toml)
//! 3. Environment variables (WIT_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Environment variable prefix
const ENV_PREFIX: &str = "WIT";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the SQLite database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name, relative to `data_dir` unless absolute
    #[serde(default = "default_database_file")]
    pub database_file: PathBuf,

    /// Log level used for the wit crates
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// State values counted as closed in iteration rollups
    #[serde(default = "default_closed_states")]
    pub closed_states: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: default_database_file(),
            log_level: default_log_level(),
            closed_states: default_closed_states(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (WIT_DATA_DIR, WIT_DATABASE, WIT_LOG_LEVEL)
    /// 2. Config file (~/.config/wit/config.toml or WIT_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                Error::Internal(format!("failed to read config file {:?}: {}", path, e))
            })?;
            parse_toml(&content)?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config = parse_toml(toml_content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DATA_DIR", ENV_PREFIX)) {
            self.data_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var(format!("{}_DATABASE", ENV_PREFIX)) {
            if !val.is_empty() {
                self.database_file = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LOG_LEVEL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.log_level = val;
            }
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir).map_err(|e| {
                Error::Internal(format!(
                    "failed to create data directory {:?}: {}",
                    self.data_dir, e
                ))
            })?;
        }
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with WIT_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wit")
            .join("config.toml")
    }

    /// Get the path to the SQLite database
    pub fn database_path(&self) -> PathBuf {
        if self.database_file.is_absolute() {
            self.database_file.clone()
        } else {
            self.data_dir.join(&self.database_file)
        }
    }
}

fn parse_toml(content: &str) -> Result<Config> {
    toml::from_str(content)
        .map_err(|e| Error::bad_parameter("config", format!("invalid TOML: {}", e)))
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wit")
}

fn default_database_file() -> PathBuf {
    PathBuf::from("wit.db")
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_closed_states() -> Vec<String> {
    vec!["closed".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &["WIT_DATA_DIR", "WIT_DATABASE", "WIT_LOG_LEVEL"];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.data_dir.ends_with("wit"));
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.closed_states, vec!["closed"]);
    }

    #[test]
    fn test_database_path() {
        let mut config = Config {
            data_dir: PathBuf::from("/data/wit"),
            ..Config::default()
        };
        assert_eq!(config.database_path(), PathBuf::from("/data/wit/wit.db"));

        config.database_file = PathBuf::from("/elsewhere/items.db");
        assert_eq!(config.database_path(), PathBuf::from("/elsewhere/items.db"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("WIT_DATA_DIR", "/tmp/wit-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/wit-test"));
    }

    #[test]
    fn test_env_override_log_level_ignores_empty() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("WIT_LOG_LEVEL", "debug");
        config.apply_env_overrides();
        assert_eq!(config.log_level, "debug");

        env::set_var("WIT_LOG_LEVEL", "");
        config.apply_env_overrides();
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            database_file = "tracker.db"
            closed_states = ["closed", "Done"]
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.database_path(), PathBuf::from("/custom/data/tracker.db"));
        assert_eq!(config.closed_states, vec!["closed", "Done"]);
    }

    #[test]
    fn test_load_from_str_rejects_bad_toml() {
        let _guard = EnvGuard::new(ENV_VARS);

        let err = Config::load_from_str("data_dir = [").unwrap_err();
        assert!(matches!(err, Error::BadParameter { .. }));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("WIT_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.log_level, "warn");
        assert!(config.data_dir.exists());
    }
}
