// ABOUTME: Configuration management for the tokenwatch application
// ABOUTME: Handles loading configuration files and merging environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub data_source: DataSourceConfig,

    /// YAML fixture file used instead of the HTTP data source when set
    #[serde(default)]
    pub fixtures: Option<PathBuf>,

    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("tokens")
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            data_source: DataSourceConfig::default(),
            fixtures: None,
            store_dir: default_store_dir(),
        }
    }
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl DataSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file(),
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config {}", config_path.display()))?;
            serde_yaml::from_str(&contents)
                .with_context(|| format!("Invalid config {}", config_path.display()))?
        } else {
            Config::default()
        };

        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> PathBuf {
        let possible_paths = [
            PathBuf::from("tokenwatch.yaml"),
            PathBuf::from("tokenwatch.yml"),
            PathBuf::from(".tokenwatch.yaml"),
            PathBuf::from(".tokenwatch.yml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return path;
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".tokenwatch").join("config.yaml");
            if home_config.exists() {
                return home_config;
            }
        }

        // Default path (may not exist)
        PathBuf::from("tokenwatch.yaml")
    }

    fn merge_env(&mut self) -> Result<()> {
        self.merge_from(|key| std::env::var(key).ok())
    }

    /// Apply `TOKENWATCH_*` overrides read through `lookup`
    pub fn merge_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("TOKENWATCH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TOKENWATCH_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(base_url) = lookup("TOKENWATCH_DATA_URL") {
            self.data_source.base_url = Some(base_url);
        }
        if let Some(api_key) = lookup("TOKENWATCH_API_KEY") {
            self.data_source.api_key = Some(api_key);
        }
        if let Some(timeout) = lookup("TOKENWATCH_TIMEOUT_SECS") {
            self.data_source.timeout_secs = timeout
                .parse()
                .with_context(|| format!("Invalid TOKENWATCH_TIMEOUT_SECS '{}'", timeout))?;
        }
        if let Some(fixtures) = lookup("TOKENWATCH_FIXTURES") {
            self.fixtures = Some(PathBuf::from(fixtures));
        }
        if let Some(store_dir) = lookup("TOKENWATCH_STORE_DIR") {
            self.store_dir = PathBuf::from(store_dir);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_config_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("tokenwatch.yaml");

        let config_content = r#"
logging:
  level: debug
  format: json
data_source:
  base_url: https://data.example.com
store_dir: /var/lib/tokenwatch
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = Config::load(Some(config_path)).unwrap();
        assert_eq!(config.logging.format, "json");
        assert_eq!(
            config.data_source.base_url.as_deref(),
            Some("https://data.example.com")
        );
        assert_eq!(config.data_source.timeout_secs, 10);
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/tokenwatch"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "pretty");
        assert!(config.fixtures.is_none());
        assert_eq!(config.data_source.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("TOKENWATCH_LOG_LEVEL", "trace"),
            ("TOKENWATCH_DATA_URL", "http://localhost:8080"),
            ("TOKENWATCH_TIMEOUT_SECS", "3"),
            ("TOKENWATCH_STORE_DIR", "/tmp/tokens"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .merge_from(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.logging.level, "trace");
        assert_eq!(config.data_source.base_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.data_source.timeout_secs, 3);
        assert_eq!(config.store_dir, PathBuf::from("/tmp/tokens"));
    }

    #[test]
    fn test_invalid_timeout_override() {
        let mut config = Config::default();
        let result = config.merge_from(|key| {
            (key == "TOKENWATCH_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }
}
