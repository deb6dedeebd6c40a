use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// How many articles to extract from each target per crawl.
    #[serde(default = "default_articles_per_target")]
    pub articles_per_target: usize,

    /// Articles older than this are swept, along with their pairs.
    #[serde(default = "default_article_max_age_days")]
    pub article_max_age_days: u32,

    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,

    #[serde(default = "default_threshold")]
    pub contradiction_threshold: f64,

    /// Lifetime of a pairing lock before another job may take it over.
    #[serde(default = "default_lock_lease_secs")]
    pub lock_lease_secs: u64,

    /// How long a job waits for a busy pairing lock before giving up.
    #[serde(default = "default_lock_wait_secs")]
    pub lock_wait_secs: u64,

    #[serde(default = "default_lock_retry_millis")]
    pub lock_retry_millis: u64,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_minutes: u32,

    #[serde(default = "default_concurrent_crawls")]
    pub concurrent_crawls: usize,

    /// Query parameters kept when canonicalizing article links.
    #[serde(default = "default_allowed_query_params")]
    pub allowed_query_params: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("counterpoint");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("articles.db").to_string_lossy().to_string()
}

fn default_articles_per_target() -> usize {
    10
}

fn default_article_max_age_days() -> u32 {
    2
}

fn default_threshold() -> f64 {
    0.5
}

fn default_lock_lease_secs() -> u64 {
    30
}

fn default_lock_wait_secs() -> u64 {
    10
}

fn default_lock_retry_millis() -> u64 {
    200
}

fn default_refresh_interval() -> u32 {
    30
}

fn default_concurrent_crawls() -> usize {
    5
}

fn default_allowed_query_params() -> Vec<String> {
    vec!["id".to_string()]
}

fn default_user_agent() -> String {
    "counterpoint/0.1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            articles_per_target: default_articles_per_target(),
            article_max_age_days: default_article_max_age_days(),
            similarity_threshold: default_threshold(),
            contradiction_threshold: default_threshold(),
            lock_lease_secs: default_lock_lease_secs(),
            lock_wait_secs: default_lock_wait_secs(),
            lock_retry_millis: default_lock_retry_millis(),
            refresh_interval_minutes: default_refresh_interval(),
            concurrent_crawls: default_concurrent_crawls(),
            allowed_query_params: default_allowed_query_params(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from the default location. A missing
    /// default file is created with default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else if path.is_some() {
            Err(AppError::Config(format!(
                "config file {} does not exist",
                config_path.display()
            )))
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("counterpoint")
            .join("config.toml")
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("similarity_threshold", self.similarity_threshold),
            ("contradiction_threshold", self.contradiction_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(AppError::Config(format!("{} must be within [0, 1]", name)));
            }
        }
        if self.lock_lease_secs == 0 {
            return Err(AppError::Config("lock_lease_secs must be positive".into()));
        }
        if self.concurrent_crawls == 0 {
            return Err(AppError::Config("concurrent_crawls must be positive".into()));
        }
        Ok(())
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_secs(self.lock_wait_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_millis)
    }

    pub fn article_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.article_max_age_days))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/x.db"
            articles_per_target = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.db_path, "/tmp/x.db");
        assert_eq!(config.articles_per_target, 3);
        assert_eq!(config.article_max_age_days, 2);
        assert_eq!(config.similarity_threshold, 0.5);
        assert_eq!(config.allowed_query_params, vec!["id".to_string()]);
    }

    #[test]
    fn test_load_rejects_bad_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "similarity_threshold = 1.5\n").unwrap();
        assert!(matches!(Config::load(Some(&path)), Err(AppError::Config(_))));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.lock_lease_secs = 45;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.lock_lease(), Duration::from_secs(45));
    }
}
