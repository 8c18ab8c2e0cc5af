use std::{path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// What a student without an assessed learning style gets to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedStylePolicy {
    /// Every style variant of every section is surfaced.
    ShowAllVariants,
    /// Styled content stays hidden until the assessment assigns a style.
    #[default]
    BlockUntilAssessed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub log_dir: Option<PathBuf>,
    pub unassigned_style_policy: UnassignedStylePolicy,
    pub submission_timeout_secs: u64,
    pub content_cache_capacity: u64,
    /// Seconds before cached section content is read again from the store.
    pub content_cache_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://database/learnpath.db".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8080,
            log_dir: None,
            unassigned_style_policy: UnassignedStylePolicy::default(),
            submission_timeout_secs: 10,
            content_cache_capacity: 1024,
            content_cache_ttl_secs: 60,
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file does not exist.
    /// `LEARNPATH_DATABASE_URL` (from the environment or `.env`) wins over the file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        let _ = dotenvy::dotenv();
        if let Ok(url) = dotenvy::var("LEARNPATH_DATABASE_URL") {
            config.database_url = url;
        }
        Ok(config)
    }

    pub fn submission_timeout(&self) -> Duration {
        Duration::from_secs(self.submission_timeout_secs)
    }

    pub fn content_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.content_cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_partial_config() {
        let config: Config = toml::from_str(
            r#"
            port = 9000
            unassigned_style_policy = "show_all_variants"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(
            config.unassigned_style_policy,
            UnassignedStylePolicy::ShowAllVariants
        );
        assert_eq!(config.submission_timeout(), Duration::from_secs(10));
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.content_cache_ttl(), Duration::from_secs(60));
    }
}
