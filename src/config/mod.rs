use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::review::extractor::LabelSet;
use crate::review::session::ReviewConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub review: ReviewSettings,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub chat_model: String,
    pub vision_model: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewSettings {
    /// Label vocabulary name: `zh` or `en`
    pub labels: String,
    pub history_window: usize,
    pub hold_move_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub image_dir: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load .env file - this sets env vars that aren't already set
        dotenv::dotenv().ok();

        // Database configuration - DATABASE_URL is required
        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL environment variable is required but not set")?;

        let defaults = Config::default();

        let labels = env::var("REVIEW_LABELS").unwrap_or(defaults.review.labels);
        if LabelSet::by_name(&labels).is_none() {
            anyhow::bail!("Invalid REVIEW_LABELS value '{}' (use zh or en)", labels);
        }

        let config = Config {
            database: DatabaseConfig {
                url: database_url,
                max_connections: env::var("DB_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .context("Invalid DB_MAX_CONNECTIONS value")?,
                min_connections: env::var("DB_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .context("Invalid DB_MIN_CONNECTIONS value")?,
            },
            llm: LlmConfig {
                api_url: env::var("LLM_API_URL").unwrap_or(defaults.llm.api_url),
                api_key: env::var("LLM_API_KEY").ok(),
                chat_model: env::var("CHAT_MODEL").unwrap_or(defaults.llm.chat_model),
                vision_model: env::var("VISION_MODEL").unwrap_or(defaults.llm.vision_model),
                timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .context("Invalid LLM_TIMEOUT_SECONDS value")?,
            },
            review: ReviewSettings {
                labels,
                history_window: env::var("REVIEW_HISTORY_WINDOW")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .context("Invalid REVIEW_HISTORY_WINDOW value")?,
                hold_move_threshold: env::var("HOLD_MOVE_THRESHOLD")
                    .unwrap_or_else(|_| "10.0".to_string())
                    .parse()
                    .context("Invalid HOLD_MOVE_THRESHOLD value")?,
            },
            storage: StorageConfig {
                image_dir: env::var("IMAGE_DIR").unwrap_or(defaults.storage.image_dir),
            },
        };

        Ok(config)
    }

    /// Engine tunables derived from this configuration
    pub fn review_config(&self) -> ReviewConfig {
        ReviewConfig {
            labels: LabelSet::by_name(&self.review.labels).unwrap_or_default(),
            history_window: self.review.history_window,
            hold_move_threshold: self.review.hold_move_threshold,
            collaborator_timeout: Duration::from_secs(self.llm.timeout_seconds),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgresql://localhost/tradereview".to_string(),
                max_connections: 5,
                min_connections: 1,
            },
            llm: LlmConfig {
                api_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
                api_key: None,
                chat_model: "qwen-vl-plus".to_string(),
                vision_model: "qwen-vl-plus".to_string(),
                timeout_seconds: 60,
            },
            review: ReviewSettings {
                labels: "zh".to_string(),
                history_window: 10,
                hold_move_threshold: 10.0,
            },
            storage: StorageConfig {
                image_dir: "./uploads".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_review_config() {
        let config = Config::default();
        let review = config.review_config();
        assert_eq!(review.labels, LabelSet::chinese());
        assert_eq!(review.history_window, 10);
        assert_eq!(review.hold_move_threshold, 10.0);
        assert_eq!(review.collaborator_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_english_labels_resolve() {
        let mut config = Config::default();
        config.review.labels = "en".to_string();
        assert_eq!(config.review_config().labels, LabelSet::english());
    }
}
