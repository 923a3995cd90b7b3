use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub gemini_api_key: Option<String>,

    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,

    /// Author recorded for feed entries that carry no author metadata.
    #[serde(default = "default_author")]
    pub default_author: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("twit-muncher");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("twit-muncher.db").to_string_lossy().to_string()
}

fn default_feed_base_url() -> String {
    "https://rsshub.app".to_string()
}

fn default_author() -> String {
    "unknown".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            gemini_api_key: None,
            feed_base_url: default_feed_base_url(),
            default_author: default_author(),
        }
    }
}

impl Config {
    /// Load from the given path (or the default location), writing a default
    /// file when none exists yet. `GEMINI_API_KEY` wins over the file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                config.gemini_api_key = Some(key);
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
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
            .join("twit-muncher")
            .join("config.toml")
    }

    /// The API key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}
