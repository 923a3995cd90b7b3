use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for setting '{key}': {source}")]
    Settings {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Classifier API error: {0}")]
    ClassifierApi(String),

    #[error("Schedule error: {0}")]
    Schedule(String),

    #[error("Unknown category '{0}'")]
    UnknownCategory(String),

    #[error("Post not found: {0}")]
    PostNotFound(String),

    #[error("Briefing not found: #{0}")]
    BriefingNotFound(i64),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
