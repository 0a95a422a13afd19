use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to load layer '{name}': {message}")]
    Layer { name: String, message: String },

    #[error("Missing credential: environment variable {0} is not set")]
    MissingCredential(String),

    #[error("Survey source error: {message}")]
    Source { message: String },

    #[error("Sink '{sink}' failed: {message}")]
    Sink { sink: String, message: String },

    #[error("Columns '{first}' and '{second}' both normalize to '{normalized}'")]
    ColumnCollision {
        normalized: String,
        first: String,
        second: String,
    },
}

impl SyncError {
    pub fn layer(name: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Layer {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub fn sink(sink: impl Into<String>, message: impl ToString) -> Self {
        SyncError::Sink {
            sink: sink.into(),
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
