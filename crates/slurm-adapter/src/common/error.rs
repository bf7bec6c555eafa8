use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Failed to watch {path:?}: {source}")]
    WatchError {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<serde_json::error::Error> for AdapterError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
