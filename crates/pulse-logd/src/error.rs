use std::path::PathBuf;

use thiserror::Error;

/// Errors that stop the aggregator.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("Failed to read config file {path}: {error}")]
    ConfigIo { path: PathBuf, error: String },

    #[error("Failed to parse config: {0}")]
    ConfigParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to create FIFO {path}: {source}")]
    CreateFifo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} exists and is not a FIFO")]
    NotAFifo(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AggregatorError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
