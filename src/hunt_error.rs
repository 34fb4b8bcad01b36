//! Error type for the outer layers (configuration, recordings, pipeline).
//! The tracking core itself never fails.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HuntError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("recording line {line}: {source}")]
    Recording {
        line:   usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pipeline is no longer running")]
    PipelineClosed,

    #[error("pipeline task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
