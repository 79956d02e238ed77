use thiserror::Error;

#[derive(Debug, Error)]
pub enum SympAiError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SympAiError>;
