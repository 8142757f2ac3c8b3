//! Error types for the Callbridge core library

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Agent store: {0}")]
    Store(#[from] sled::Error),

    #[error("Agent record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upstream request: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream {0}: {1}")]
    Upstream(u16, String),

    #[error("Empty reply from upstream")]
    EmptyReply,
}
