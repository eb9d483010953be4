//! Error types for request-injector.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed document: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("remote execution failed: {0}")]
    Remote(String),

    #[error("submission queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
