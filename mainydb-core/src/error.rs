// src/error.rs
//! Error type for the MainyDB engine.
//!
//! All fallible engine operations return `crate::error::Result<T>`. Variants
//! map directly onto the caller-visible error kinds the engine promises:
//! malformed queries/updates/pipelines, unique-index violations, unknown
//! names, on-disk corruption, I/O failure, and cooperative cancellation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MainyDbError {
    #[error("bad query: {0}")]
    BadQuery(String),

    #[error("bad update: {0}")]
    BadUpdate(String),

    #[error("bad pipeline: {0}")]
    BadPipeline(String),

    #[error("duplicate key for index '{index}': {key}")]
    DuplicateKey { index: String, key: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    #[error("corrupt file: {0}")]
    CorruptFile(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<bincode::Error> for MainyDbError {
    fn from(e: bincode::Error) -> Self {
        MainyDbError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MainyDbError>;
