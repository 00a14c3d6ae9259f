//! Error types for mapstore
//!
//! Provides a unified error type for all operations.
//!
//! Logical negatives (key absent, delete of an already-deleted record) are
//! reported as `Option`/`bool` results, not as errors.

use thiserror::Error;

/// Result type alias using MapStoreError
pub type Result<T> = std::result::Result<T, MapStoreError>;

/// Unified error type for mapstore operations
#[derive(Debug, Error)]
pub enum MapStoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // File / Mapping Errors
    // -------------------------------------------------------------------------
    #[error("cannot open backing file: {0}")]
    OpenFailure(String),

    #[error("corrupt database format: {0}")]
    CorruptFormat(String),

    #[error("cannot establish memory mapping: {0}")]
    MapFailure(String),

    #[error("cannot grow file/mapping: {0}")]
    GrowthFailure(String),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("invalid record offset: {0}")]
    InvalidOffset(u64),

    #[error("record at offset {0} is deleted")]
    Deleted(u64),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
