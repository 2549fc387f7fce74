// ABOUTME: Error types for the execution engine
// ABOUTME: Covers Docker failures, workspace I/O, request validation, and cancellation

use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Docker/container-related errors
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Container daemon unreachable or container could not be created
    #[error("Container runtime failure: {0}")]
    Runtime(String),

    /// Workspace creation or file write failed
    #[error("Workspace error: {0}")]
    Workspace(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata sink failed to record a result
    #[error("Metadata sink error: {0}")]
    Sink(String),
}

/// Type alias for Results that return EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
