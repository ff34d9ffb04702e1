//! Error types for the deployment controller

use thiserror::Error;

use crate::store::StorageError;

/// Main error type for the deployment controller
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Process error: {0}")]
    ProcessError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}

impl ControlError {
    /// Re-label any failure raised inside the generation pipeline.
    ///
    /// Errors that already carry a pipeline meaning pass through unchanged.
    pub fn into_generation_failure(self, context: &str) -> ControlError {
        match self {
            ControlError::NotFound(_)
            | ControlError::Forbidden(_)
            | ControlError::GenerationFailed(_)
            | ControlError::RepositoryUnavailable(_)
            | ControlError::ResourceExhausted(_)
            | ControlError::IllegalState(_) => self,
            other => ControlError::GenerationFailed(format!("{}: {}", context, other)),
        }
    }
}

impl From<tera::Error> for ControlError {
    fn from(err: tera::Error) -> Self {
        // tera keeps the useful part of the message in the source chain
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        ControlError::GenerationFailed(message)
    }
}
