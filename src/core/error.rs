//! Error type system for the catalog analyzer
//!
//! This module provides:
//! - A single error enum shared by every adapter and the pipeline
//! - Pipeline stage tagging for errors raised inside `analyze`
//! - Retry / timeout classification used by the scheduler and callers

use serde::Serialize;
use std::fmt;

/// Steps of the directory analysis pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    ListFiles,
    Detection,
    DirectoryAnalysis,
    MediaItem,
    Enrichment,
    Quality,
    MediaFiles,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::ListFiles => "list_files",
            PipelineStage::Detection => "detection",
            PipelineStage::DirectoryAnalysis => "directory_analysis",
            PipelineStage::MediaItem => "media_item",
            PipelineStage::Enrichment => "enrichment",
            PipelineStage::Quality => "quality",
            PipelineStage::MediaFiles => "media_files",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the catalog analyzer
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    // System-level errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    // Adapter errors
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    // Scheduling errors
    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Analysis queue is full: {0}")]
    QueueFull(String),

    #[error("Scheduler is stopped")]
    SchedulerStopped,

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Task error: {0}")]
    TaskError(String),

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        source: Box<CatalogError>,
    },
}

impl CatalogError {
    /// Get the error type name used in structured logs
    pub fn error_type(&self) -> &'static str {
        match self {
            CatalogError::ConfigError(_) => "ConfigError",
            CatalogError::DatabaseError(_) => "DatabaseError",
            CatalogError::PoolError(_) => "PoolError",
            CatalogError::NotFound(_) => "NotFound",
            CatalogError::ValidationError(_) => "ValidationError",
            CatalogError::SerializationError(_) => "SerializationError",
            CatalogError::ProviderError(_) => "ProviderError",
            CatalogError::NetworkError(_) => "NetworkError",
            CatalogError::IoError(_) => "IoError",
            CatalogError::Timeout(_) => "Timeout",
            CatalogError::Cancelled(_) => "Cancelled",
            CatalogError::QueueFull(_) => "QueueFull",
            CatalogError::SchedulerStopped => "SchedulerStopped",
            CatalogError::AlreadyRunning => "AlreadyRunning",
            CatalogError::TaskError(_) => "TaskError",
            CatalogError::Stage { source, .. } => source.error_type(),
        }
    }

    /// Check if resubmitting the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Stage { source, .. } => source.is_retryable(),
            other => matches!(
                other,
                CatalogError::DatabaseError(_)
                    | CatalogError::PoolError(_)
                    | CatalogError::NetworkError(_)
                    | CatalogError::Timeout(_)
                    | CatalogError::QueueFull(_)
            ),
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            CatalogError::Timeout(_) => true,
            CatalogError::Stage { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Pipeline stage the error was raised in, if any
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            CatalogError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Tag the error with a pipeline stage. The innermost stage wins.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            tagged @ CatalogError::Stage { .. } => tagged,
            other => CatalogError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CatalogError::Timeout(err.to_string())
        } else if err.is_decode() {
            CatalogError::ProviderError(format!("Malformed provider response: {}", err))
        } else {
            CatalogError::NetworkError(err.to_string())
        }
    }
}

/// Result type alias for operations that can fail with CatalogError
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Extension trait for tagging adapter errors with the pipeline stage
pub trait StageContext<T> {
    fn in_stage(self, stage: PipelineStage) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn in_stage(self, stage: PipelineStage) -> Result<T> {
        self.map_err(|e| e.at_stage(stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        assert_eq!(
            CatalogError::ProviderError("test".into()).error_type(),
            "ProviderError"
        );
        assert_eq!(
            CatalogError::QueueFull("test".into()).error_type(),
            "QueueFull"
        );
        assert_eq!(
            CatalogError::DatabaseError(rusqlite::Error::InvalidQuery)
                .at_stage(PipelineStage::MediaItem)
                .error_type(),
            "DatabaseError"
        );
    }

    #[test]
    fn test_error_retryable() {
        assert!(CatalogError::NetworkError("test".into()).is_retryable());
        assert!(CatalogError::Timeout("test".into()).is_retryable());
        assert!(CatalogError::QueueFull("test".into()).is_retryable());
        assert!(!CatalogError::ValidationError("test".into()).is_retryable());
        assert!(!CatalogError::SchedulerStopped.is_retryable());
    }

    #[test]
    fn test_stage_tagging_keeps_innermost_stage() {
        let err: Result<()> = Err(CatalogError::Timeout("provider".into()));
        let err = err
            .in_stage(PipelineStage::Enrichment)
            .in_stage(PipelineStage::Quality)
            .unwrap_err();

        assert_eq!(err.stage(), Some(PipelineStage::Enrichment));
        assert!(err.is_timeout());
        assert!(err.to_string().starts_with("enrichment stage failed"));
    }
}
