//! Analysis pipeline: detection, quality scoring, orchestration and scheduling

pub mod analyzer;
pub mod config;
pub mod detector;
pub mod error;
pub mod logging;
pub mod media_types;
pub mod quality;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{AnalysisResult, AnalyzerConfig, MediaAnalyzer, QualityAnalysis, RefreshReport};
pub use config::Config;
pub use detector::{DetectionEngine, DetectionResult, DetectionRule, DirectoryClassifier};
pub use error::{CatalogError, PipelineStage, Result, StageContext};
pub use logging::Logger;
pub use scheduler::{
    AnalysisCallback, AnalysisRequest, AnalysisScheduler, BulkSubmission, PathState,
    SchedulerConfig, Submission,
};
