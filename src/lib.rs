//! Catalog Analyzer
//!
//! Turns directories on shared storage into a typed media catalog: each
//! directory is classified by filename heuristics, linked to a media item,
//! enriched from external metadata providers, and its files are scored for
//! quality and recorded with access links.

pub mod core;
pub mod db;
pub mod provider;

pub use crate::core::{AnalysisScheduler, Config, MediaAnalyzer};
pub use db::DatabaseManager;
pub use provider::ProviderManager;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
