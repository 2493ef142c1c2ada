//! Catalog persistence
//!
//! - `manager`: r2d2 pool of SQLite connections
//! - `migrations`: versioned schema and seeded media types
//! - `models`: catalog records
//! - `repository`: the `CatalogStore` seam and its SQLite implementation

pub mod manager;
pub mod migrations;
pub mod models;
pub mod repository;

pub use manager::DatabaseManager;
pub use models::{
    CatalogDirectory, CatalogFile, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem,
    MediaType, QualityInfo,
};
pub use repository::{CatalogStore, SqliteCatalogStore};
