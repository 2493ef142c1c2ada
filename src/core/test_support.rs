//! Fakes shared by the analyzer and scheduler tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::detector::{extract_title_and_year, DetectionResult, DirectoryClassifier};
use crate::core::error::{CatalogError, Result};
use crate::db::models::{
    Actor, AnalysisData, CastCrew, CatalogDirectory, CatalogFile, DirectoryAnalysis,
    ExternalMetadata, MediaFile,
    MediaItem, MediaType, NewMediaItem, ProviderDetails,
};
use crate::db::repository::{CatalogStore, SqliteCatalogStore};
use crate::db::DatabaseManager;
use crate::provider::{BestMatch, MetadataSource, SearchCandidate};

pub const SHARE: &str = "nas";

pub fn catalog_file(id: i64, path: &str, size: i64) -> CatalogFile {
    CatalogFile {
        id,
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        is_directory: false,
        size,
        last_modified: Utc::now(),
        extension: None,
        mime_type: None,
        share_id: SHARE.to_string(),
    }
}

/// In-memory catalog with the media types seeded
pub struct TestCatalog {
    sqlite: Arc<SqliteCatalogStore>,
}

impl TestCatalog {
    pub async fn new() -> Self {
        let db = DatabaseManager::new_in_memory().unwrap();
        Self {
            sqlite: Arc::new(SqliteCatalogStore::new(Arc::new(db))),
        }
    }

    pub async fn seed(&self, files: &[(&str, i64)]) {
        for (path, size) in files {
            self.sqlite.insert_file(&catalog_file(0, path, *size)).await.unwrap();
        }
    }

    pub fn sqlite(&self) -> Arc<SqliteCatalogStore> {
        self.sqlite.clone()
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        self.sqlite.clone()
    }

    pub async fn media_type(&self, name: &str) -> MediaType {
        self.sqlite
            .list_media_types()
            .await
            .unwrap()
            .into_iter()
            .find(|t| t.name == name)
            .unwrap()
    }
}

/// Classifies every non-empty directory as one media type, optionally
/// sleeping first or panicking
pub struct FixedClassifier {
    media_type: Option<MediaType>,
    delay: Option<Duration>,
    panic_on: Option<String>,
    pub calls: AtomicUsize,
    in_flight: Mutex<HashMap<String, usize>>,
    /// Most calls ever running at once for a single directory
    pub max_concurrent_per_path: AtomicUsize,
}

impl FixedClassifier {
    pub fn of_type(media_type: MediaType) -> Self {
        Self {
            media_type: Some(media_type),
            delay: None,
            panic_on: None,
            calls: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            max_concurrent_per_path: AtomicUsize::new(0),
        }
    }

    pub fn nothing() -> Self {
        Self {
            media_type: None,
            delay: None,
            panic_on: None,
            calls: AtomicUsize::new(0),
            in_flight: Mutex::new(HashMap::new()),
            max_concurrent_per_path: AtomicUsize::new(0),
        }
    }

    /// Blocks the calling thread; keep it short
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn panicking_on(mut self, directory: &str) -> Self {
        self.panic_on = Some(directory.to_string());
        self
    }

    fn enter(&self, directory_path: &str) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let running = in_flight.entry(directory_path.to_string()).or_insert(0);
        *running += 1;
        self.max_concurrent_per_path.fetch_max(*running, Ordering::SeqCst);
    }

    fn leave(&self, directory_path: &str) {
        if let Some(running) = self.in_flight.lock().unwrap().get_mut(directory_path) {
            *running -= 1;
        }
    }
}

impl DirectoryClassifier for FixedClassifier {
    fn classify(
        &self,
        directory_path: &str,
        files: &[CatalogFile],
    ) -> Result<Option<DetectionResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.enter(directory_path);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.leave(directory_path);
        if self.panic_on.as_deref() == Some(directory_path) {
            panic!("classifier exploded on {}", directory_path);
        }

        let media_type = match &self.media_type {
            Some(t) if !files.is_empty() => t.clone(),
            _ => return Ok(None),
        };
        let (title, year) = extract_title_and_year(directory_path);
        Ok(Some(DetectionResult {
            media_type,
            confidence: 0.8,
            method: "filename_pattern".to_string(),
            matched_patterns: vec!["fixed".to_string()],
            suggested_title: title,
            suggested_year: year,
            quality_hints: Vec::new(),
            analysis_data: AnalysisData {
                matched_patterns: vec!["fixed".to_string()],
                ..AnalysisData::default()
            },
        }))
    }
}

enum Script {
    Match(String),
    NoMatch,
    Fail,
    Hang,
}

/// Metadata source with canned behaviour
pub struct ScriptedMetadata {
    script: Script,
}

impl ScriptedMetadata {
    /// Returns `heat_metadata` for any query
    pub fn matching(title: &str) -> Self {
        Self { script: Script::Match(title.to_string()) }
    }

    pub fn no_match() -> Self {
        Self { script: Script::NoMatch }
    }

    pub fn failing() -> Self {
        Self { script: Script::Fail }
    }

    pub fn hanging() -> Self {
        Self { script: Script::Hang }
    }
}

#[async_trait]
impl MetadataSource for ScriptedMetadata {
    async fn best_match(
        &self,
        _query: &str,
        _media_type: &str,
        year: Option<i32>,
    ) -> Result<Option<BestMatch>> {
        match &self.script {
            Script::Match(title) => Ok(Some(BestMatch {
                provider: "tmdb".to_string(),
                candidate: SearchCandidate {
                    external_id: "949".to_string(),
                    title: title.clone(),
                    year,
                    rating: Some(7.9),
                    description: None,
                    cover_url: Some("https://image.tmdb.org/t/p/w500/heat.jpg".to_string()),
                    relevance: 0.9,
                },
                score: 1.5,
            })),
            Script::NoMatch => Ok(None),
            Script::Fail => Err(CatalogError::ProviderError("all providers failed".into())),
            Script::Hang => {
                futures::future::pending::<()>().await;
                Ok(None)
            }
        }
    }

    async fn details(
        &self,
        _provider: &str,
        _external_id: &str,
        _media_type: &str,
    ) -> Result<ExternalMetadata> {
        match &self.script {
            Script::Match(_) => Ok(heat_metadata(0)),
            _ => Err(CatalogError::ProviderError("no details".into())),
        }
    }
}

/// Delegates to SQLite but refuses to store one file path
pub struct FailingFileStore {
    inner: Arc<SqliteCatalogStore>,
    failing_path: String,
}

impl FailingFileStore {
    pub fn new(inner: Arc<SqliteCatalogStore>, failing_path: &str) -> Self {
        Self {
            inner,
            failing_path: failing_path.to_string(),
        }
    }
}

#[async_trait]
impl CatalogStore for FailingFileStore {
    async fn list_files(&self, directory_path: &str, share_id: &str) -> Result<Vec<CatalogFile>> {
        self.inner.list_files(directory_path, share_id).await
    }

    async fn upsert_directory_analysis(
        &self,
        analysis: &DirectoryAnalysis,
    ) -> Result<DirectoryAnalysis> {
        self.inner.upsert_directory_analysis(analysis).await
    }

    async fn link_media_item(&self, analysis_id: i64, media_item_id: i64) -> Result<()> {
        self.inner.link_media_item(analysis_id, media_item_id).await
    }

    async fn find_media_item(&self, id: i64) -> Result<Option<MediaItem>> {
        self.inner.find_media_item(id).await
    }

    async fn create_media_item(&self, item: &NewMediaItem) -> Result<MediaItem> {
        self.inner.create_media_item(item).await
    }

    async fn touch_media_item(&self, id: i64) -> Result<MediaItem> {
        self.inner.touch_media_item(id).await
    }

    async fn update_media_item(&self, item: &MediaItem) -> Result<()> {
        self.inner.update_media_item(item).await
    }

    async fn upsert_external_metadata(
        &self,
        metadata: &ExternalMetadata,
    ) -> Result<ExternalMetadata> {
        self.inner.upsert_external_metadata(metadata).await
    }

    async fn upsert_media_file(&self, file: &MediaFile) -> Result<MediaFile> {
        if file.file_path == self.failing_path {
            return Err(CatalogError::DatabaseError(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_FULL),
                Some("database or disk is full".to_string()),
            )));
        }
        self.inner.upsert_media_file(file).await
    }

    async fn list_catalog_directories(&self) -> Result<Vec<CatalogDirectory>> {
        self.inner.list_catalog_directories().await
    }

    async fn list_media_items_for_refresh(
        &self,
        fetched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MediaItem>> {
        self.inner.list_media_items_for_refresh(fetched_before, limit).await
    }
}

pub fn media_item(title: &str) -> MediaItem {
    let now = Utc::now();
    MediaItem {
        id: 1,
        media_type_id: 1,
        media_type: Some(MediaType {
            id: 1,
            name: "movie".to_string(),
            description: None,
        }),
        title: title.to_string(),
        original_title: None,
        year: None,
        description: None,
        genre: Vec::new(),
        director: None,
        cast_crew: CastCrew::default(),
        rating: None,
        runtime: None,
        language: None,
        country: None,
        status: "active".to_string(),
        first_detected: now,
        last_updated: now,
    }
}

pub fn heat_metadata(media_item_id: i64) -> ExternalMetadata {
    ExternalMetadata {
        id: 0,
        media_item_id,
        provider: "tmdb".to_string(),
        external_id: "949".to_string(),
        data: ProviderDetails {
            title: Some("Heat".to_string()),
            original_title: Some("Heat".to_string()),
            overview: Some("A group of high-end professional thieves".to_string()),
            genres: vec!["Crime".to_string()],
            release_year: Some(1995),
            runtime: Some(170),
            language: Some("en".to_string()),
            country: Some("US".to_string()),
            director: Some("Michael Mann".to_string()),
            cast: vec![Actor {
                name: "Al Pacino".to_string(),
                character: Some("Lt. Vincent Hanna".to_string()),
                order: 0,
            }],
            raw: serde_json::json!({"id": 949}),
        },
        rating: Some(7.9),
        review_url: None,
        cover_url: None,
        trailer_url: None,
        last_fetched: Utc::now(),
    }
}
