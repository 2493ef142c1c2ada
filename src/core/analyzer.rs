//! Directory analysis pipeline
//!
//! `MediaAnalyzer::analyze` turns one directory on one share into a
//! classified catalog entry:
//!
//! 1. list the files below the directory
//! 2. classify them (an unclassifiable directory yields an empty result)
//! 3. upsert the directory analysis record
//! 4. load and touch, or create and link, the media item
//! 5. enrich from external providers (best-effort, bounded by a deadline)
//! 6. score file quality (best-effort)
//! 7. upsert one media file row per relevant file (best-effort per file)
//!
//! Steps 1-4 are fatal. A provider deadline overrun is fatal as well, so a
//! hung provider surfaces as a timeout instead of a silently partial result.

use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::detector::{DetectionResult, DirectoryClassifier};
use crate::core::error::{CatalogError, PipelineStage, Result, StageContext};
use crate::core::media_types::{expected_qualities, is_relevant};
use crate::core::quality;
use crate::db::models::{
    CatalogFile, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem, NewMediaItem,
    QualityInfo,
};
use crate::db::repository::CatalogStore;
use crate::provider::MetadataSource;

/// Pipeline settings
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Deadline for the whole enrichment step
    pub provider_timeout: Duration,
    /// Link scheme for shares without an explicit entry, e.g. `"smb"`
    pub default_protocol: String,
    /// Share id -> link scheme (`nfs`, `ftp`, `webdav`, `file`, ...)
    pub share_protocols: HashMap<String, String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            provider_timeout: Duration::from_secs(300),
            default_protocol: "smb".to_string(),
            share_protocols: HashMap::new(),
        }
    }
}

/// Quality summary over the relevant files of a directory
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QualityAnalysis {
    pub best_quality: Option<QualityInfo>,
    /// Distinct display names in first-seen order
    pub available_qualities: Vec<String>,
    pub total_files: usize,
    pub total_size: i64,
    /// Expected tiers for the media type that no file provides
    pub missing_qualities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileUpdateFailure {
    pub file_path: String,
    pub error: String,
}

/// Outcome of the per-file update step
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileUpdateReport {
    pub updated: Vec<MediaFile>,
    pub failures: Vec<FileUpdateFailure>,
}

/// Everything one analysis produced. The default value is the result for an
/// unclassifiable directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub directory_analysis: Option<DirectoryAnalysis>,
    pub media_item: Option<MediaItem>,
    pub external_metadata: Vec<ExternalMetadata>,
    pub quality_analysis: Option<QualityAnalysis>,
    pub updated_files: Vec<MediaFile>,
    pub file_failures: Vec<FileUpdateFailure>,
}

impl AnalysisResult {
    pub fn is_classified(&self) -> bool {
        self.directory_analysis.is_some()
    }
}

/// Outcome of one metadata refresh pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Items considered due
    pub candidates: usize,
    pub refreshed: usize,
    /// Items no provider matched
    pub unmatched: usize,
    pub failed: usize,
}

/// Runs the analysis pipeline against injected adapters
pub struct MediaAnalyzer {
    store: Arc<dyn CatalogStore>,
    classifier: Arc<dyn DirectoryClassifier>,
    metadata: Arc<dyn MetadataSource>,
    config: AnalyzerConfig,
}

impl MediaAnalyzer {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        classifier: Arc<dyn DirectoryClassifier>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        Self {
            store,
            classifier,
            metadata,
            config: AnalyzerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CatalogStore> {
        &self.store
    }

    /// Analyze one directory. Safe to call repeatedly: later calls update the
    /// same records instead of creating new ones.
    pub async fn analyze(&self, directory_path: &str, share_id: &str) -> Result<AnalysisResult> {
        let started = std::time::Instant::now();

        let files = self
            .store
            .list_files(directory_path, share_id)
            .await
            .in_stage(PipelineStage::ListFiles)?;

        let detection = match self
            .classifier
            .classify(directory_path, &files)
            .in_stage(PipelineStage::Detection)?
        {
            Some(detection) => detection,
            None => {
                info!(
                    directory = %directory_path,
                    share = %share_id,
                    files = files.len(),
                    "Directory could not be classified"
                );
                return Ok(AnalysisResult::default());
            }
        };

        debug!(
            directory = %directory_path,
            media_type = %detection.media_type.name,
            confidence = detection.confidence,
            method = %detection.method,
            "Directory classified"
        );

        let mut directory_analysis = self
            .record_directory_analysis(directory_path, share_id, &detection)
            .await
            .in_stage(PipelineStage::DirectoryAnalysis)?;

        let mut media_item = self
            .get_or_create_media_item(&directory_analysis, &detection)
            .await
            .in_stage(PipelineStage::MediaItem)?;
        directory_analysis.media_item_id = Some(media_item.id);

        let external_metadata = match self
            .enrich_media_item(&mut media_item)
            .await
            .in_stage(PipelineStage::Enrichment)
        {
            Ok(metadata) => metadata,
            Err(e) if e.is_timeout() => {
                error!(directory = %directory_path, error = %e, "Metadata enrichment timed out");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    directory = %directory_path,
                    media_item_id = media_item.id,
                    error = %e,
                    "Metadata enrichment failed"
                );
                Vec::new()
            }
        };

        let quality_analysis = match self
            .analyze_quality(&media_item, &files)
            .in_stage(PipelineStage::Quality)
        {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(directory = %directory_path, error = %e, "Quality analysis failed");
                None
            }
        };

        let media_type = media_item
            .media_type
            .as_ref()
            .map_or(detection.media_type.name.as_str(), |t| t.name.as_str())
            .to_string();
        let report = self
            .update_media_files(&media_item, &media_type, &files, share_id)
            .await;

        info!(
            directory = %directory_path,
            share = %share_id,
            media_item_id = media_item.id,
            media_type = %media_type,
            files_updated = report.updated.len(),
            files_failed = report.failures.len(),
            metadata_records = external_metadata.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Directory analysis complete"
        );

        Ok(AnalysisResult {
            directory_analysis: Some(directory_analysis),
            media_item: Some(media_item),
            external_metadata,
            quality_analysis,
            updated_files: report.updated,
            file_failures: report.failures,
        })
    }

    /// Re-fetch provider metadata for up to `limit` media items that have
    /// none fetched within `older_than`, or have a record older than that.
    /// Each item's record is replaced per provider and empty item fields are
    /// filled, exactly as during analysis. One item failing, or running past
    /// the provider deadline, does not stop the pass.
    pub async fn refresh_external_metadata(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<RefreshReport> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| CatalogError::ValidationError(format!("invalid refresh age: {}", e)))?;
        let cutoff = Utc::now() - age;

        let items = self
            .store
            .list_media_items_for_refresh(cutoff, limit)
            .await
            .in_stage(PipelineStage::Enrichment)?;
        info!(
            candidates = items.len(),
            older_than_secs = older_than.as_secs(),
            "Refreshing external metadata"
        );

        let mut report = RefreshReport {
            candidates: items.len(),
            ..RefreshReport::default()
        };
        for mut item in items {
            match self.enrich_media_item(&mut item).await {
                Ok(fetched) if fetched.is_empty() => {
                    debug!(media_item_id = item.id, title = %item.title, "No metadata found");
                    report.unmatched += 1;
                }
                Ok(_) => report.refreshed += 1,
                Err(e) => {
                    warn!(
                        media_item_id = item.id,
                        title = %item.title,
                        error = %e,
                        "Metadata refresh failed"
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            refreshed = report.refreshed,
            unmatched = report.unmatched,
            failed = report.failed,
            "External metadata refresh complete"
        );
        Ok(report)
    }

    async fn record_directory_analysis(
        &self,
        directory_path: &str,
        share_id: &str,
        detection: &DetectionResult,
    ) -> Result<DirectoryAnalysis> {
        let data = detection.analysis_data.clone();
        let record = DirectoryAnalysis {
            id: 0,
            directory_path: directory_path.to_string(),
            share_id: share_id.to_string(),
            media_item_id: None,
            confidence_score: detection.confidence.clamp(0.0, 1.0),
            detection_method: detection.method.clone(),
            files_count: data.files_count(),
            total_size: data.total_size(),
            analysis_data: data,
            last_analyzed: Utc::now(),
        };
        self.store.upsert_directory_analysis(&record).await
    }

    /// Load and touch the linked media item, or create one and link it
    async fn get_or_create_media_item(
        &self,
        analysis: &DirectoryAnalysis,
        detection: &DetectionResult,
    ) -> Result<MediaItem> {
        if let Some(id) = analysis.media_item_id {
            if self.store.find_media_item(id).await?.is_some() {
                let mut item = self.store.touch_media_item(id).await?;
                if item.year.is_none() && detection.suggested_year.is_some() {
                    item.year = detection.suggested_year;
                    self.store.update_media_item(&item).await?;
                }
                return Ok(item);
            }
            warn!(
                directory = %analysis.directory_path,
                media_item_id = id,
                "Linked media item no longer exists, creating a new one"
            );
        }

        let title = if detection.suggested_title.is_empty() {
            analysis
                .directory_path
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .to_string()
        } else {
            detection.suggested_title.clone()
        };

        let item = self
            .store
            .create_media_item(&NewMediaItem {
                media_type_id: detection.media_type.id,
                title,
                year: detection.suggested_year,
            })
            .await?;
        self.store.link_media_item(analysis.id, item.id).await?;

        info!(
            media_item_id = item.id,
            title = %item.title,
            directory = %analysis.directory_path,
            "Created media item"
        );
        Ok(item)
    }

    /// Best match, details and upsert, all under the provider deadline; then
    /// fill empty media item fields from what the provider returned.
    async fn enrich_media_item(&self, item: &mut MediaItem) -> Result<Vec<ExternalMetadata>> {
        let deadline = self.config.provider_timeout;
        let fetch = self.fetch_external_metadata(item);
        let fetched = match tokio::time::timeout(deadline, fetch).await {
            // only the step deadline is fatal; a single slow HTTP request is a provider failure
            Ok(fetched) => fetched.map_err(|e| {
                if e.is_timeout() {
                    CatalogError::ProviderError(e.to_string())
                } else {
                    e
                }
            })?,
            Err(_) => {
                return Err(CatalogError::Timeout(format!(
                    "metadata providers did not answer within {:?}",
                    deadline
                )))
            }
        };

        let mut changed = false;
        for metadata in &fetched {
            changed |= merge_provider_details(item, metadata);
        }
        if changed {
            if let Err(e) = self.store.update_media_item(item).await {
                warn!(media_item_id = item.id, error = %e, "Failed to store enriched media item");
            }
        }
        Ok(fetched)
    }

    async fn fetch_external_metadata(&self, item: &MediaItem) -> Result<Vec<ExternalMetadata>> {
        let media_type = item
            .media_type
            .as_ref()
            .map(|t| t.name.as_str())
            .ok_or_else(|| {
                CatalogError::ValidationError(format!("media item {} has no media type", item.id))
            })?;

        let best = match self.metadata.best_match(&item.title, media_type, item.year).await? {
            Some(best) => best,
            None => {
                debug!(title = %item.title, media_type, "No provider match");
                return Ok(Vec::new());
            }
        };

        let mut metadata = self
            .metadata
            .details(&best.provider, &best.candidate.external_id, media_type)
            .await?;
        metadata.media_item_id = item.id;
        if metadata.cover_url.is_none() {
            metadata.cover_url = best.candidate.cover_url.clone();
        }
        if metadata.rating.is_none() {
            metadata.rating = best.candidate.rating;
        }

        let stored = self.store.upsert_external_metadata(&metadata).await?;
        Ok(vec![stored])
    }

    /// Score every relevant file and summarize
    pub fn analyze_quality(
        &self,
        item: &MediaItem,
        files: &[CatalogFile],
    ) -> Result<QualityAnalysis> {
        let media_type = item.media_type.as_ref().ok_or_else(|| {
            CatalogError::ValidationError(format!("media item {} has no media type", item.id))
        })?;

        let mut analysis = QualityAnalysis::default();
        for file in relevant_files(&media_type.name, files) {
            analysis.total_files += 1;
            analysis.total_size += file.size;

            let info = quality::score(&file.name, file.normalized_extension().as_deref());
            let name = info.display_name();
            if !analysis.available_qualities.contains(&name) {
                analysis.available_qualities.push(name);
            }
            let better = analysis
                .best_quality
                .as_ref()
                .map_or(true, |best| info.is_better_than(best));
            if better {
                analysis.best_quality = Some(info);
            }
        }

        analysis.missing_qualities = expected_qualities(&media_type.name)
            .iter()
            .filter(|q| !analysis.available_qualities.iter().any(|a| a == *q))
            .map(|q| q.to_string())
            .collect();

        Ok(analysis)
    }

    /// Upsert a media file row for each relevant file, collecting failures
    async fn update_media_files(
        &self,
        item: &MediaItem,
        media_type: &str,
        files: &[CatalogFile],
        share_id: &str,
    ) -> FileUpdateReport {
        let mut report = FileUpdateReport::default();
        let protocol = self
            .config
            .share_protocols
            .get(share_id)
            .unwrap_or(&self.config.default_protocol);

        for file in relevant_files(media_type, files) {
            let extension = file.normalized_extension();
            let now = Utc::now();
            let record = MediaFile {
                id: 0,
                media_item_id: item.id,
                file_path: file.path.clone(),
                share_id: share_id.to_string(),
                filename: file.name.clone(),
                file_size: file.size,
                quality_info: quality::score(&file.name, extension.as_deref()),
                file_extension: extension,
                direct_link: direct_link(protocol, share_id, &file.path),
                virtual_link: virtual_link(share_id, file.id),
                last_verified: now,
                created_at: now,
            };

            match self.store.upsert_media_file(&record).await {
                Ok(stored) => report.updated.push(stored),
                Err(e) => {
                    let e = e.at_stage(PipelineStage::MediaFiles);
                    warn!(
                        file = %file.path,
                        media_item_id = item.id,
                        error = %e,
                        "Failed to update media file"
                    );
                    report.failures.push(FileUpdateFailure {
                        file_path: file.path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report
    }
}

/// Non-directory files whose extension matters for the media type
fn relevant_files<'a>(
    media_type: &'a str,
    files: &'a [CatalogFile],
) -> impl Iterator<Item = &'a CatalogFile> + 'a {
    files.iter().filter(move |f| {
        !f.is_directory && is_relevant(media_type, f.normalized_extension().as_deref())
    })
}

/// `{protocol}://{share}/{path}` with the path's leading slashes dropped
pub fn direct_link(protocol: &str, share_id: &str, path: &str) -> String {
    format!("{}://{}/{}", protocol, share_id, path.trim_start_matches('/'))
}

pub fn virtual_link(share_id: &str, file_id: i64) -> String {
    format!("virtual://{}/{}", share_id, file_id)
}

/// Fill empty media item fields from provider details. Populated fields are
/// never overwritten. Returns whether anything changed.
fn merge_provider_details(item: &mut MediaItem, metadata: &ExternalMetadata) -> bool {
    fn fill<T: Clone>(slot: &mut Option<T>, value: &Option<T>) -> bool {
        if slot.is_none() && value.is_some() {
            *slot = value.clone();
            return true;
        }
        false
    }

    let details = &metadata.data;
    let mut changed = false;
    changed |= fill(&mut item.original_title, &details.original_title);
    changed |= fill(&mut item.description, &details.overview);
    changed |= fill(&mut item.year, &details.release_year);
    changed |= fill(&mut item.runtime, &details.runtime);
    changed |= fill(&mut item.language, &details.language);
    changed |= fill(&mut item.country, &details.country);
    changed |= fill(&mut item.director, &details.director);
    changed |= fill(&mut item.rating, &metadata.rating);
    changed |= fill(&mut item.cast_crew.director, &details.director);

    if item.genre.is_empty() && !details.genres.is_empty() {
        item.genre = details.genres.clone();
        changed = true;
    }
    if item.cast_crew.actors.is_empty() && !details.cast.is_empty() {
        item.cast_crew.actors = details.cast.clone();
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::{
        catalog_file, heat_metadata, media_item, FailingFileStore, FixedClassifier,
        ScriptedMetadata, TestCatalog,
    };

    const MOVIE_DIR: &str = "/movies/Heat (1995)";

    async fn seeded_catalog() -> TestCatalog {
        let catalog = TestCatalog::new().await;
        catalog
            .seed(&[
                ("/movies/Heat (1995)/Heat.1995.2160p.BluRay.x265.HDR.mkv", 40_000_000_000),
                ("/movies/Heat (1995)/Heat.1995.1080p.WEB-DL.mkv", 9_000_000_000),
                ("/movies/Heat (1995)/Heat.1995.srt", 90_000),
            ])
            .await;
        catalog
    }

    async fn analyzer(catalog: &TestCatalog, metadata: ScriptedMetadata) -> MediaAnalyzer {
        let movie = catalog.media_type("movie").await;
        MediaAnalyzer::new(
            catalog.store(),
            Arc::new(FixedClassifier::of_type(movie)),
            Arc::new(metadata),
        )
    }

    #[test]
    fn test_links() {
        assert_eq!(direct_link("smb", "nas", "/movies/a.mkv"), "smb://nas/movies/a.mkv");
        assert_eq!(direct_link("nfs", "nas", "movies/a.mkv"), "nfs://nas/movies/a.mkv");
        assert_eq!(virtual_link("nas", 42), "virtual://nas/42");
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::matching("Heat")).await;

        let result = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap();

        let analysis = result.directory_analysis.unwrap();
        let item = result.media_item.unwrap();
        assert_eq!(analysis.media_item_id, Some(item.id));
        assert_eq!(item.title, "Heat");
        assert_eq!(item.status, "active");
        assert_eq!(item.director.as_deref(), Some("Michael Mann"));
        assert_eq!(item.genre, vec!["Crime".to_string()]);

        assert_eq!(result.external_metadata.len(), 1);
        assert_eq!(result.external_metadata[0].media_item_id, item.id);

        let quality = result.quality_analysis.unwrap();
        assert_eq!(quality.total_files, 2);
        assert_eq!(quality.total_size, 49_000_000_000);
        assert_eq!(quality.best_quality.unwrap().quality_score, 125);
        // listed by name, so the 1080p file comes first
        assert_eq!(quality.available_qualities, vec!["1080p".to_string(), "4K/UHD".to_string()]);
        assert_eq!(quality.missing_qualities, vec!["720p".to_string()]);

        // subtitles are not a relevant movie file
        assert_eq!(result.updated_files.len(), 2);
        assert!(result.file_failures.is_empty());
        assert!(result
            .updated_files
            .iter()
            .all(|f| f.direct_link.starts_with("smb://nas/movies/Heat (1995)/")));
    }

    #[tokio::test]
    async fn test_pipeline_with_default_rules() {
        use crate::core::detector::{DetectionEngine, DetectionRule};

        let catalog = seeded_catalog().await;
        let types = catalog.sqlite().list_media_types().await.unwrap();
        let engine = DetectionEngine::new(DetectionRule::defaults(), &types).unwrap();
        let analyzer = MediaAnalyzer::new(
            catalog.store(),
            Arc::new(engine),
            Arc::new(ScriptedMetadata::no_match()),
        );

        let result = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap();

        let item = result.media_item.unwrap();
        assert_eq!(item.media_type.map(|t| t.name), Some("movie".to_string()));
        assert_eq!(item.title, "Heat");
        assert_eq!(item.year, Some(1995));

        let stored = catalog
            .sqlite()
            .find_directory_analysis(MOVIE_DIR, "nas")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.media_item_id, Some(item.id));
        assert_eq!(stored.files_count, 3);
        assert!(stored.confidence_score > 0.0 && stored.confidence_score <= 1.0);
    }

    #[tokio::test]
    async fn test_reanalysis_reuses_media_item() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::no_match()).await;

        let first = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap().media_item.unwrap();
        let second = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap().media_item.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_updated >= first.last_updated);
        assert_eq!(second.first_detected, first.first_detected);
        assert_eq!(catalog.sqlite().count_media_items().await.unwrap(), 1);
        assert_eq!(catalog.sqlite().list_media_files(first.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_provider_errors_are_isolated() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::failing()).await;

        let result = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap();

        assert!(result.external_metadata.is_empty());
        assert!(result.media_item.is_some());
        assert!(result.directory_analysis.is_some());
        assert_eq!(result.updated_files.len(), 2);
    }

    #[tokio::test]
    async fn test_hung_provider_times_out() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::hanging())
            .await
            .with_config(AnalyzerConfig {
                provider_timeout: Duration::from_millis(50),
                ..AnalyzerConfig::default()
            });

        let err = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(err.stage(), Some(PipelineStage::Enrichment));
    }

    #[tokio::test]
    async fn test_one_failing_file_does_not_abort() {
        let catalog = TestCatalog::new().await;
        catalog
            .seed(&[
                ("/music/Album/01.flac", 30_000_000),
                ("/music/Album/02.flac", 31_000_000),
                ("/music/Album/03.flac", 32_000_000),
            ])
            .await;
        let store = Arc::new(FailingFileStore::new(catalog.sqlite(), "/music/Album/02.flac"));
        let analyzer = MediaAnalyzer::new(
            store,
            Arc::new(FixedClassifier::of_type(catalog.media_type("music").await)),
            Arc::new(ScriptedMetadata::no_match()),
        );

        let result = analyzer.analyze("/music/Album", "nas").await.unwrap();

        let paths: Vec<_> = result.updated_files.iter().map(|f| f.file_path.as_str()).collect();
        assert_eq!(paths, vec!["/music/Album/01.flac", "/music/Album/03.flac"]);
        assert_eq!(result.file_failures.len(), 1);
        assert_eq!(result.file_failures[0].file_path, "/music/Album/02.flac");
        assert_eq!(
            result.quality_analysis.unwrap().available_qualities,
            vec!["Audio_Lossless".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unclassifiable_directory_is_empty_result() {
        let catalog = seeded_catalog().await;
        let analyzer = MediaAnalyzer::new(
            catalog.store(),
            Arc::new(FixedClassifier::nothing()),
            Arc::new(ScriptedMetadata::failing()),
        );

        let result = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap();

        assert_eq!(result, AnalysisResult::default());
        assert!(!result.is_classified());
        let stored = catalog.sqlite().find_directory_analysis(MOVIE_DIR, "nas").await;
        assert!(stored.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_share_protocol_override() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::no_match())
            .await
            .with_config(AnalyzerConfig {
                share_protocols: HashMap::from([("nas".to_string(), "nfs".to_string())]),
                ..AnalyzerConfig::default()
            });

        let result = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap();

        assert!(result.updated_files.iter().all(|f| f.direct_link.starts_with("nfs://nas/")));
    }

    #[tokio::test]
    async fn test_list_failure_is_fatal() {
        let catalog = TestCatalog::new().await;
        catalog
            .sqlite()
            .db()
            .execute(|conn| {
                conn.execute("DROP TABLE files", [])?;
                Ok(())
            })
            .await
            .unwrap();
        let analyzer = analyzer(&catalog, ScriptedMetadata::no_match()).await;

        let err = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::ListFiles));
        assert_eq!(err.error_type(), "DatabaseError");
    }

    #[tokio::test]
    async fn test_quality_requires_media_type() {
        let catalog = TestCatalog::new().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::no_match()).await;
        let mut item = media_item("Heat");
        item.media_type = None;

        let files = vec![catalog_file(1, "/m/Heat/heat.mkv", 10)];
        assert!(matches!(
            analyzer.analyze_quality(&item, &files),
            Err(CatalogError::ValidationError(_))
        ));
    }

    #[test]
    fn test_merge_never_overwrites() {
        let mut item = media_item("Heat");
        item.description = Some("Local description".into());
        let metadata = heat_metadata(item.id);

        assert!(merge_provider_details(&mut item, &metadata));
        assert_eq!(item.description.as_deref(), Some("Local description"));
        assert_eq!(item.runtime, Some(170));
        assert_eq!(item.cast_crew.director.as_deref(), Some("Michael Mann"));

        assert!(!merge_provider_details(&mut item, &metadata));
    }

    #[tokio::test]
    async fn test_refresh_fills_items_without_metadata() {
        let catalog = seeded_catalog().await;
        let first = analyzer(&catalog, ScriptedMetadata::no_match()).await;
        let item = first.analyze(MOVIE_DIR, "nas").await.unwrap().media_item.unwrap();
        assert!(catalog.sqlite().list_external_metadata(item.id).await.unwrap().is_empty());

        let refresher = analyzer(&catalog, ScriptedMetadata::matching("Heat")).await;
        let report = refresher
            .refresh_external_metadata(Duration::from_secs(86_400), 100)
            .await
            .unwrap();

        assert_eq!(
            report,
            RefreshReport {
                candidates: 1,
                refreshed: 1,
                unmatched: 0,
                failed: 0
            }
        );
        let stored = catalog.sqlite().list_external_metadata(item.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].external_id, "949");
        let enriched = catalog.sqlite().find_media_item(item.id).await.unwrap().unwrap();
        assert_eq!(enriched.director.as_deref(), Some("Michael Mann"));

        // freshly fetched, so nothing is due any more
        let again = refresher
            .refresh_external_metadata(Duration::from_secs(86_400), 100)
            .await
            .unwrap();
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn test_refresh_replaces_stale_metadata() {
        let catalog = seeded_catalog().await;
        let analyzer = analyzer(&catalog, ScriptedMetadata::matching("Heat")).await;
        let item = analyzer.analyze(MOVIE_DIR, "nas").await.unwrap().media_item.unwrap();

        let mut stale = catalog.sqlite().list_external_metadata(item.id).await.unwrap().remove(0);
        stale.last_fetched = Utc::now() - chrono::Duration::days(30);
        stale.rating = Some(1.0);
        catalog.sqlite().upsert_external_metadata(&stale).await.unwrap();

        let report = analyzer
            .refresh_external_metadata(Duration::from_secs(7 * 86_400), 100)
            .await
            .unwrap();

        assert_eq!(report.refreshed, 1);
        let stored = catalog.sqlite().list_external_metadata(item.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, stale.id);
        assert_eq!(stored[0].rating, Some(7.9));
        assert!(stored[0].last_fetched > stale.last_fetched);
    }

    #[tokio::test]
    async fn test_refresh_counts_failures_and_continues() {
        let catalog = seeded_catalog().await;
        catalog.seed(&[("/movies/Ronin (1998)/Ronin.1998.720p.mkv", 4_000_000_000)]).await;
        let setup = analyzer(&catalog, ScriptedMetadata::no_match()).await;
        setup.analyze(MOVIE_DIR, "nas").await.unwrap();
        setup.analyze("/movies/Ronin (1998)", "nas").await.unwrap();

        let failing = analyzer(&catalog, ScriptedMetadata::failing()).await;
        let report = failing
            .refresh_external_metadata(Duration::from_secs(3600), 100)
            .await
            .unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.failed, 2);

        let unmatched = analyzer(&catalog, ScriptedMetadata::no_match()).await;
        let report = unmatched
            .refresh_external_metadata(Duration::from_secs(3600), 1)
            .await
            .unwrap();
        assert_eq!(report.candidates, 1);
        assert_eq!(report.unmatched, 1);
    }
}
