//! Catalog persistence
//!
//! `CatalogStore` is the seam the analysis pipeline writes through;
//! `SqliteCatalogStore` implements it over the pooled SQLite database.

use crate::core::error::{CatalogError, Result};
use crate::db::manager::DatabaseManager;
use crate::db::models::{
    CatalogDirectory, CatalogFile, DirectoryAnalysis, ExternalMetadata, MediaFile, MediaItem,
    MediaType, NewMediaItem,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

/// Storage operations used by the analysis pipeline. Every write is a
/// single-row upsert; there are no multi-row transactions.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Files below `directory_path` on `share_id`, directories first, then by name
    async fn list_files(&self, directory_path: &str, share_id: &str) -> Result<Vec<CatalogFile>>;

    /// Insert or update the analysis keyed by (directory_path, share_id).
    /// An existing `media_item_id` is kept when the new record has none.
    async fn upsert_directory_analysis(&self, analysis: &DirectoryAnalysis)
        -> Result<DirectoryAnalysis>;

    /// Point a directory analysis at its media item
    async fn link_media_item(&self, analysis_id: i64, media_item_id: i64) -> Result<()>;

    /// Load a media item with its media type
    async fn find_media_item(&self, id: i64) -> Result<Option<MediaItem>>;

    /// Insert an active media item
    async fn create_media_item(&self, item: &NewMediaItem) -> Result<MediaItem>;

    /// Bump `last_updated` without ever moving it backwards
    async fn touch_media_item(&self, id: i64) -> Result<MediaItem>;

    /// Overwrite the descriptive fields of a media item
    async fn update_media_item(&self, item: &MediaItem) -> Result<()>;

    /// Insert or replace the record keyed by (media_item_id, provider)
    async fn upsert_external_metadata(&self, metadata: &ExternalMetadata)
        -> Result<ExternalMetadata>;

    /// Insert or update the file keyed by (media_item_id, file_path)
    async fn upsert_media_file(&self, file: &MediaFile) -> Result<MediaFile>;

    /// Every distinct directory on every share, ordered by share then path
    async fn list_catalog_directories(&self) -> Result<Vec<CatalogDirectory>>;

    /// Typed media items with no metadata fetched since `fetched_before`, or
    /// with a record older than it; most recently updated first
    async fn list_media_items_for_refresh(
        &self,
        fetched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MediaItem>>;
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Path prefix shared by everything below a directory. Matched with
/// `substr` rather than `LIKE`, which folds ASCII case.
fn descendant_prefix(directory_path: &str) -> String {
    format!("{}/", directory_path.trim_end_matches('/'))
}

const FILE_COLUMNS: &str =
    "id, name, path, is_directory, size, last_modified, extension, mime_type, share_id";

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<CatalogFile> {
    Ok(CatalogFile {
        id: row.get(0)?,
        name: row.get(1)?,
        path: row.get(2)?,
        is_directory: row.get(3)?,
        size: row.get(4)?,
        last_modified: timestamp_column(row, 5)?,
        extension: row.get(6)?,
        mime_type: row.get(7)?,
        share_id: row.get(8)?,
    })
}

const ANALYSIS_COLUMNS: &str = "id, directory_path, share_id, media_item_id, confidence_score, \
     detection_method, analysis_data, last_analyzed, files_count, total_size";

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<DirectoryAnalysis> {
    Ok(DirectoryAnalysis {
        id: row.get(0)?,
        directory_path: row.get(1)?,
        share_id: row.get(2)?,
        media_item_id: row.get(3)?,
        confidence_score: row.get(4)?,
        detection_method: row.get(5)?,
        analysis_data: json_column(row, 6)?,
        last_analyzed: timestamp_column(row, 7)?,
        files_count: row.get(8)?,
        total_size: row.get(9)?,
    })
}

const MEDIA_ITEM_SELECT: &str = "SELECT mi.id, mi.media_type_id, mi.title, mi.original_title, \
     mi.year, mi.description, mi.genre, mi.director, mi.cast_crew, mi.rating, mi.runtime, \
     mi.language, mi.country, mi.status, mi.first_detected, mi.last_updated, \
     mt.id, mt.name, mt.description \
     FROM media_items mi LEFT JOIN media_types mt ON mt.id = mi.media_type_id";

fn media_item_from_row(row: &Row<'_>) -> rusqlite::Result<MediaItem> {
    let media_type = match row.get::<_, Option<i64>>(16)? {
        Some(id) => Some(MediaType {
            id,
            name: row.get(17)?,
            description: row.get(18)?,
        }),
        None => None,
    };
    Ok(MediaItem {
        id: row.get(0)?,
        media_type_id: row.get(1)?,
        media_type,
        title: row.get(2)?,
        original_title: row.get(3)?,
        year: row.get(4)?,
        description: row.get(5)?,
        genre: json_column(row, 6)?,
        director: row.get(7)?,
        cast_crew: json_column(row, 8)?,
        rating: row.get(9)?,
        runtime: row.get(10)?,
        language: row.get(11)?,
        country: row.get(12)?,
        status: row.get(13)?,
        first_detected: timestamp_column(row, 14)?,
        last_updated: timestamp_column(row, 15)?,
    })
}

fn load_media_item(conn: &Connection, id: i64) -> Result<Option<MediaItem>> {
    Ok(conn
        .query_row(
            &format!("{} WHERE mi.id = ?", MEDIA_ITEM_SELECT),
            [id],
            media_item_from_row,
        )
        .optional()?)
}

const EXTERNAL_COLUMNS: &str = "id, media_item_id, provider, external_id, data, rating, \
     review_url, cover_url, trailer_url, last_fetched";

fn external_from_row(row: &Row<'_>) -> rusqlite::Result<ExternalMetadata> {
    Ok(ExternalMetadata {
        id: row.get(0)?,
        media_item_id: row.get(1)?,
        provider: row.get(2)?,
        external_id: row.get(3)?,
        data: json_column(row, 4)?,
        rating: row.get(5)?,
        review_url: row.get(6)?,
        cover_url: row.get(7)?,
        trailer_url: row.get(8)?,
        last_fetched: timestamp_column(row, 9)?,
    })
}

const MEDIA_FILE_COLUMNS: &str = "id, media_item_id, file_path, share_id, filename, file_size, \
     file_extension, quality_info, direct_link, virtual_link, last_verified, created_at";

fn media_file_from_row(row: &Row<'_>) -> rusqlite::Result<MediaFile> {
    Ok(MediaFile {
        id: row.get(0)?,
        media_item_id: row.get(1)?,
        file_path: row.get(2)?,
        share_id: row.get(3)?,
        filename: row.get(4)?,
        file_size: row.get(5)?,
        file_extension: row.get(6)?,
        quality_info: json_column(row, 7)?,
        direct_link: row.get(8)?,
        virtual_link: row.get(9)?,
        last_verified: timestamp_column(row, 10)?,
        created_at: timestamp_column(row, 11)?,
    })
}

/// SQLite-backed catalog store
pub struct SqliteCatalogStore {
    db: Arc<DatabaseManager>,
}

impl SqliteCatalogStore {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    /// Get a reference to the database manager
    pub fn db(&self) -> &Arc<DatabaseManager> {
        &self.db
    }

    /// Record a scanned file; returns the stored row
    pub async fn insert_file(&self, file: &CatalogFile) -> Result<CatalogFile> {
        let file = file.clone();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO files (name, path, is_directory, size, last_modified, extension, \
                     mime_type, share_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(share_id, path) DO UPDATE SET \
                     name = excluded.name, \
                     is_directory = excluded.is_directory, \
                     size = excluded.size, \
                     last_modified = excluded.last_modified, \
                     extension = excluded.extension, \
                     mime_type = excluded.mime_type",
                    params![
                        &file.name,
                        &file.path,
                        file.is_directory,
                        file.size,
                        format_timestamp(&file.last_modified),
                        &file.extension,
                        &file.mime_type,
                        &file.share_id,
                    ],
                )?;
                Ok(conn.query_row(
                    &format!("SELECT {} FROM files WHERE share_id = ? AND path = ?", FILE_COLUMNS),
                    params![&file.share_id, &file.path],
                    file_from_row,
                )?)
            })
            .await
    }

    pub async fn list_media_types(&self) -> Result<Vec<MediaType>> {
        self.db
            .execute(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, name, description FROM media_types ORDER BY id")?;
                let types = stmt
                    .query_map([], |row| {
                        Ok(MediaType {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(types)
            })
            .await
    }

    pub async fn find_directory_analysis(
        &self,
        directory_path: &str,
        share_id: &str,
    ) -> Result<Option<DirectoryAnalysis>> {
        let directory_path = directory_path.to_string();
        let share_id = share_id.to_string();
        self.db
            .execute(move |conn| {
                Ok(conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM directory_analysis \
                             WHERE directory_path = ? AND share_id = ?",
                            ANALYSIS_COLUMNS
                        ),
                        params![&directory_path, &share_id],
                        analysis_from_row,
                    )
                    .optional()?)
            })
            .await
    }

    pub async fn list_external_metadata(
        &self,
        media_item_id: i64,
    ) -> Result<Vec<ExternalMetadata>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM external_metadata WHERE media_item_id = ? ORDER BY provider",
                    EXTERNAL_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([media_item_id], external_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn list_media_files(&self, media_item_id: i64) -> Result<Vec<MediaFile>> {
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM media_files WHERE media_item_id = ? ORDER BY file_path",
                    MEDIA_FILE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([media_item_id], media_file_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn count_media_items(&self) -> Result<i64> {
        self.db
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM media_items", [], |row| row.get(0))?)
            })
            .await
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalogStore {
    async fn list_files(&self, directory_path: &str, share_id: &str) -> Result<Vec<CatalogFile>> {
        let prefix = descendant_prefix(directory_path);
        let prefix_len = prefix.chars().count() as i64;
        let share_id = share_id.to_string();
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM files \
                     WHERE substr(path, 1, ?1) = ?2 AND share_id = ?3 \
                     ORDER BY is_directory DESC, name ASC",
                    FILE_COLUMNS
                ))?;
                let files = stmt
                    .query_map(params![prefix_len, &prefix, &share_id], file_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(files)
            })
            .await
    }

    async fn upsert_directory_analysis(
        &self,
        analysis: &DirectoryAnalysis,
    ) -> Result<DirectoryAnalysis> {
        let analysis = analysis.clone();
        let data = to_json(&analysis.analysis_data)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO directory_analysis (directory_path, share_id, media_item_id, \
                     confidence_score, detection_method, analysis_data, last_analyzed, \
                     files_count, total_size) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(directory_path, share_id) DO UPDATE SET \
                     media_item_id = \
                     COALESCE(excluded.media_item_id, directory_analysis.media_item_id), \
                     confidence_score = excluded.confidence_score, \
                     detection_method = excluded.detection_method, \
                     analysis_data = excluded.analysis_data, \
                     last_analyzed = excluded.last_analyzed, \
                     files_count = excluded.files_count, \
                     total_size = excluded.total_size",
                    params![
                        &analysis.directory_path,
                        &analysis.share_id,
                        analysis.media_item_id,
                        analysis.confidence_score,
                        &analysis.detection_method,
                        &data,
                        format_timestamp(&analysis.last_analyzed),
                        analysis.files_count,
                        analysis.total_size,
                    ],
                )?;
                Ok(conn.query_row(
                    &format!(
                        "SELECT {} FROM directory_analysis \
                         WHERE directory_path = ? AND share_id = ?",
                        ANALYSIS_COLUMNS
                    ),
                    params![&analysis.directory_path, &analysis.share_id],
                    analysis_from_row,
                )?)
            })
            .await
    }

    async fn link_media_item(&self, analysis_id: i64, media_item_id: i64) -> Result<()> {
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE directory_analysis SET media_item_id = ? WHERE id = ?",
                    params![media_item_id, analysis_id],
                )?;
                if updated == 0 {
                    return Err(CatalogError::NotFound(format!(
                        "directory analysis {}",
                        analysis_id
                    )));
                }
                Ok(())
            })
            .await
    }

    async fn find_media_item(&self, id: i64) -> Result<Option<MediaItem>> {
        self.db.execute(move |conn| load_media_item(conn, id)).await
    }

    async fn create_media_item(&self, item: &NewMediaItem) -> Result<MediaItem> {
        let item = item.clone();
        self.db
            .execute(move |conn| {
                let now = format_timestamp(&Utc::now());
                conn.execute(
                    "INSERT INTO media_items \
                     (media_type_id, title, year, status, first_detected, last_updated) \
                     VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
                    params![item.media_type_id, &item.title, item.year, &now],
                )?;
                let id = conn.last_insert_rowid();
                load_media_item(conn, id)?
                    .ok_or_else(|| CatalogError::NotFound(format!("media item {}", id)))
            })
            .await
    }

    async fn touch_media_item(&self, id: i64) -> Result<MediaItem> {
        self.db
            .execute(move |conn| {
                let item = load_media_item(conn, id)?
                    .ok_or_else(|| CatalogError::NotFound(format!("media item {}", id)))?;
                let touched = Utc::now().trunc_subsecs(6).max(item.last_updated);
                conn.execute(
                    "UPDATE media_items SET last_updated = ? WHERE id = ?",
                    params![format_timestamp(&touched), id],
                )?;
                Ok(MediaItem {
                    last_updated: touched,
                    ..item
                })
            })
            .await
    }

    async fn update_media_item(&self, item: &MediaItem) -> Result<()> {
        let item = item.clone();
        let genre = to_json(&item.genre)?;
        let cast_crew = to_json(&item.cast_crew)?;
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE media_items SET title = ?1, original_title = ?2, year = ?3, \
                     description = ?4, \
                     genre = ?5, director = ?6, cast_crew = ?7, rating = ?8, runtime = ?9, \
                     language = ?10, country = ?11, status = ?12, last_updated = ?13 \
                     WHERE id = ?14",
                    params![
                        &item.title,
                        &item.original_title,
                        item.year,
                        &item.description,
                        &genre,
                        &item.director,
                        &cast_crew,
                        item.rating,
                        item.runtime,
                        &item.language,
                        &item.country,
                        &item.status,
                        format_timestamp(&item.last_updated),
                        item.id,
                    ],
                )?;
                if updated == 0 {
                    return Err(CatalogError::NotFound(format!("media item {}", item.id)));
                }
                Ok(())
            })
            .await
    }

    async fn upsert_external_metadata(
        &self,
        metadata: &ExternalMetadata,
    ) -> Result<ExternalMetadata> {
        let metadata = metadata.clone();
        let data = to_json(&metadata.data)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO external_metadata \
                     (media_item_id, provider, external_id, data, rating, \
                     review_url, cover_url, trailer_url, last_fetched) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
                     ON CONFLICT(media_item_id, provider) DO UPDATE SET \
                     external_id = excluded.external_id, \
                     data = excluded.data, \
                     rating = excluded.rating, \
                     review_url = excluded.review_url, \
                     cover_url = excluded.cover_url, \
                     trailer_url = excluded.trailer_url, \
                     last_fetched = excluded.last_fetched",
                    params![
                        metadata.media_item_id,
                        &metadata.provider,
                        &metadata.external_id,
                        &data,
                        metadata.rating,
                        &metadata.review_url,
                        &metadata.cover_url,
                        &metadata.trailer_url,
                        format_timestamp(&metadata.last_fetched),
                    ],
                )?;
                Ok(conn.query_row(
                    &format!(
                        "SELECT {} FROM external_metadata WHERE media_item_id = ? AND provider = ?",
                        EXTERNAL_COLUMNS
                    ),
                    params![metadata.media_item_id, &metadata.provider],
                    external_from_row,
                )?)
            })
            .await
    }

    async fn upsert_media_file(&self, file: &MediaFile) -> Result<MediaFile> {
        let file = file.clone();
        let quality = to_json(&file.quality_info)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO media_files (media_item_id, file_path, share_id, filename, \
                     file_size, file_extension, quality_info, direct_link, virtual_link, \
                     last_verified, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
                     ON CONFLICT(media_item_id, file_path) DO UPDATE SET \
                     share_id = excluded.share_id, \
                     filename = excluded.filename, \
                     file_size = excluded.file_size, \
                     file_extension = excluded.file_extension, \
                     quality_info = excluded.quality_info, \
                     direct_link = excluded.direct_link, \
                     virtual_link = excluded.virtual_link, \
                     last_verified = excluded.last_verified",
                    params![
                        file.media_item_id,
                        &file.file_path,
                        &file.share_id,
                        &file.filename,
                        file.file_size,
                        &file.file_extension,
                        &quality,
                        &file.direct_link,
                        &file.virtual_link,
                        format_timestamp(&file.last_verified),
                        format_timestamp(&file.created_at),
                    ],
                )?;
                Ok(conn.query_row(
                    &format!(
                        "SELECT {} FROM media_files WHERE media_item_id = ? AND file_path = ?",
                        MEDIA_FILE_COLUMNS
                    ),
                    params![file.media_item_id, &file.file_path],
                    media_file_from_row,
                )?)
            })
            .await
    }

    async fn list_catalog_directories(&self) -> Result<Vec<CatalogDirectory>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT share_id, directory_path FROM ( \
                         SELECT share_id, \
                         CASE WHEN is_directory = 1 THEN path \
                              ELSE substr(path, 1, length(path) - length(name) - 1) \
                         END AS directory_path \
                         FROM files \
                     ) WHERE directory_path != '' \
                     ORDER BY share_id, directory_path",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(CatalogDirectory {
                            share_id: row.get(0)?,
                            directory_path: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn list_media_items_for_refresh(
        &self,
        fetched_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<MediaItem>> {
        let cutoff = format_timestamp(&fetched_before);
        let limit = limit as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE mt.id IS NOT NULL AND ( \
                         mi.id NOT IN (SELECT media_item_id FROM external_metadata \
                                       WHERE last_fetched >= ?1) \
                         OR mi.id IN (SELECT media_item_id FROM external_metadata \
                                      WHERE last_fetched < ?1) \
                     ) ORDER BY mi.last_updated DESC, mi.id DESC LIMIT ?2",
                    MEDIA_ITEM_SELECT
                ))?;
                let items = stmt
                    .query_map(params![&cutoff, limit], media_item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await
    }
}
