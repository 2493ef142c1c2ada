//! Database models
//!
//! Data structures representing catalog tables. Structured columns
//! (analysis statistics, genres, cast, quality, provider payloads) are typed
//! here and stored as JSON text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::media_types::normalize_extension;

/// Raw file row produced by the share scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogFile {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub is_directory: bool,
    pub size: i64,
    pub last_modified: DateTime<Utc>,
    pub extension: Option<String>,
    pub mime_type: Option<String>,
    pub share_id: String,
}

impl CatalogFile {
    /// Lower-cased extension with leading dot, from the column or the file name
    pub fn normalized_extension(&self) -> Option<String> {
        match self.extension.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(ext) => Some(normalize_extension(ext)),
            None => extension_from_name(&self.name),
        }
    }
}

/// A directory known to the catalog, either a directory row or the parent of
/// a file row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogDirectory {
    pub share_id: String,
    pub directory_path: String,
}

/// Extension of a file name (`".mkv"`), lower-cased; `None` without a dot
pub fn extension_from_name(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.contains('/') {
        return None;
    }
    Some(normalize_extension(ext))
}

/// Statistics gathered while classifying a directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisData {
    #[serde(default)]
    pub matched_patterns: Vec<String>,
    /// Extension -> file count
    #[serde(default)]
    pub file_types: BTreeMap<String, i64>,
    /// Size bucket -> total bytes
    #[serde(default)]
    pub size_distribution: BTreeMap<String, i64>,
    #[serde(default)]
    pub quality_indicators: Vec<String>,
    #[serde(default)]
    pub filename_score: f64,
    #[serde(default)]
    pub structure_score: f64,
    #[serde(default)]
    pub metadata_score: f64,
}

impl AnalysisData {
    pub fn files_count(&self) -> i64 {
        self.file_types.values().sum()
    }

    pub fn total_size(&self) -> i64 {
        self.size_distribution.values().sum()
    }
}

/// Classification record for one directory on one share
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryAnalysis {
    pub id: i64,
    pub directory_path: String,
    pub share_id: String,
    pub media_item_id: Option<i64>,
    pub confidence_score: f64,
    pub detection_method: String,
    pub analysis_data: AnalysisData,
    pub last_analyzed: DateTime<Utc>,
    pub files_count: i64,
    pub total_size: i64,
}

/// Media type row (movie, tv_show, music, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaType {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub order: i32,
}

/// People attached to a media item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CastCrew {
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub writers: Vec<String>,
    #[serde(default)]
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub producers: Vec<String>,
    #[serde(default)]
    pub musicians: Vec<String>,
    #[serde(default)]
    pub developers: Vec<String>,
}

/// Catalog entry a directory resolves to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    pub media_type_id: i64,
    #[serde(default)]
    pub media_type: Option<MediaType>,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    #[serde(default)]
    pub genre: Vec<String>,
    pub director: Option<String>,
    #[serde(default)]
    pub cast_crew: CastCrew,
    pub rating: Option<f64>,
    pub runtime: Option<i32>,
    pub language: Option<String>,
    pub country: Option<String>,
    pub status: String, // 'active', 'archived'
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Fields of a media item known before it is inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewMediaItem {
    pub media_type_id: i64,
    pub title: String,
    pub year: Option<i32>,
}

/// Normalized payload returned by a provider's details call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderDetails {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub original_title: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub release_year: Option<i32>,
    #[serde(default)]
    pub runtime: Option<i32>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub director: Option<String>,
    #[serde(default)]
    pub cast: Vec<Actor>,
    /// Untouched provider response
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Provider-sourced record for a media item, one per provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMetadata {
    pub id: i64,
    pub media_item_id: i64,
    pub provider: String,
    pub external_id: String,
    pub data: ProviderDetails,
    pub rating: Option<f64>,
    pub review_url: Option<String>,
    pub cover_url: Option<String>,
    pub trailer_url: Option<String>,
    pub last_fetched: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn display_name(&self) -> &'static str {
        match self.width {
            w if w >= 3840 => "4K/UHD",
            w if w >= 1920 => "1080p",
            w if w >= 1280 => "720p",
            w if w >= 720 => "480p/DVD",
            _ => "Low Quality",
        }
    }
}

/// Output of the filename quality heuristic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityInfo {
    pub resolution: Option<Resolution>,
    pub quality_profile: Option<String>,
    pub quality_score: i32,
    pub source: Option<String>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub hdr: bool,
}

impl QualityInfo {
    pub fn is_better_than(&self, other: &QualityInfo) -> bool {
        self.quality_score > other.quality_score
    }

    pub fn display_name(&self) -> String {
        if let Some(profile) = &self.quality_profile {
            return profile.clone();
        }
        match &self.resolution {
            Some(resolution) => resolution.display_name().to_string(),
            None => "Unknown".to_string(),
        }
    }
}

/// A file linked to a media item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFile {
    pub id: i64,
    pub media_item_id: i64,
    pub file_path: String,
    pub share_id: String,
    pub filename: String,
    pub file_size: i64,
    pub file_extension: Option<String>,
    pub quality_info: QualityInfo,
    pub direct_link: String,
    pub virtual_link: String,
    pub last_verified: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_from_name() {
        assert_eq!(extension_from_name("Movie.2020.MKV"), Some(".mkv".to_string()));
        assert_eq!(extension_from_name("archive.tar.gz"), Some(".gz".to_string()));
        assert_eq!(extension_from_name("README"), None);
        assert_eq!(extension_from_name(".hidden"), None);
        assert_eq!(extension_from_name("trailing."), None);
    }

    #[test]
    fn test_analysis_data_totals() {
        let mut data = AnalysisData::default();
        data.file_types.insert(".mkv".into(), 3);
        data.file_types.insert(".srt".into(), 2);
        data.size_distribution.insert("large".into(), 4_000_000_000);
        data.size_distribution.insert("tiny".into(), 2_000);

        assert_eq!(data.files_count(), 5);
        assert_eq!(data.total_size(), 4_000_002_000);
    }

    #[test]
    fn test_quality_display_name() {
        let mut quality = QualityInfo::default();
        assert_eq!(quality.display_name(), "Unknown");

        quality.resolution = Some(Resolution { width: 1280, height: 720 });
        assert_eq!(quality.display_name(), "720p");

        quality.resolution = Some(Resolution { width: 640, height: 360 });
        assert_eq!(quality.display_name(), "Low Quality");

        quality.quality_profile = Some("Audio_Lossless".into());
        assert_eq!(quality.display_name(), "Audio_Lossless");
    }

    #[test]
    fn test_analysis_data_tolerates_missing_fields() {
        let data: AnalysisData =
            serde_json::from_str(r#"{"matched_patterns":["*.mkv"]}"#).unwrap();
        assert_eq!(data.matched_patterns, vec!["*.mkv".to_string()]);
        assert!(data.file_types.is_empty());
    }
}
