//! Rule-based media type detection
//!
//! A directory is classified by running every enabled rule against its file
//! listing. Each rule yields a confidence in `0..=1`, scaled by the rule's
//! weight; the most confident result wins. Rules ship built in and can be
//! replaced from a TOML file.

use chrono::{Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::error::{CatalogError, Result};
use crate::core::media_types::normalize_extension;
use crate::db::models::{AnalysisData, CatalogFile, MediaType};

lazy_static! {
    static ref YEAR_REGEX: Regex = Regex::new(r"\((\d{4})\)|\[(\d{4})\]|(\d{4})").unwrap();
    static ref RELEASE_TOKENS: Regex = Regex::new(concat!(
        r"(?i)\b(bluray|brrip|dvdrip|webrip|hdtv|720p|1080p|4k|x264|x265|h264|h265",
        r"|aac|dts|ac3|complete|season|series)\b",
    ))
    .unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"[._\-\s]+").unwrap();
}

/// Quality hint label and the substrings that imply it
const QUALITY_HINTS: &[(&str, &[&str])] = &[
    ("4K", &["4k", "uhd", "2160p"]),
    ("1080p", &["1080p", "fullhd", "fhd"]),
    ("720p", &["720p", "hd"]),
    ("BluRay", &["bluray", "brrip", "bd"]),
    ("WEB-DL", &["webdl", "web-dl", "webrip"]),
    ("HDR", &["hdr", "hdr10", "dolby.vision"]),
    ("Lossless", &["flac", "lossless", "dts-hd"]),
    ("Remux", &["remux"]),
];

/// Classification of a directory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResult {
    pub media_type: MediaType,
    pub confidence: f64,
    pub method: String,
    pub matched_patterns: Vec<String>,
    pub suggested_title: String,
    pub suggested_year: Option<i32>,
    pub quality_hints: Vec<String>,
    pub analysis_data: AnalysisData,
}

/// Turns a directory listing into a media type classification.
/// `Ok(None)` means the directory could not be classified.
pub trait DirectoryClassifier: Send + Sync {
    fn classify(&self, directory_path: &str, files: &[CatalogFile])
        -> Result<Option<DetectionResult>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeBand {
    pub min_size: i64,
    pub max_size: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructurePattern {
    /// Sub-directory name fragments, +0.3 each when present
    #[serde(default)]
    pub required_dirs: Vec<String>,
    /// Extension -> minimum file count, +0.2 each when met
    #[serde(default)]
    pub file_types: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPattern {
    /// Named size bands, +0.2 each when any file falls inside
    #[serde(default)]
    pub size_patterns: BTreeMap<String, SizeBand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePattern {
    FilenamePattern {
        globs: Vec<String>,
    },
    DirectoryStructure(StructurePattern),
    FileAnalysis(ContentPattern),
    Hybrid {
        #[serde(default)]
        filename: Option<Vec<String>>,
        #[serde(default)]
        structure: Option<StructurePattern>,
        #[serde(default)]
        content: Option<ContentPattern>,
    },
}

impl RulePattern {
    pub fn method(&self) -> &'static str {
        match self {
            RulePattern::FilenamePattern { .. } => "filename_pattern",
            RulePattern::DirectoryStructure(_) => "directory_structure",
            RulePattern::FileAnalysis(_) => "file_analysis",
            RulePattern::Hybrid { .. } => "hybrid",
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// A detection rule as written in a rules file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRule {
    pub name: String,
    /// Media type name, e.g. `"movie"`
    pub media_type: String,
    pub pattern: RulePattern,
    #[serde(default = "default_weight")]
    pub confidence_weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<DetectionRule>,
}

impl DetectionRule {
    fn new(name: &str, media_type: &str, priority: i32, weight: f64, pattern: RulePattern) -> Self {
        Self {
            name: name.to_string(),
            media_type: media_type.to_string(),
            pattern,
            confidence_weight: weight,
            enabled: true,
            priority,
        }
    }

    /// Rules used when no rules file is configured
    pub fn defaults() -> Vec<DetectionRule> {
        let globs = |list: &[&str]| RulePattern::FilenamePattern {
            globs: list.iter().map(|g| g.to_string()).collect(),
        };
        vec![
            DetectionRule::new("tv_episode_names", "tv_show", 30, 1.0, globs(&["*s??e??*"])),
            DetectionRule::new(
                "tv_season_dirs",
                "tv_show",
                25,
                0.9,
                RulePattern::DirectoryStructure(StructurePattern {
                    required_dirs: vec!["season".to_string()],
                    file_types: BTreeMap::from([(".mkv".to_string(), 2), (".mp4".to_string(), 2)]),
                }),
            ),
            DetectionRule::new("audiobook_files", "audiobook", 25, 1.0, globs(&["*.m4b"])),
            DetectionRule::new(
                "movie_feature",
                "movie",
                20,
                1.0,
                RulePattern::Hybrid {
                    filename: Some(vec!["*.mkv".into(), "*.mp4".into(), "*.avi".into()]),
                    structure: Some(StructurePattern {
                        required_dirs: vec!["extras".into(), "featurettes".into(), "subs".into()],
                        file_types: BTreeMap::new(),
                    }),
                    content: Some(ContentPattern {
                        size_patterns: BTreeMap::from([(
                            "feature".to_string(),
                            SizeBand {
                                min_size: 700 * 1024 * 1024,
                                max_size: 200 * 1024 * 1024 * 1024,
                            },
                        )]),
                    }),
                },
            ),
            DetectionRule::new(
                "movie_video_files",
                "movie",
                15,
                0.75,
                globs(&["*.mkv", "*.mp4", "*.avi"]),
            ),
            DetectionRule::new("music_tracks", "music", 15, 1.0, globs(&["*.flac", "*.mp3"])),
            DetectionRule::new("comic_archives", "comic", 15, 1.0, globs(&["*.cbz", "*.cbr"])),
            DetectionRule::new(
                "game_roms",
                "game",
                10,
                1.0,
                globs(&["*.nes", "*.sfc", "*.gba", "*.nds"]),
            ),
            DetectionRule::new(
                "software_installers",
                "software",
                10,
                0.8,
                globs(&["*.exe", "*.msi", "*.dmg"]),
            ),
            DetectionRule::new(
                "training_course",
                "training",
                5,
                1.0,
                RulePattern::DirectoryStructure(StructurePattern {
                    required_dirs: vec!["lesson".into(), "module".into(), "lecture".into()],
                    file_types: BTreeMap::new(),
                }),
            ),
        ]
    }

    /// Parse rules from TOML text (`[[rules]]` tables)
    pub fn parse_toml(text: &str) -> Result<Vec<DetectionRule>> {
        let file: RulesFile = toml::from_str(text)
            .map_err(|e| CatalogError::ConfigError(format!("Invalid detection rules: {}", e)))?;
        Ok(file.rules)
    }

    pub fn load_file(path: &Path) -> Result<Vec<DetectionRule>> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_toml(&text)
    }
}

/// Glob (`*`, `?`) to a case-insensitive, anchored regex
fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("(?i)^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| CatalogError::ConfigError(format!("Invalid glob '{}': {}", glob, e)))
}

struct CompiledGlobs(Vec<(String, Regex)>);

impl CompiledGlobs {
    fn compile(globs: &[String]) -> Result<Self> {
        globs
            .iter()
            .map(|g| glob_to_regex(g).map(|re| (g.clone(), re)))
            .collect::<Result<Vec<_>>>()
            .map(CompiledGlobs)
    }

    /// Share of globs that match at least one file name
    fn score(&self, files: &[CatalogFile]) -> (f64, Vec<String>) {
        if files.is_empty() || self.0.is_empty() {
            return (0.0, Vec::new());
        }
        let matched: Vec<String> = self
            .0
            .iter()
            .filter(|(_, re)| files.iter().any(|f| re.is_match(&f.name)))
            .map(|(glob, _)| glob.clone())
            .collect();
        let confidence = (matched.len() as f64 / self.0.len() as f64).min(1.0);
        (confidence, matched)
    }
}

impl StructurePattern {
    fn score(&self, files: &[CatalogFile]) -> (f64, Vec<String>) {
        let mut confidence = 0.0;
        let mut matched = Vec::new();

        for dir in &self.required_dirs {
            let needle = dir.to_lowercase();
            if files
                .iter()
                .any(|f| f.is_directory && f.name.to_lowercase().contains(&needle))
            {
                confidence += 0.3;
                matched.push(format!("dir:{}", dir));
            }
        }

        for (ext, min_count) in &self.file_types {
            let ext = normalize_extension(ext);
            let count = files
                .iter()
                .filter(|f| {
                    !f.is_directory && f.normalized_extension().as_deref() == Some(ext.as_str())
                })
                .count();
            if count >= *min_count {
                confidence += 0.2;
                matched.push(format!("filetype:{}", ext));
            }
        }

        (f64::min(confidence, 1.0), matched)
    }
}

impl ContentPattern {
    fn score(&self, files: &[CatalogFile]) -> (f64, Vec<String>) {
        let mut confidence = 0.0;
        let mut matched = Vec::new();
        for (label, band) in &self.size_patterns {
            if files
                .iter()
                .any(|f| !f.is_directory && f.size >= band.min_size && f.size <= band.max_size)
            {
                confidence += 0.2;
                matched.push(format!("size:{}", label));
            }
        }
        (f64::min(confidence, 1.0), matched)
    }
}

enum CompiledPattern {
    Filename(CompiledGlobs),
    Structure(StructurePattern),
    Content(ContentPattern),
    Hybrid {
        filename: Option<CompiledGlobs>,
        structure: Option<StructurePattern>,
        content: Option<ContentPattern>,
    },
}

impl CompiledPattern {
    fn compile(pattern: &RulePattern) -> Result<Self> {
        Ok(match pattern {
            RulePattern::FilenamePattern { globs } => {
                CompiledPattern::Filename(CompiledGlobs::compile(globs)?)
            }
            RulePattern::DirectoryStructure(s) => CompiledPattern::Structure(s.clone()),
            RulePattern::FileAnalysis(c) => CompiledPattern::Content(c.clone()),
            RulePattern::Hybrid {
                filename,
                structure,
                content,
            } => CompiledPattern::Hybrid {
                filename: filename.as_deref().map(CompiledGlobs::compile).transpose()?,
                structure: structure.clone(),
                content: content.clone(),
            },
        })
    }

    fn score(&self, files: &[CatalogFile]) -> (f64, Vec<String>) {
        match self {
            CompiledPattern::Filename(globs) => globs.score(files),
            CompiledPattern::Structure(s) => s.score(files),
            CompiledPattern::Content(c) => c.score(files),
            CompiledPattern::Hybrid {
                filename,
                structure,
                content,
            } => {
                let mut total = 0.0;
                let mut matched = Vec::new();
                if let Some(globs) = filename {
                    let (c, p) = globs.score(files);
                    total += c * 0.4;
                    matched.extend(p);
                }
                if let Some(s) = structure {
                    let (c, p) = s.score(files);
                    total += c * 0.3;
                    matched.extend(p);
                }
                if let Some(content) = content {
                    let (c, p) = content.score(files);
                    total += c * 0.3;
                    matched.extend(p);
                }
                (total, matched)
            }
        }
    }
}

struct CompiledRule {
    name: String,
    media_type: MediaType,
    method: &'static str,
    weight: f64,
    pattern: CompiledPattern,
}

/// Rule-driven classifier
pub struct DetectionEngine {
    rules: Vec<CompiledRule>,
    min_confidence: f64,
}

impl DetectionEngine {
    /// Compile `rules` against the known media types. Disabled rules are
    /// dropped; a rule naming an unknown media type is a configuration error.
    pub fn new(mut rules: Vec<DetectionRule>, media_types: &[MediaType]) -> Result<Self> {
        let by_name: HashMap<&str, &MediaType> =
            media_types.iter().map(|t| (t.name.as_str(), t)).collect();

        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules.into_iter().filter(|r| r.enabled) {
            let media_type = by_name.get(rule.media_type.as_str()).ok_or_else(|| {
                CatalogError::ConfigError(format!(
                    "Detection rule '{}' references unknown media type '{}'",
                    rule.name, rule.media_type
                ))
            })?;
            if !(0.0..=1.0).contains(&rule.confidence_weight) {
                return Err(CatalogError::ConfigError(format!(
                    "Detection rule '{}' has confidence weight {} outside 0..=1",
                    rule.name, rule.confidence_weight
                )));
            }
            compiled.push(CompiledRule {
                method: rule.pattern.method(),
                pattern: CompiledPattern::compile(&rule.pattern)?,
                name: rule.name,
                media_type: (*media_type).clone(),
                weight: rule.confidence_weight,
            });
        }

        info!(
            rules_count = compiled.len(),
            media_types = media_types.len(),
            "Detection rules loaded"
        );

        Ok(Self {
            rules: compiled,
            min_confidence: 0.1,
        })
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Run every rule and keep the most confident result. Earlier (higher
    /// priority) rules win ties.
    pub fn detect(&self, directory_path: &str, files: &[CatalogFile]) -> Option<DetectionResult> {
        let mut best: Option<(&CompiledRule, f64, Vec<String>)> = None;

        for rule in &self.rules {
            let (raw, matched) = rule.pattern.score(files);
            if raw <= 0.0 {
                continue;
            }
            let confidence = (raw * rule.weight).clamp(0.0, 1.0);
            debug!(rule = %rule.name, confidence, "Detection rule matched");
            if best.as_ref().map_or(true, |(_, c, _)| confidence > *c) {
                best = Some((rule, confidence, matched));
            }
        }

        let (rule, confidence, matched) = best?;
        let (suggested_title, suggested_year) = extract_title_and_year(directory_path);
        let quality_hints = extract_quality_hints(directory_path, files);

        let result = DetectionResult {
            media_type: rule.media_type.clone(),
            confidence,
            method: rule.method.to_string(),
            analysis_data: build_analysis_data(files, &matched, &quality_hints, confidence),
            matched_patterns: matched,
            suggested_title,
            suggested_year,
            quality_hints,
        };

        if self.validate(&result) {
            Some(result)
        } else {
            debug!(
                directory = %directory_path,
                confidence = result.confidence,
                "Discarding low-confidence detection"
            );
            None
        }
    }

    /// A result is usable when it clears the confidence floor and matched something
    pub fn validate(&self, result: &DetectionResult) -> bool {
        result.confidence >= self.min_confidence && !result.matched_patterns.is_empty()
    }
}

impl DirectoryClassifier for DetectionEngine {
    fn classify(
        &self,
        directory_path: &str,
        files: &[CatalogFile],
    ) -> Result<Option<DetectionResult>> {
        if self.rules.is_empty() {
            warn!("Detection engine has no enabled rules");
        }
        Ok(self.detect(directory_path, files))
    }
}

fn base_name(directory_path: &str) -> &str {
    directory_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(directory_path)
}

/// Title and release year from the directory's base name.
///
/// The last plausible year (1901..=now+5) wins; `(1999)` and `[1999]` are
/// accepted as well as a bare `1999`. Release tokens are stripped and
/// separators collapsed to single spaces.
pub fn extract_title_and_year(directory_path: &str) -> (String, Option<i32>) {
    let name = base_name(directory_path);
    let max_year = Utc::now().year() + 5;

    let year_match = YEAR_REGEX
        .captures_iter(name)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let digits = caps.iter().skip(1).flatten().next()?;
            let year: i32 = digits.as_str().parse().ok()?;
            (year > 1900 && year <= max_year).then_some((whole.range(), year))
        })
        .last();

    let mut title = name.to_string();
    let year = year_match.map(|(range, year)| {
        title.replace_range(range, " ");
        year
    });

    let title = RELEASE_TOKENS.replace_all(&title, " ");
    let title = SEPARATORS.replace_all(&title, " ");
    (title.trim().to_string(), year)
}

fn extract_quality_hints(directory_path: &str, files: &[CatalogFile]) -> Vec<String> {
    let mut text = directory_path.to_lowercase();
    for file in files {
        text.push(' ');
        text.push_str(&file.name.to_lowercase());
    }
    QUALITY_HINTS
        .iter()
        .filter(|(_, needles)| needles.iter().any(|n| text.contains(n)))
        .map(|(label, _)| label.to_string())
        .collect()
}

fn size_bucket(size: i64) -> &'static str {
    const MB: i64 = 1024 * 1024;
    const GB: i64 = 1024 * MB;
    match size {
        s if s > 10 * GB => "very_large",
        s if s > GB => "large",
        s if s > 100 * MB => "medium",
        s if s > 10 * MB => "small",
        _ => "tiny",
    }
}

fn build_analysis_data(
    files: &[CatalogFile],
    matched: &[String],
    quality_hints: &[String],
    confidence: f64,
) -> AnalysisData {
    let mut data = AnalysisData {
        matched_patterns: matched.to_vec(),
        quality_indicators: quality_hints.to_vec(),
        filename_score: confidence * 0.4,
        structure_score: confidence * 0.3,
        metadata_score: confidence * 0.3,
        ..Default::default()
    };
    for file in files.iter().filter(|f| !f.is_directory) {
        if let Some(ext) = file.normalized_extension() {
            *data.file_types.entry(ext).or_insert(0) += 1;
        }
        *data
            .size_distribution
            .entry(size_bucket(file.size).to_string())
            .or_insert(0) += file.size;
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::media_types::SEEDED_MEDIA_TYPES;

    const GB: i64 = 1024 * 1024 * 1024;

    fn media_types() -> Vec<MediaType> {
        SEEDED_MEDIA_TYPES
            .iter()
            .enumerate()
            .map(|(i, (name, desc))| MediaType {
                id: i as i64 + 1,
                name: name.to_string(),
                description: Some(desc.to_string()),
            })
            .collect()
    }

    fn file(name: &str, size: i64) -> CatalogFile {
        CatalogFile {
            id: 0,
            name: name.to_string(),
            path: format!("/share/dir/{}", name),
            is_directory: false,
            size,
            last_modified: Utc::now(),
            extension: None,
            mime_type: None,
            share_id: "nas".to_string(),
        }
    }

    fn dir(name: &str) -> CatalogFile {
        CatalogFile {
            is_directory: true,
            ..file(name, 0)
        }
    }

    fn engine() -> DetectionEngine {
        DetectionEngine::new(DetectionRule::defaults(), &media_types()).unwrap()
    }

    #[test]
    fn test_glob_to_regex_escapes_dots() {
        let re = glob_to_regex("*.mkv").unwrap();
        assert!(re.is_match("Heat.MKV"));
        assert!(!re.is_match("Heat_mkv"));
        assert!(glob_to_regex("*s??e??*").unwrap().is_match("show.S01E02.mkv"));
    }

    #[test]
    fn test_detects_movie() {
        let files = vec![
            dir("Extras"),
            file("Heat.1995.1080p.BluRay.x264.mkv", 9 * GB),
            file("Heat.srt", 80_000),
        ];
        let result = engine().detect("/movies/Heat (1995) 1080p", &files).unwrap();

        assert_eq!(result.media_type.name, "movie");
        assert_eq!(result.method, "hybrid");
        assert_eq!(result.suggested_title, "Heat");
        assert_eq!(result.suggested_year, Some(1995));
        assert!(result.quality_hints.contains(&"1080p".to_string()));
        assert!(result.quality_hints.contains(&"BluRay".to_string()));
        assert_eq!(result.analysis_data.files_count(), 2);
        assert_eq!(result.analysis_data.total_size(), 9 * GB + 80_000);
    }

    #[test]
    fn test_episode_names_beat_plain_video() {
        let files = vec![file("Show.S01E01.mkv", GB), file("Show.S01E02.mkv", GB)];
        let result = engine().detect("/tv/Show", &files).unwrap();
        assert_eq!(result.media_type.name, "tv_show");
        assert_eq!(result.method, "filename_pattern");
        assert!((result.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_files_is_unclassified() {
        assert!(engine().detect("/empty", &[]).is_none());
        assert!(engine().detect("/notes", &[file("readme.txt", 10)]).is_none());
    }

    #[test]
    fn test_min_confidence_discards_weak_results() {
        let engine = engine().with_min_confidence(0.95);
        let files = vec![file("track01.flac", 30_000_000)];
        assert!(engine.detect("/music/Album", &files).is_none());
    }

    #[test]
    fn test_weight_scales_confidence() {
        let rules = vec![DetectionRule::new(
            "iso",
            "software",
            1,
            0.5,
            RulePattern::FilenamePattern { globs: vec!["*.iso".into()] },
        )];
        let engine = DetectionEngine::new(rules, &media_types()).unwrap();
        let result = engine.detect("/apps/Tool", &[file("tool.iso", GB)]).unwrap();
        assert!((result.confidence - 0.5).abs() < 1e-9);
        assert!((result.analysis_data.filename_score - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_media_type_rejected() {
        let rules = vec![DetectionRule::new(
            "bad",
            "hologram",
            1,
            1.0,
            RulePattern::FilenamePattern { globs: vec!["*".into()] },
        )];
        assert!(matches!(
            DetectionEngine::new(rules, &media_types()),
            Err(CatalogError::ConfigError(_))
        ));
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let mut rules = DetectionRule::defaults();
        for rule in &mut rules {
            rule.enabled = rule.media_type != "music";
        }
        let enabled = rules.iter().filter(|r| r.enabled).count();
        let engine = DetectionEngine::new(rules, &media_types()).unwrap();
        assert_eq!(engine.rule_count(), enabled);
        assert!(engine.detect("/music/Album", &[file("01.flac", 30_000_000)]).is_none());
    }

    #[test]
    fn test_parse_rules_toml() {
        let text = r#"
            [[rules]]
            name = "season_dirs"
            media_type = "tv_show"
            priority = 3

            [rules.pattern]
            type = "directory_structure"
            required_dirs = ["season"]

            [rules.pattern.file_types]
            ".mkv" = 2

            [[rules]]
            name = "flac"
            media_type = "music"
            confidence_weight = 0.7
            enabled = false

            [rules.pattern]
            type = "filename_pattern"
            globs = ["*.flac"]
        "#;
        let rules = DetectionRule::parse_toml(text).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].confidence_weight, 1.0);
        assert!(rules[0].enabled);
        assert_eq!(
            rules[0].pattern,
            RulePattern::DirectoryStructure(StructurePattern {
                required_dirs: vec!["season".into()],
                file_types: BTreeMap::from([(".mkv".to_string(), 2)]),
            })
        );
        assert!(!rules[1].enabled);

        assert!(DetectionRule::parse_toml("[[rules]]\nname = 1").is_err());
    }

    #[test]
    fn test_extract_title_and_year() {
        assert_eq!(
            extract_title_and_year("/movies/The.Matrix.1999.1080p.BluRay.x264"),
            ("The Matrix".to_string(), Some(1999))
        );
        assert_eq!(
            extract_title_and_year("/movies/2001 A Space Odyssey (1968)/"),
            ("2001 A Space Odyssey".to_string(), Some(1968))
        );
        assert_eq!(
            extract_title_and_year("/tv/Show [2015] Complete Season 1"),
            ("Show 1".to_string(), Some(2015))
        );
        assert_eq!(
            extract_title_and_year("/misc/Untitled_Project"),
            ("Untitled Project".to_string(), None)
        );
        assert_eq!(extract_title_and_year("/misc/Log 1850"), ("Log 1850".to_string(), None));
    }

    #[test]
    fn test_size_buckets() {
        assert_eq!(size_bucket(0), "tiny");
        assert_eq!(size_bucket(50 * 1024 * 1024), "small");
        assert_eq!(size_bucket(500 * 1024 * 1024), "medium");
        assert_eq!(size_bucket(4 * GB), "large");
        assert_eq!(size_bucket(40 * GB), "very_large");
    }
}
