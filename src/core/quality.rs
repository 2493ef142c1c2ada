//! Filename quality heuristic
//!
//! Scores a media file from its name alone: resolution, source, video and
//! audio codec, HDR, and an audio-format override. Matching is done on
//! lower-cased substrings, so the result is deterministic for a given input.

use crate::core::media_types::normalize_extension;
use crate::db::models::{extension_from_name, QualityInfo, Resolution};

struct ResolutionRule {
    needles: &'static [&'static str],
    width: u32,
    height: u32,
    score: i32,
    profile: &'static str,
}

/// Checked in order, first hit wins
const RESOLUTION_RULES: &[ResolutionRule] = &[
    ResolutionRule {
        needles: &["2160p", "4k", "uhd"],
        width: 3840,
        height: 2160,
        score: 100,
        profile: "4K/UHD",
    },
    ResolutionRule {
        needles: &["1080p", "fhd"],
        width: 1920,
        height: 1080,
        score: 80,
        profile: "1080p",
    },
    ResolutionRule {
        needles: &["720p", "hd"],
        width: 1280,
        height: 720,
        score: 60,
        profile: "720p",
    },
    ResolutionRule {
        needles: &["480p", "dvd"],
        width: 720,
        height: 480,
        score: 40,
        profile: "480p/DVD",
    },
];

/// (needles, label, bonus); first hit wins within each table
const SOURCE_RULES: &[(&[&str], &str, i32)] = &[
    (&["bluray", "brrip"], "BluRay", 10),
    (&["webdl", "web-dl"], "WEB-DL", 5),
    (&["webrip"], "WEB-RIP", 0),
];

const VIDEO_CODEC_RULES: &[(&[&str], &str, i32)] = &[
    (&["x265", "h265", "hevc"], "H.265/HEVC", 5),
    (&["x264", "h264", "avc"], "H.264/AVC", 0),
];

const AUDIO_CODEC_RULES: &[(&[&str], &str, i32)] = &[
    (&["dts"], "DTS", 5),
    (&["aac"], "AAC", 0),
    (&["ac3"], "AC3", 0),
];

const HDR_NEEDLES: &[&str] = &["hdr", "dolby.vision"];
const HDR_BONUS: i32 = 10;

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn first_match<'a>(haystack: &str, rules: &'a [(&[&str], &'a str, i32)]) -> Option<(&'a str, i32)> {
    rules
        .iter()
        .find(|(needles, _, _)| contains_any(haystack, needles))
        .map(|(_, label, bonus)| (*label, *bonus))
}

/// Score a file from its name and optional extension.
///
/// The extension may be given with or without a leading dot and in any case.
/// When it is `None` it is taken from the file name, if there is one.
pub fn score(filename: &str, extension: Option<&str>) -> QualityInfo {
    let lower = filename.to_lowercase();
    let mut quality = QualityInfo::default();

    if let Some(rule) = RESOLUTION_RULES
        .iter()
        .find(|rule| contains_any(&lower, rule.needles))
    {
        quality.resolution = Some(Resolution {
            width: rule.width,
            height: rule.height,
        });
        quality.quality_score = rule.score;
        quality.quality_profile = Some(rule.profile.to_string());
    }

    if let Some((source, bonus)) = first_match(&lower, SOURCE_RULES) {
        quality.source = Some(source.to_string());
        quality.quality_score += bonus;
    }

    if let Some((codec, bonus)) = first_match(&lower, VIDEO_CODEC_RULES) {
        quality.video_codec = Some(codec.to_string());
        quality.quality_score += bonus;
    }

    if let Some((codec, bonus)) = first_match(&lower, AUDIO_CODEC_RULES) {
        quality.audio_codec = Some(codec.to_string());
        quality.quality_score += bonus;
    }

    if contains_any(&lower, HDR_NEEDLES) {
        quality.hdr = true;
        quality.quality_score += HDR_BONUS;
    }

    let extension = match extension.filter(|e| !e.trim().is_empty()) {
        Some(ext) => Some(normalize_extension(ext)),
        None => extension_from_name(filename),
    };
    if let Some(ext) = extension {
        apply_audio_override(&mut quality, &lower, &ext);
    }

    quality
}

fn apply_audio_override(quality: &mut QualityInfo, lower: &str, ext: &str) {
    let (score, profile) = if ext == ".flac" || ext == ".wav" {
        (90, "Audio_Lossless")
    } else if lower.contains("320") {
        (70, "Audio_320k")
    } else if ext == ".mp3" {
        (50, "Audio_128k")
    } else {
        return;
    };
    quality.quality_score = score;
    quality.quality_profile = Some(profile.to_string());
}
