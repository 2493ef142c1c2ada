//! Media type knowledge shared by detection and quality analysis

/// Media types seeded into the `media_types` table: (name, description)
pub const SEEDED_MEDIA_TYPES: &[(&str, &str)] = &[
    ("movie", "Feature films and documentaries"),
    ("tv_show", "Television series and episodes"),
    ("music", "Music albums and tracks"),
    ("game", "Video games and ROMs"),
    ("software", "Applications and installers"),
    ("training", "Courses and tutorials"),
    ("other", "Unclassified media"),
    ("anime", "Animated series and films"),
    ("audiobook", "Narrated books"),
    ("podcast", "Podcast episodes"),
    ("comic", "Comics and graphic novels"),
];

const VIDEO: &[&str] = &[".mp4", ".mkv", ".avi", ".mov", ".wmv", ".flv", ".m4v"];
const MUSIC: &[&str] = &[".mp3", ".flac", ".wav", ".m4a", ".aac", ".ogg", ".wma"];
const AUDIOBOOK: &[&str] = &[".mp3", ".m4a", ".m4b", ".aac", ".ogg"];
const PODCAST: &[&str] = &[".mp3", ".m4a", ".aac", ".ogg"];
const COMIC: &[&str] = &[".cbr", ".cbz", ".cb7", ".cbt", ".pdf", ".epub"];
const SOFTWARE: &[&str] = &[
    ".exe", ".msi", ".dmg", ".pkg", ".iso", ".img", ".deb", ".rpm", ".apk", ".appimage",
];
const GAME: &[&str] = &[
    ".exe", ".iso", ".img", ".bin", ".rom", ".nes", ".sfc", ".gba", ".nds",
];

/// Extensions that count as media files for a type. `None` means every file is relevant.
pub fn relevant_extensions(media_type: &str) -> Option<&'static [&'static str]> {
    match media_type {
        "movie" | "tv_show" | "anime" => Some(VIDEO),
        "music" => Some(MUSIC),
        "audiobook" => Some(AUDIOBOOK),
        "podcast" => Some(PODCAST),
        "comic" => Some(COMIC),
        "software" => Some(SOFTWARE),
        "game" => Some(GAME),
        _ => None,
    }
}

/// Whether a normalized extension is relevant for the media type
pub fn is_relevant(media_type: &str, extension: Option<&str>) -> bool {
    match relevant_extensions(media_type) {
        None => true,
        Some(allowed) => extension.map_or(false, |ext| allowed.contains(&ext)),
    }
}

/// Quality profiles a complete collection of this type is expected to offer
pub fn expected_qualities(media_type: &str) -> &'static [&'static str] {
    match media_type {
        "movie" | "tv_show" | "anime" => &["4K/UHD", "1080p", "720p"],
        "music" => &["Audio_Lossless", "Audio_320k"],
        _ => &[],
    }
}

/// `"MKV"`, `"mkv"`, `".mkv"` -> `".mkv"`
pub fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    format!(".{}", ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("MKV"), ".mkv");
        assert_eq!(normalize_extension(".Flac"), ".flac");
        assert_eq!(normalize_extension("  .mp3 "), ".mp3");
    }

    #[test]
    fn test_relevant_extensions_by_type() {
        assert!(is_relevant("movie", Some(".mkv")));
        assert!(!is_relevant("movie", Some(".srt")));
        assert!(!is_relevant("movie", None));
        assert!(is_relevant("audiobook", Some(".m4b")));
        assert!(!is_relevant("podcast", Some(".flac")));
        assert!(is_relevant("game", Some(".nds")));
    }

    #[test]
    fn test_unknown_type_accepts_everything() {
        assert!(relevant_extensions("training").is_none());
        assert!(is_relevant("training", Some(".pdf")));
        assert!(is_relevant("other", None));
    }

    #[test]
    fn test_seeded_types_are_unique() {
        let mut names: Vec<_> = SEEDED_MEDIA_TYPES.iter().map(|(n, _)| *n).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), SEEDED_MEDIA_TYPES.len());
    }
}
