//! Video descriptors and output file naming.

use serde::{Deserialize, Serialize};

/// Title used when the listing carried none.
pub const UNKNOWN_TITLE: &str = "Unknown Title";

/// Default maximum length of a sanitized filename, in characters.
pub const DEFAULT_MAX_FILENAME_LENGTH: usize = 200;

/// Placeholder used when sanitizing leaves nothing behind.
const EMPTY_FILENAME_PLACEHOLDER: &str = "video";

/// One video of the Watch Later listing.
///
/// Produced by the metadata fetch (or loaded from the playlist cache) and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDescriptor {
    /// 1-based position in the fetched listing.
    #[serde(default)]
    pub index: Option<u32>,
    /// YouTube video ID.
    #[serde(default)]
    pub id: String,
    /// Video title.
    #[serde(default)]
    pub title: String,
    /// Watch URL.
    #[serde(default)]
    pub url: String,
    /// Duration in seconds.
    #[serde(default)]
    pub duration: Option<u64>,
    /// Channel name.
    #[serde(default)]
    pub uploader: Option<String>,
    /// View count at fetch time.
    #[serde(default)]
    pub view_count: Option<u64>,
    /// Publication timestamp as reported by the API.
    #[serde(default)]
    pub published_at: Option<String>,
}

impl VideoDescriptor {
    /// Create a descriptor with the watch URL derived from the ID.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            index: None,
            url: watch_url(&id),
            id,
            title: title.into(),
            duration: None,
            uploader: None,
            view_count: None,
            published_at: None,
        }
    }

    /// Set the listing position.
    #[must_use]
    pub const fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Title for logs and filenames, falling back to a placeholder.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            UNKNOWN_TITLE
        } else {
            &self.title
        }
    }

    /// URL handed to the fetch engine.
    pub fn source_url(&self) -> String {
        if self.url.trim().is_empty() {
            watch_url(&self.id)
        } else {
            self.url.clone()
        }
    }

    /// Filename without extension: `0001 - Title`, or just `Title`.
    pub fn file_stem(&self) -> String {
        file_stem(self.index, self.display_title())
    }
}

/// Build the canonical watch URL for a video ID.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Build an output filename stem from an optional ordinal and a title.
pub fn file_stem(index: Option<u32>, title: &str) -> String {
    let title = sanitize_filename(title);
    match index {
        Some(index) => format!("{index:04} - {title}"),
        None => title,
    }
}

/// Sanitize a string for use as a filename.
///
/// Reserved characters and control characters become `_`, leading and
/// trailing spaces and dots are trimmed, and the result is capped at
/// [`DEFAULT_MAX_FILENAME_LENGTH`] characters. Never returns an empty string.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    sanitize_filename_with_limit(name, DEFAULT_MAX_FILENAME_LENGTH)
}

/// [`sanitize_filename`] with an explicit length cap.
#[must_use]
pub fn sanitize_filename_with_limit(name: &str, max_length: usize) -> String {
    const INVALID_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

    let sanitized: String = name
        .chars()
        .map(|c| {
            if INVALID_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let trimmed = sanitized.trim_matches(|c: char| c == ' ' || c == '.');

    // Count in chars so multi-byte titles are never split mid-codepoint.
    let capped: String = trimmed.chars().take(max_length).collect();
    let capped = capped.trim_end_matches(|c: char| c == ' ' || c == '.');

    if capped.is_empty() {
        EMPTY_FILENAME_PLACEHOLDER.to_string()
    } else {
        capped.to_string()
    }
}

/// Format file size in a human-readable form, e.g. `1.50 MB`.
#[must_use]
pub fn format_file_size(size_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = size_bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}
