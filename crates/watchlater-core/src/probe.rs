//! Filesystem probing for previously produced output files.
//!
//! The prober makes a download idempotent independently of the tracker: if
//! `0001 - Title.mp4` is already on disk, nothing is fetched again.

use std::path::{Path, PathBuf};

use tracing::debug;

/// Extension every finished video ends up with.
pub const VIDEO_EXTENSION: &str = "mp4";

/// Containers the fetch engine may produce for a video before normalization.
pub const VIDEO_OUTPUT_EXTENSIONS: [&str; 3] = ["mp4", "webm", "mkv"];

/// Audio containers a previous run may have produced.
pub const COMMON_AUDIO_EXTENSIONS: [&str; 6] = ["mp3", "m4a", "webm", "flac", "wav", "opus"];

/// Audio format value meaning "keep whatever the source offers".
pub const BEST_AUDIO_FORMAT: &str = "best";

/// What kind of file a download produces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MediaMode {
    /// Muxed video with audio, normalized to `.mp4`.
    #[default]
    Video,
    /// Audio only, optionally converted to a specific format.
    Audio {
        /// Requested output format (`mp3`, `m4a`, ...); `None` keeps the source codec.
        format: Option<String>,
    },
}

impl MediaMode {
    /// Audio mode from a configured format string; `best` or blank means no conversion.
    pub fn audio(format: &str) -> Self {
        let format = format.trim().trim_start_matches('.').to_lowercase();
        if format.is_empty() || format == BEST_AUDIO_FORMAT {
            Self::Audio { format: None }
        } else {
            Self::Audio {
                format: Some(format),
            }
        }
    }

    /// Whether this is audio-only mode.
    pub const fn is_audio(&self) -> bool {
        matches!(self, Self::Audio { .. })
    }

    /// The requested audio conversion target, if any.
    pub fn target_format(&self) -> Option<&str> {
        match self {
            Self::Video => None,
            Self::Audio { format } => format.as_deref(),
        }
    }

    /// Extensions to look for before fetching.
    ///
    /// Video mode only trusts a finished `.mp4`; audio mode accepts any
    /// common container so a run with a different effective format still counts.
    pub fn existing_extensions(&self) -> Vec<&str> {
        match self {
            Self::Video => vec![VIDEO_EXTENSION],
            Self::Audio { .. } => self.audio_extensions(),
        }
    }

    /// Extensions to look for after the engine reports success.
    pub fn output_extensions(&self) -> Vec<&str> {
        match self {
            Self::Video => VIDEO_OUTPUT_EXTENSIONS.to_vec(),
            Self::Audio { .. } => self.audio_extensions(),
        }
    }

    fn audio_extensions(&self) -> Vec<&str> {
        let mut extensions = Vec::with_capacity(COMMON_AUDIO_EXTENSIONS.len() + 1);
        if let Some(format) = self.target_format() {
            extensions.push(format);
        }
        for ext in COMMON_AUDIO_EXTENSIONS {
            if !extensions.contains(&ext) {
                extensions.push(ext);
            }
        }
        extensions
    }
}

/// Whether a file extension belongs to any media container we produce.
pub fn is_media_extension(ext: &str) -> bool {
    let ext = ext.to_lowercase();
    VIDEO_OUTPUT_EXTENSIONS.contains(&ext.as_str()) || COMMON_AUDIO_EXTENSIONS.contains(&ext.as_str())
}

/// Find a previously completed output for `stem` in `dir`.
pub fn find_existing(dir: &Path, stem: &str, mode: &MediaMode) -> Option<PathBuf> {
    probe(dir, stem, &mode.existing_extensions())
}

/// Find the file the fetch engine just produced for `stem` in `dir`.
pub fn find_output(dir: &Path, stem: &str, mode: &MediaMode) -> Option<PathBuf> {
    probe(dir, stem, &mode.output_extensions())
}

/// Return the first `dir/stem.ext` that exists as a regular file.
///
/// The extension is appended rather than substituted, so titles containing
/// dots (`Mr. Smith`) keep their full stem.
fn probe(dir: &Path, stem: &str, extensions: &[&str]) -> Option<PathBuf> {
    extensions.iter().find_map(|ext| {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            debug!("Found existing output: {}", candidate.display());
            Some(candidate)
        } else {
            None
        }
    })
}
