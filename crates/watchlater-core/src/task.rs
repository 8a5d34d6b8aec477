//! Single-video download task.
//!
//! For one video: tracker check, existence probe, fetch with retry, output
//! verification, `.mp4` normalization, tracker update. Every path ends in a
//! [`DownloadOutcome`]; nothing here returns an error to the caller.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::FileSystemError;
use crate::fetcher::{CookieOptions, FetchError, FetchRequest, MediaFetcher, build_format_selector};
use crate::outcome::{DownloadFailure, DownloadOutcome, FailureKind};
use crate::probe::{self, MediaMode, VIDEO_EXTENSION};
use crate::tracker::TrackerStore;
use crate::video::{VideoDescriptor, format_file_size};

/// Default number of fetch attempts per video.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default fixed delay between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default lower bound on video height.
pub const DEFAULT_MIN_HEIGHT: u32 = 720;

/// Default upper bound on video height.
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

/// Per-video download settings shared by every task of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Directory files are written to.
    pub download_dir: PathBuf,
    /// Video or audio-only.
    pub mode: MediaMode,
    /// Minimum video height.
    pub min_height: u32,
    /// Maximum video height.
    pub max_height: u32,
    /// Preferred container (`mp4`).
    pub format_preference: String,
    /// Fetch attempts per video, at least one.
    pub retry_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Cookie authentication for the engine.
    pub cookies: CookieOptions,
}

impl DownloadOptions {
    /// Options with defaults for everything but the target directory.
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            mode: MediaMode::Video,
            min_height: DEFAULT_MIN_HEIGHT,
            max_height: DEFAULT_MAX_HEIGHT,
            format_preference: VIDEO_EXTENSION.to_string(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            cookies: CookieOptions::default(),
        }
    }

    /// Set the media mode.
    #[must_use]
    pub fn with_mode(mut self, mode: MediaMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self
    }

    /// Set the height bounds.
    #[must_use]
    pub const fn with_resolution(mut self, min_height: u32, max_height: u32) -> Self {
        self.min_height = min_height;
        self.max_height = max_height;
        self
    }

    /// Format selector for this configuration.
    pub fn format_selector(&self) -> String {
        build_format_selector(
            &self.mode,
            self.min_height,
            self.max_height,
            &self.format_preference,
        )
    }
}

/// Why one attempt did not produce a verified file.
enum AttemptError {
    Fetch(FetchError),
    Verification(String),
    Normalize(FileSystemError),
}

impl AttemptError {
    fn into_failure(self) -> DownloadFailure {
        match self {
            Self::Fetch(e) => DownloadFailure::from(&e),
            Self::Verification(message) => DownloadFailure::new(FailureKind::Verification, message),
            Self::Normalize(e) => DownloadFailure::new(FailureKind::Verification, e.to_string()),
        }
    }
}

/// Downloads one video at a time; cheap to clone into workers.
#[derive(Clone)]
pub struct DownloadTask {
    fetcher: Arc<dyn MediaFetcher>,
    tracker: Arc<TrackerStore>,
    options: Arc<DownloadOptions>,
}

impl DownloadTask {
    /// Create a task.
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        tracker: Arc<TrackerStore>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            fetcher,
            tracker,
            options: Arc::new(options),
        }
    }

    /// Settings in use.
    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Tracker in use.
    pub fn tracker(&self) -> &Arc<TrackerStore> {
        &self.tracker
    }

    /// Download `video`, blocking the calling thread.
    pub fn run(&self, video: &VideoDescriptor) -> DownloadOutcome {
        let title = video.display_title().to_string();

        if self.tracker.is_downloaded(&video.id) {
            info!("Video already downloaded (tracked): {}", title);
            return DownloadOutcome::SuccessSkipped {
                video_id: video.id.clone(),
                title,
                path: None,
            };
        }

        let stem = video.file_stem();
        let dir = &self.options.download_dir;

        if let Some(existing) = probe::find_existing(dir, &stem, &self.options.mode) {
            info!("File exists locally: {}", file_name(&existing));
            self.register(video, &title, &existing);
            return DownloadOutcome::SuccessSkipped {
                video_id: video.id.clone(),
                title,
                path: Some(existing),
            };
        }

        let request = FetchRequest {
            url: video.source_url(),
            title: title.clone(),
            output_dir: dir.clone(),
            file_stem: stem,
            format_selector: self.options.format_selector(),
            mode: self.options.mode.clone(),
            cookies: self.options.cookies.clone(),
        };
        debug!("Format selector: {}", request.format_selector);

        let attempts = self.options.retry_attempts.max(1);
        let mut last_failure = None;

        for attempt in 1..=attempts {
            info!(video_id = %video.id, attempt, "Downloading {}/{}: {}", attempt, attempts, title);

            match self.attempt(&request) {
                Ok(path) => {
                    self.register(video, &title, &path);
                    info!("Successfully downloaded: {}", file_name(&path));
                    return DownloadOutcome::Success {
                        video_id: video.id.clone(),
                        title,
                        path,
                    };
                }
                Err(AttemptError::Fetch(e)) if !e.kind.is_retryable() => {
                    let failure = DownloadFailure::from(&e);
                    error!("{}: {}", failure.message, title);
                    return DownloadOutcome::Failure {
                        video_id: video.id.clone(),
                        title,
                        error: failure,
                    };
                }
                Err(e) => {
                    let failure = e.into_failure();
                    warn!("Download attempt {} failed: {}", attempt, failure.message);
                    last_failure = Some(failure);
                    if attempt < attempts {
                        info!("Retrying in {} seconds...", self.options.retry_delay.as_secs());
                        std::thread::sleep(self.options.retry_delay);
                    }
                }
            }
        }

        error!("Failed to download after {} attempts: {}", attempts, title);
        DownloadOutcome::Failure {
            video_id: video.id.clone(),
            title,
            error: last_failure
                .unwrap_or_else(|| DownloadFailure::new(FailureKind::Other, "Unknown error")),
        }
    }

    /// One fetch plus verification and normalization.
    fn attempt(&self, request: &FetchRequest) -> Result<PathBuf, AttemptError> {
        self.fetcher.fetch(request).map_err(AttemptError::Fetch)?;

        // The engine's own success report is not trusted without a file.
        let found = probe::find_output(&request.output_dir, &request.file_stem, &request.mode)
            .ok_or_else(|| {
                AttemptError::Verification("Downloaded file not found after download".to_string())
            })?;

        if request.mode.is_audio() || has_extension(&found, VIDEO_EXTENSION) {
            return Ok(found);
        }

        let normalized = found.with_extension(VIDEO_EXTENSION);
        fs::rename(&found, &normalized).map_err(|e| {
            AttemptError::Normalize(FileSystemError::RenameFailed {
                from: found.clone(),
                to: normalized.clone(),
                reason: e.to_string(),
            })
        })?;
        debug!("Renamed {} to {}", found.display(), normalized.display());
        Ok(normalized)
    }

    /// Best-effort tracker update; a failure is logged, never propagated.
    fn register(&self, video: &VideoDescriptor, title: &str, path: &Path) {
        let size = fs::metadata(path).map(|m| m.len()).ok();
        if let Some(size) = size {
            debug!("{} is {}", file_name(path), format_file_size(size));
        }
        if let Err(e) = self
            .tracker
            .mark_downloaded(&video.id, title, Some(path), size)
        {
            warn!("Could not update tracker: {}", e);
        }
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchErrorKind, MockMediaFetcher};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        tracker: Arc<TrackerStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let tracker = Arc::new(TrackerStore::new(dir.path().join("tracker.json")));
            Self { dir, tracker }
        }

        fn downloads(&self) -> PathBuf {
            self.dir.path().to_path_buf()
        }

        fn task(&self, fetcher: MockMediaFetcher, options: DownloadOptions) -> DownloadTask {
            DownloadTask::new(Arc::new(fetcher), Arc::clone(&self.tracker), options)
        }

        fn options(&self) -> DownloadOptions {
            DownloadOptions::new(self.downloads()).with_retry(3, Duration::ZERO)
        }
    }

    fn talk() -> VideoDescriptor {
        VideoDescriptor::new("AAAAAAAAAAA", "Talk").with_index(1)
    }

    fn write_output(request: &FetchRequest, ext: &str) {
        fs::write(
            request.output_dir.join(format!("{}.{ext}", request.file_stem)),
            b"media",
        )
        .unwrap();
    }

    #[test]
    fn test_tracked_video_never_fetches() {
        let fixture = Fixture::new();
        fixture
            .tracker
            .mark_downloaded("AAAAAAAAAAA", "Talk", None, None)
            .unwrap();

        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        assert!(outcome.is_skipped());
        assert!(outcome.path().is_none());
    }

    #[test]
    fn test_existing_file_skips_and_registers() {
        let fixture = Fixture::new();
        fs::write(fixture.downloads().join("0001 - Talk.mp4"), b"video").unwrap();

        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(0);

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        assert!(outcome.is_skipped());
        assert_eq!(
            outcome.path(),
            Some(fixture.downloads().join("0001 - Talk.mp4").as_path())
        );
        let record = fixture.tracker.record("AAAAAAAAAAA").unwrap();
        assert_eq!(record.file_size, Some(5));
    }

    #[test]
    fn test_success_after_transient_failures() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        let mut calls = 0;
        fetcher.expect_fetch().times(3).returning(move |request| {
            calls += 1;
            if calls < 3 {
                Err(FetchError::classified("HTTP Error 503: Service Unavailable"))
            } else {
                write_output(request, "mp4");
                Ok(())
            }
        });

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        let expected = fixture.downloads().join("0001 - Talk.mp4");
        assert_eq!(
            outcome,
            DownloadOutcome::Success {
                video_id: "AAAAAAAAAAA".to_string(),
                title: "Talk".to_string(),
                path: expected.clone(),
            }
        );
        assert_eq!(
            fixture.tracker.record("AAAAAAAAAAA").unwrap().filepath,
            Some(expected)
        );
    }

    #[test]
    fn test_private_video_is_attempted_once() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(FetchError::classified("ERROR: Private video")));

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, FailureKind::Unavailable);
        assert_eq!(error.message, "Video unavailable or private");
        assert!(!fixture.tracker.is_downloaded("AAAAAAAAAAA"));
    }

    #[test]
    fn test_auth_required_is_attempted_once() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|_| {
            Err(FetchError::new(FetchErrorKind::AuthRequired, "Sign in to confirm your age"))
        });

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        assert_eq!(outcome.error().unwrap().kind, FailureKind::AuthRequired);
    }

    #[test]
    fn test_transient_error_uses_every_attempt() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .times(4)
            .returning(|_| Err(FetchError::classified("Connection reset by peer")));

        let options = fixture.options().with_retry(4, Duration::ZERO);
        let outcome = fixture.task(fetcher, options).run(&talk());
        let error = outcome.error().unwrap();
        assert_eq!(error.kind, FailureKind::Transient);
        assert_eq!(error.message, "Connection reset by peer");
    }

    #[test]
    fn test_reported_success_without_file_is_failure() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(3).returning(|_| Ok(()));

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        assert_eq!(outcome.error().unwrap().kind, FailureKind::Verification);
        assert!(!fixture.tracker.is_downloaded("AAAAAAAAAAA"));
    }

    #[test]
    fn test_webm_output_is_renamed_to_mp4() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            write_output(request, "webm");
            Ok(())
        });

        let outcome = fixture.task(fetcher, fixture.options()).run(&talk());
        let expected = fixture.downloads().join("0001 - Talk.mp4");
        assert_eq!(outcome.path(), Some(expected.as_path()));
        assert!(expected.exists());
        assert!(!fixture.downloads().join("0001 - Talk.webm").exists());
    }

    #[test]
    fn test_failed_rename_to_mp4_is_failure() {
        let fixture = Fixture::new();
        let blocked = fixture.downloads().join("0001 - Talk.mp4");
        fs::create_dir(&blocked).unwrap();
        fs::write(blocked.join("occupied"), b"x").unwrap();

        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            write_output(request, "mkv");
            Ok(())
        });

        let options = fixture.options().with_retry(1, Duration::ZERO);
        let outcome = fixture.task(fetcher, options).run(&talk());

        let failure = outcome.error().unwrap();
        assert_eq!(failure.kind, FailureKind::Verification);
        assert!(failure.message.starts_with("Failed to rename"));
        assert!(failure.message.contains("0001 - Talk.mkv"));
        assert!(!fixture.tracker.is_downloaded("AAAAAAAAAAA"));
    }

    #[test]
    fn test_audio_output_keeps_its_extension() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            assert_eq!(request.format_selector, "bestaudio/best");
            write_output(request, "m4a");
            Ok(())
        });

        let options = fixture.options().with_mode(MediaMode::audio("best"));
        let outcome = fixture.task(fetcher, options).run(&talk());
        assert_eq!(
            outcome.path(),
            Some(fixture.downloads().join("0001 - Talk.m4a").as_path())
        );
    }

    #[test]
    fn test_placeholder_title_and_url() {
        let fixture = Fixture::new();
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            assert_eq!(request.url, "https://www.youtube.com/watch?v=BBBBBBBBBBB");
            assert_eq!(request.file_stem, "Unknown Title");
            write_output(request, "mp4");
            Ok(())
        });

        let video = VideoDescriptor {
            title: String::new(),
            url: String::new(),
            ..VideoDescriptor::new("BBBBBBBBBBB", "")
        };
        let outcome = fixture.task(fetcher, fixture.options()).run(&video);
        assert!(outcome.is_success());
        assert_eq!(outcome.title(), "Unknown Title");
    }

    #[test]
    fn test_tracker_write_failure_does_not_fail_download() {
        let dir = TempDir::new().unwrap();
        // Tracker path is a directory, so every save fails.
        let tracker_path = dir.path().join("tracker.json");
        fs::create_dir(&tracker_path).unwrap();
        fs::write(tracker_path.join("keep"), b"x").unwrap();
        let downloads = dir.path().join("videos");
        fs::create_dir(&downloads).unwrap();

        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().times(1).returning(|request| {
            write_output(request, "mp4");
            Ok(())
        });

        let task = DownloadTask::new(
            Arc::new(fetcher),
            Arc::new(TrackerStore::new(&tracker_path)),
            DownloadOptions::new(&downloads).with_retry(1, Duration::ZERO),
        );
        let outcome = task.run(&talk());
        assert!(matches!(outcome, DownloadOutcome::Success { .. }));
    }
}
