//! Run driver: listing, persistence, downloading, reporting, cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::{Error, PlaylistError, Result};
use crate::outcome::{BatchSummary, DownloadOutcome};
use crate::playlist::{PlaylistSource, load_playlist, save_playlist};
use crate::scheduler::DownloadScheduler;
use crate::video::VideoDescriptor;

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Fetch the listing, cache it, download.
    #[default]
    Full,
    /// Fetch and cache the listing only.
    FetchOnly,
    /// Download from the cached listing without contacting the API.
    DownloadOnly,
}

impl RunMode {
    /// Whether this mode talks to the playlist source.
    pub const fn needs_source(self) -> bool {
        !matches!(self, Self::DownloadOnly)
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionReport {
    /// Videos in the listing that was used.
    pub videos_listed: usize,
    /// Download summary; `None` when nothing was downloaded.
    pub summary: Option<BatchSummary>,
    /// Videos removed from Watch Later afterwards.
    pub removed_from_watch_later: usize,
}

/// Sequences one run of the downloader.
pub struct PlaylistSession {
    scheduler: DownloadScheduler,
    playlist_file: PathBuf,
    source: Option<Arc<dyn PlaylistSource>>,
    auto_clean: bool,
}

impl PlaylistSession {
    /// Create a session caching the listing at `playlist_file`.
    pub fn new(scheduler: DownloadScheduler, playlist_file: impl Into<PathBuf>) -> Self {
        Self {
            scheduler,
            playlist_file: playlist_file.into(),
            source: None,
            auto_clean: false,
        }
    }

    /// Use `source` for fetching and cleanup.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn PlaylistSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Remove freshly downloaded videos from Watch Later after the run.
    #[must_use]
    pub const fn with_auto_clean(mut self, auto_clean: bool) -> Self {
        self.auto_clean = auto_clean;
        self
    }

    /// Cached listing path.
    pub fn playlist_file(&self) -> &Path {
        &self.playlist_file
    }

    /// Execute one run.
    ///
    /// Per-video failures are reported in the summary and never make this
    /// fail. Errors are reserved for an unusable listing: a fetch failure in
    /// fetch-only mode, or no cached listing to fall back on.
    pub async fn run(&self, mode: RunMode) -> Result<SessionReport> {
        let videos = match mode {
            RunMode::DownloadOnly => {
                let videos = self.load_cache()?;
                info!("Loaded {} videos from cached playlist", videos.len());
                videos
            }
            RunMode::FetchOnly => {
                let videos = self.fetch().await?;
                if !videos.is_empty() {
                    self.save_cache(&videos);
                }
                info!("Fetch-only mode: found {} videos in Watch Later", videos.len());
                return Ok(SessionReport {
                    videos_listed: videos.len(),
                    ..SessionReport::default()
                });
            }
            RunMode::Full => match self.fetch().await {
                Ok(videos) if videos.is_empty() => {
                    warn!("No videos found in Watch Later playlist");
                    return Ok(SessionReport::default());
                }
                Ok(videos) => {
                    self.save_cache(&videos);
                    videos
                }
                Err(e) => {
                    error!("Error fetching playlist: {}", e);
                    info!("Attempting to load cached playlist data...");
                    self.load_cache()?
                }
            },
        };

        let videos_listed = videos.len();
        info!("Starting download process...");
        let summary = self.scheduler.run(videos).await;
        log_summary(&summary);

        let removed_from_watch_later = if self.auto_clean {
            self.clean_watch_later(&summary).await?
        } else {
            0
        };

        Ok(SessionReport {
            videos_listed,
            summary: Some(summary),
            removed_from_watch_later,
        })
    }

    async fn fetch(&self) -> Result<Vec<VideoDescriptor>> {
        let source = self.source.clone().ok_or_else(|| {
            Error::Configuration("No playlist source configured".to_string())
        })?;
        info!("Fetching Watch Later playlist...");
        tokio::task::spawn_blocking(move || source.fetch_videos())
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }

    fn load_cache(&self) -> Result<Vec<VideoDescriptor>> {
        let videos = load_playlist(&self.playlist_file)?;
        if videos.is_empty() {
            error!("No cached playlist data available");
            return Err(PlaylistError::CacheEmpty(self.playlist_file.clone()).into());
        }
        Ok(videos)
    }

    fn save_cache(&self, videos: &[VideoDescriptor]) {
        // The listing is already in memory; a failed cache write only costs
        // the fallback on the next run.
        if let Err(e) = save_playlist(&self.playlist_file, videos) {
            warn!("Failed to cache playlist: {}", e);
        }
    }

    async fn clean_watch_later(&self, summary: &BatchSummary) -> Result<usize> {
        let Some(source) = self.source.clone() else {
            return Ok(0);
        };

        let ids: Vec<String> = summary
            .downloaded()
            .map(|outcome| outcome.video_id().to_string())
            .collect();
        if ids.is_empty() {
            return Ok(0);
        }

        info!("Auto-clean enabled: removing downloaded videos from Watch Later...");
        let removed = tokio::task::spawn_blocking(move || {
            ids.iter()
                .filter(|id| match source.remove_video(id) {
                    Ok(removed) => removed,
                    Err(e) => {
                        error!("Error removing {} from Watch Later: {}", id, e);
                        false
                    }
                })
                .count()
        })
        .await
        .map_err(|e| Error::Task(e.to_string()))?;

        info!("Removed {} videos from Watch Later", removed);
        Ok(removed)
    }
}

/// Log run totals and every failed video.
pub fn log_summary(summary: &BatchSummary) {
    info!("Download Summary:");
    info!("  Total videos: {}", summary.total);
    info!("  Successful: {}", summary.successful);
    info!("  Failed: {}", summary.failed);
    info!("  Skipped (already downloaded): {}", summary.skipped);

    let failures: Vec<&DownloadOutcome> = summary.failures().collect();
    if failures.is_empty() {
        return;
    }
    warn!("Failed downloads:");
    for outcome in failures {
        let message = outcome
            .error()
            .map_or("Unknown error", |failure| failure.message.as_str());
        warn!("  - {}: {}", outcome.title(), message);
    }
}
