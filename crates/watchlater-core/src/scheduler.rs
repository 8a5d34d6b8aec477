//! Bounded concurrent download scheduler.
//!
//! Fans a batch of [`VideoDescriptor`]s out over at most `max_concurrent`
//! blocking workers and aggregates their outcomes into a [`BatchSummary`].
//! Outcomes are collected in completion order.

use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info};

use crate::fetcher::MediaFetcher;
use crate::outcome::{BatchSummary, DownloadFailure, DownloadOutcome, FailureKind};
use crate::task::{DownloadOptions, DownloadTask};
use crate::tracker::TrackerStore;
use crate::video::VideoDescriptor;

/// Default number of concurrent downloads.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Upper bound on concurrent downloads.
pub const MAX_CONCURRENT_LIMIT: usize = 16;

/// Runs download tasks on a bounded pool of blocking workers.
pub struct DownloadScheduler {
    task: DownloadTask,
    max_concurrent: usize,
    resume: bool,
}

impl DownloadScheduler {
    /// Create a scheduler with the default width and resume enabled.
    pub fn new(
        fetcher: Arc<dyn MediaFetcher>,
        tracker: Arc<TrackerStore>,
        options: DownloadOptions,
    ) -> Self {
        Self {
            task: DownloadTask::new(fetcher, tracker, options),
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            resume: true,
        }
    }

    /// Set the worker-pool width, clamped to `1..=16`.
    #[must_use]
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.clamp(1, MAX_CONCURRENT_LIMIT);
        self
    }

    /// Enable or disable filtering out already-downloaded videos before dispatch.
    #[must_use]
    pub const fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Worker-pool width.
    pub const fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Download every video in `videos`.
    ///
    /// Never fails: per-video problems, including a panicking task, become
    /// [`DownloadOutcome::Failure`] entries in the summary.
    pub async fn run(&self, videos: Vec<VideoDescriptor>) -> BatchSummary {
        let total = videos.len();

        let pending: Vec<VideoDescriptor> = if self.resume {
            let done = self
                .task
                .tracker()
                .all_downloaded_ids(Some(&self.task.options().download_dir));
            videos
                .into_iter()
                .filter(|video| !done.contains(&video.id))
                .collect()
        } else {
            videos
        };

        let pre_skipped = total - pending.len();
        if pre_skipped > 0 {
            info!("Skipping {} already downloaded videos", pre_skipped);
        }

        let mut summary = BatchSummary::new(total, pre_skipped);
        if pending.is_empty() {
            info!("All videos already downloaded");
            return summary;
        }

        info!(
            "Starting download of {} videos with {} workers",
            pending.len(),
            self.max_concurrent
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut workers = JoinSet::new();
        let mut in_flight: HashMap<Id, (String, String)> = HashMap::new();

        for video in pending {
            // The semaphore is never closed, so acquisition cannot fail here.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let task = self.task.clone();
            let key = (video.id.clone(), video.display_title().to_string());
            let handle = workers.spawn_blocking(move || {
                let _permit = permit;
                match catch_unwind(AssertUnwindSafe(|| task.run(&video))) {
                    Ok(outcome) => outcome,
                    Err(payload) => internal_failure(
                        &video.id,
                        video.display_title(),
                        &panic_message(payload.as_ref()),
                    ),
                }
            });
            in_flight.insert(handle.id(), key);
        }

        while let Some(joined) = workers.join_next_with_id().await {
            let outcome = match joined {
                Ok((id, outcome)) => {
                    in_flight.remove(&id);
                    outcome
                }
                Err(e) => {
                    let (video_id, title) = in_flight.remove(&e.id()).unwrap_or_default();
                    internal_failure(&video_id, &title, &e.to_string())
                }
            };
            debug!(video_id = outcome.video_id(), "Download finished");
            summary.record(outcome);
        }

        info!(
            "Download complete: {} successful, {} failed, {} skipped",
            summary.successful, summary.failed, summary.skipped
        );
        summary
    }
}

fn internal_failure(video_id: &str, title: &str, message: &str) -> DownloadOutcome {
    error!("Download task for {} failed unexpectedly: {}", video_id, message);
    DownloadOutcome::Failure {
        video_id: video_id.to_string(),
        title: title.to_string(),
        error: DownloadFailure::new(
            FailureKind::Internal,
            format!("Unexpected error: {message}"),
        ),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}
