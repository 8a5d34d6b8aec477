//! Per-video download outcomes and batch summaries.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::fetcher::{FetchError, FetchErrorKind};

/// Why a video failed to download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Private, deleted or otherwise unavailable upstream.
    Unavailable,
    /// The engine needs a signed-in session.
    AuthRequired,
    /// Transient engine failure that outlasted every retry.
    Transient,
    /// Any other engine failure that outlasted every retry.
    Other,
    /// The engine reported success but no output file was found.
    Verification,
    /// The task itself failed unexpectedly and was caught by the scheduler.
    Internal,
}

impl From<FetchErrorKind> for FailureKind {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Unavailable => Self::Unavailable,
            FetchErrorKind::AuthRequired => Self::AuthRequired,
            FetchErrorKind::Transient => Self::Transient,
            FetchErrorKind::Other => Self::Other,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => write!(f, "unavailable"),
            Self::AuthRequired => write!(f, "auth required"),
            Self::Transient => write!(f, "transient"),
            Self::Other => write!(f, "error"),
            Self::Verification => write!(f, "verification"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Classified failure carried by [`DownloadOutcome::Failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    /// Classification.
    pub kind: FailureKind,
    /// Message shown in the run report.
    pub message: String,
}

impl DownloadFailure {
    /// Create a failure.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&FetchError> for DownloadFailure {
    fn from(error: &FetchError) -> Self {
        let message = match error.kind {
            FetchErrorKind::Unavailable => "Video unavailable or private".to_string(),
            FetchErrorKind::AuthRequired => "Authentication required".to_string(),
            FetchErrorKind::Transient | FetchErrorKind::Other => error.message.clone(),
        };
        Self::new(error.kind.into(), message)
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Result of attempting one video in a scheduler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The engine produced a verified file.
    Success {
        /// Video ID.
        video_id: String,
        /// Video title.
        title: String,
        /// Final file path.
        path: PathBuf,
    },
    /// Already complete; the engine was not invoked.
    SuccessSkipped {
        /// Video ID.
        video_id: String,
        /// Video title.
        title: String,
        /// Existing file, when one was found on disk.
        path: Option<PathBuf>,
    },
    /// The video could not be downloaded.
    Failure {
        /// Video ID.
        video_id: String,
        /// Video title.
        title: String,
        /// What went wrong.
        error: DownloadFailure,
    },
}

impl DownloadOutcome {
    /// Video ID.
    pub fn video_id(&self) -> &str {
        match self {
            Self::Success { video_id, .. }
            | Self::SuccessSkipped { video_id, .. }
            | Self::Failure { video_id, .. } => video_id,
        }
    }

    /// Video title.
    pub fn title(&self) -> &str {
        match self {
            Self::Success { title, .. }
            | Self::SuccessSkipped { title, .. }
            | Self::Failure { title, .. } => title,
        }
    }

    /// Resulting file, if one is known.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Success { path, .. } => Some(path),
            Self::SuccessSkipped { path, .. } => path.as_deref(),
            Self::Failure { .. } => None,
        }
    }

    /// Success or skip.
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failure { .. })
    }

    /// Determined complete without invoking the engine.
    pub const fn is_skipped(&self) -> bool {
        matches!(self, Self::SuccessSkipped { .. })
    }

    /// The failure, if any.
    pub const fn error(&self) -> Option<&DownloadFailure> {
        match self {
            Self::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Aggregate over one scheduler run.
///
/// `results` is in completion order, which varies between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Number of videos submitted, before resume filtering.
    pub total: usize,
    /// Fresh downloads.
    pub successful: usize,
    /// Failures, including ones caught at the scheduler boundary.
    pub failed: usize,
    /// Skips, including videos filtered out before dispatch.
    pub skipped: usize,
    /// Outcomes of dispatched videos.
    pub results: Vec<DownloadOutcome>,
}

impl BatchSummary {
    /// A summary with nothing dispatched yet.
    pub const fn new(total: usize, pre_skipped: usize) -> Self {
        Self {
            total,
            successful: 0,
            failed: 0,
            skipped: pre_skipped,
            results: Vec::new(),
        }
    }

    /// Count and keep one outcome.
    pub fn record(&mut self, outcome: DownloadOutcome) {
        match outcome {
            DownloadOutcome::Success { .. } => self.successful += 1,
            DownloadOutcome::SuccessSkipped { .. } => self.skipped += 1,
            DownloadOutcome::Failure { .. } => self.failed += 1,
        }
        self.results.push(outcome);
    }

    /// Failed outcomes.
    pub fn failures(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.results.iter().filter(|outcome| !outcome.is_success())
    }

    /// Fresh downloads (not skips).
    pub fn downloaded(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.results
            .iter()
            .filter(|outcome| matches!(outcome, DownloadOutcome::Success { .. }))
    }
}
