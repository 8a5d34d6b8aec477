//! Watchlater Core Library
//!
//! This crate provides the core functionality for downloading a YouTube
//! Watch Later playlist:
//! - Resumable download tracking with atomic persistence
//! - Bounded concurrent downloading with retries and output verification
//! - The yt-dlp fetch engine adapter and the YouTube Data API client
//! - Configuration and the run driver

pub mod config;
pub mod error;
pub mod fetcher;
pub mod outcome;
pub mod playlist;
pub mod probe;
pub mod scheduler;
pub mod session;
pub mod task;
pub mod tracker;
pub mod video;
pub mod youtube;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use fetcher::{FetchError, FetchErrorKind, FetchRequest, MediaFetcher, YtDlpFetcher};
pub use outcome::{BatchSummary, DownloadFailure, DownloadOutcome, FailureKind};
pub use playlist::PlaylistSource;
pub use probe::MediaMode;
pub use scheduler::DownloadScheduler;
pub use session::{PlaylistSession, RunMode, SessionReport};
pub use task::{DownloadOptions, DownloadTask};
pub use tracker::{DownloadRecord, TrackerStore};
pub use video::VideoDescriptor;
pub use youtube::YouTubeApiClient;
