//! Application configuration.
//!
//! Settings are read from a JSON file (`./config/settings.json` by default).
//! Only `download_path` is required; every other field has a default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};
use crate::fetcher::{CookieOptions, DEFAULT_YTDLP_PATH};
use crate::probe::{BEST_AUDIO_FORMAT, MediaMode, VIDEO_EXTENSION};
use crate::scheduler::{DEFAULT_MAX_CONCURRENT, MAX_CONCURRENT_LIMIT};
use crate::task::{DEFAULT_RETRY_ATTEMPTS, DownloadOptions};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config/settings.json";

fn default_log_file() -> PathBuf {
    PathBuf::from("./logs/downloader.log")
}

fn default_playlist_data_file() -> PathBuf {
    PathBuf::from("./data/playlist.json")
}

fn default_tracker_file() -> PathBuf {
    PathBuf::from("./data/download_tracker.json")
}

fn default_oauth_credentials_file() -> PathBuf {
    PathBuf::from("./credentials.json")
}

fn default_oauth_token_file() -> PathBuf {
    PathBuf::from("./data/token.json")
}

fn default_min_resolution() -> String {
    "720p".to_string()
}

fn default_max_resolution() -> String {
    "1080p".to_string()
}

fn default_format_preference() -> String {
    VIDEO_EXTENSION.to_string()
}

const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}

const fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

const fn default_retry_delay_seconds() -> u64 {
    5
}

const fn default_true() -> bool {
    true
}

fn default_audio_format() -> String {
    BEST_AUDIO_FORMAT.to_string()
}

fn default_ytdlp_path() -> PathBuf {
    PathBuf::from(DEFAULT_YTDLP_PATH)
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Directory videos are downloaded into.
    pub download_path: PathBuf,
    /// Log file.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    /// Cached playlist listing.
    #[serde(default = "default_playlist_data_file")]
    pub playlist_data_file: PathBuf,
    /// Download tracker document.
    #[serde(default = "default_tracker_file")]
    pub tracker_file: PathBuf,
    /// OAuth client credentials.
    #[serde(default = "default_oauth_credentials_file")]
    pub oauth_credentials_file: PathBuf,
    /// Stored OAuth token.
    #[serde(default = "default_oauth_token_file")]
    pub oauth_token_file: PathBuf,
    /// Minimum video resolution, e.g. `720p`.
    #[serde(default = "default_min_resolution")]
    pub min_resolution: String,
    /// Maximum video resolution, e.g. `1080p`.
    #[serde(default = "default_max_resolution")]
    pub max_resolution: String,
    /// Preferred container.
    #[serde(default = "default_format_preference")]
    pub format_preference: String,
    /// Worker-pool width.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// Fetch attempts per video.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// Delay between attempts, in seconds.
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u64,
    /// Skip videos already downloaded before dispatch.
    #[serde(default = "default_true")]
    pub resume_downloads: bool,
    /// Remove downloaded videos from Watch Later after the run.
    #[serde(default)]
    pub auto_clean_watch_later: bool,
    /// Netscape-format cookies file for the fetch engine.
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    /// Browser to read cookies from.
    #[serde(default)]
    pub cookies_from_browser: Option<String>,
    /// Download audio only.
    #[serde(default)]
    pub audio_only: bool,
    /// Audio format; `best` keeps the source codec.
    #[serde(default = "default_audio_format")]
    pub audio_format: String,
    /// yt-dlp executable.
    #[serde(default = "default_ytdlp_path")]
    pub ytdlp_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: PathBuf::from("./downloads"),
            log_file: default_log_file(),
            playlist_data_file: default_playlist_data_file(),
            tracker_file: default_tracker_file(),
            oauth_credentials_file: default_oauth_credentials_file(),
            oauth_token_file: default_oauth_token_file(),
            min_resolution: default_min_resolution(),
            max_resolution: default_max_resolution(),
            format_preference: default_format_preference(),
            max_concurrent_downloads: default_max_concurrent(),
            retry_attempts: default_retry_attempts(),
            retry_delay_seconds: default_retry_delay_seconds(),
            resume_downloads: true,
            auto_clean_watch_later: false,
            cookies_file: None,
            cookies_from_browser: None,
            audio_only: false,
            audio_format: default_audio_format(),
            ytdlp_path: default_ytdlp_path(),
        }
    }
}

impl AppConfig {
    /// Load, normalize and validate the configuration at `path`.
    ///
    /// The download directory is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or malformed, if a
    /// value is invalid, or if the download directory cannot be created.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let content = fs::read_to_string(path).map_err(|e| FileSystemError::ReadFailed {
            path: path.to_path_buf(),
            reason: format!("Failed to read config file: {e}"),
        })?;

        let mut config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file: {e}")))?;

        config.normalize();
        config.validate()?;
        config.ensure_download_dir()?;

        info!("Loaded config from {}", path.display());
        debug!("Download directory: {}", config.download_path.display());
        Ok(config)
    }

    /// Expand `~` in paths and clamp numeric settings into range.
    pub fn normalize(&mut self) {
        self.download_path = expand_tilde(&self.download_path);
        self.cookies_file = self.cookies_file.as_deref().map(expand_tilde);

        let clamped = self
            .max_concurrent_downloads
            .clamp(1, MAX_CONCURRENT_LIMIT);
        if clamped != self.max_concurrent_downloads {
            warn!(
                "max_concurrent_downloads {} out of range, using {}",
                self.max_concurrent_downloads, clamped
            );
            self.max_concurrent_downloads = clamped;
        }

        if self.retry_attempts == 0 {
            warn!("retry_attempts must be at least 1, using 1");
            self.retry_attempts = 1;
        }
    }

    /// Check the values that cannot be repaired.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] for an unparsable resolution or a
    /// minimum above the maximum.
    pub fn validate(&self) -> Result<()> {
        let min = parse_resolution(&self.min_resolution)?;
        let max = parse_resolution(&self.max_resolution)?;
        if min > max {
            return Err(Error::Configuration(format!(
                "min_resolution {} is above max_resolution {}",
                self.min_resolution, self.max_resolution
            )));
        }
        Ok(())
    }

    /// Media mode selected by `audio_only` and `audio_format`.
    pub fn media_mode(&self) -> MediaMode {
        if self.audio_only {
            MediaMode::audio(&self.audio_format)
        } else {
            MediaMode::Video
        }
    }

    /// Delay between fetch attempts.
    pub const fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }

    /// Per-video download settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if a resolution cannot be parsed.
    pub fn download_options(&self) -> Result<DownloadOptions> {
        let mut options = DownloadOptions::new(&self.download_path)
            .with_mode(self.media_mode())
            .with_resolution(
                parse_resolution(&self.min_resolution)?,
                parse_resolution(&self.max_resolution)?,
            )
            .with_retry(self.retry_attempts.max(1), self.retry_delay());
        options.format_preference.clone_from(&self.format_preference);
        options.cookies = CookieOptions {
            cookies_file: self.cookies_file.clone(),
            cookies_from_browser: self.cookies_from_browser.clone(),
        };
        Ok(options)
    }

    fn ensure_download_dir(&self) -> Result<()> {
        if self.download_path.exists() {
            if !self.download_path.is_dir() {
                return Err(Error::Configuration(format!(
                    "Download path exists but is not a directory: {}",
                    self.download_path.display()
                )));
            }
            return Ok(());
        }

        fs::create_dir_all(&self.download_path).map_err(|e| {
            Error::FileSystem(FileSystemError::CreateDirFailed {
                path: self.download_path.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Parse a resolution such as `720p` (or a bare `720`) into a pixel height.
///
/// # Errors
///
/// Returns [`Error::Configuration`] when the value is not a positive number
/// with an optional `p` suffix.
pub fn parse_resolution(value: &str) -> Result<u32> {
    let trimmed = value.trim();
    let digits = trimmed
        .strip_suffix('p')
        .or_else(|| trimmed.strip_suffix('P'))
        .unwrap_or(trimmed);

    match digits.parse::<u32>() {
        Ok(height) if height > 0 => Ok(height),
        _ => Err(Error::Configuration(format!(
            "Invalid resolution '{value}', expected a value like 720p"
        ))),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}
