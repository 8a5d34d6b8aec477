//! Media fetch engine boundary.
//!
//! The download pipeline treats the engine as a black box that either
//! produces a file or fails. [`MediaFetcher`] is that seam; [`YtDlpFetcher`]
//! is the production implementation, driving the `yt-dlp` executable.
//!
//! Raw engine errors are classified exactly once, here, into a
//! [`FetchErrorKind`]; callers decide on retries from the kind alone.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::probe::{MediaMode, VIDEO_EXTENSION};

/// Default executable name for the fetch engine.
pub const DEFAULT_YTDLP_PATH: &str = "yt-dlp";

/// Bitrate requested when converting audio.
const AUDIO_QUALITY: &str = "192K";

/// Prefix of the machine-readable progress lines we ask yt-dlp to print.
const PROGRESS_PREFIX: &str = "[watchlater-progress]";

/// Classified fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The video is private, deleted, or otherwise unavailable upstream.
    Unavailable,
    /// The engine needs a signed-in session (age gate, members-only, bot check).
    AuthRequired,
    /// Network blips, throttling, server errors.
    Transient,
    /// Anything else.
    Other,
}

impl FetchErrorKind {
    /// Classify raw engine output.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if message.contains("Private video") || message.contains("Video unavailable") {
            Self::Unavailable
        } else if message.contains("Sign in") || lower.contains("authentication") {
            Self::AuthRequired
        } else if [
            "http error 429",
            "http error 5",
            "timed out",
            "connection reset",
            "connection refused",
            "temporary failure",
            "unable to download webpage",
            "incompleteread",
            "network is unreachable",
        ]
        .iter()
        .any(|needle| lower.contains(needle))
        {
            Self::Transient
        } else {
            Self::Other
        }
    }

    /// Whether another attempt could succeed.
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Other)
    }
}

/// Error returned by a [`MediaFetcher`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    /// Classification.
    pub kind: FetchErrorKind,
    /// Engine message.
    pub message: String,
}

impl FetchError {
    /// Create an error with an explicit kind.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Create an error, classifying the message.
    pub fn classified(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FetchErrorKind::classify(&message),
            message,
        }
    }
}

/// Cookie-based authentication passed through to the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    /// Netscape-format cookies file.
    pub cookies_file: Option<PathBuf>,
    /// Browser to read cookies from (`chrome`, `firefox`, ...).
    pub cookies_from_browser: Option<String>,
}

/// Everything the engine needs to fetch one video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Video URL.
    pub url: String,
    /// Title, for progress reporting.
    pub title: String,
    /// Directory the output lands in.
    pub output_dir: PathBuf,
    /// Output filename without extension.
    pub file_stem: String,
    /// Format selector expression.
    pub format_selector: String,
    /// Video or audio-only.
    pub mode: MediaMode,
    /// Cookie authentication.
    pub cookies: CookieOptions,
}

impl FetchRequest {
    /// Output template: the stem with the engine choosing the extension.
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("{}.%(ext)s", self.file_stem))
    }
}

/// Build the engine's format selector.
///
/// Video mode prefers the best video stream within the height bounds merged
/// with the best audio, then a combined stream within the bounds. With an
/// `mp4` preference, mp4 (and then anything) under the upper bound follows.
/// The bounds never apply to audio-only mode.
pub fn build_format_selector(
    mode: &MediaMode,
    min_height: u32,
    max_height: u32,
    format_preference: &str,
) -> String {
    if mode.is_audio() {
        return "bestaudio/best".to_string();
    }

    let mut selector = format!(
        "bestvideo[height>={min_height}][height<={max_height}]+bestaudio\
         /best[height>={min_height}][height<={max_height}]"
    );
    if format_preference.eq_ignore_ascii_case(VIDEO_EXTENSION) {
        selector.push_str(&format!(
            "/best[ext=mp4][height<={max_height}]/best[height<={max_height}]"
        ));
    }
    selector
}

/// Media fetch engine.
///
/// Implementations block until the download finishes or fails.
#[cfg_attr(test, mockall::automock)]
pub trait MediaFetcher: Send + Sync {
    /// Fetch one video into `request.output_dir`.
    ///
    /// # Errors
    ///
    /// Returns a classified [`FetchError`] when the engine fails.
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError>;
}

/// Progress reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchProgress {
    /// Bytes are flowing.
    Downloading {
        /// Bytes received so far.
        downloaded: u64,
        /// Total size, if known.
        total: Option<u64>,
        /// Whether `total` is the engine's estimate.
        estimated: bool,
    },
    /// The stream finished downloading.
    Finished,
    /// The engine reported an error for the stream.
    Error(String),
}

impl FetchProgress {
    /// Fraction complete in `0.0..=1.0`, when the total is known.
    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::Downloading {
                downloaded,
                total: Some(total),
                ..
            } if *total > 0 => Some((*downloaded as f64 / *total as f64).min(1.0)),
            Self::Finished => Some(1.0),
            _ => None,
        }
    }
}

/// Logs engine progress for one video.
#[derive(Debug)]
pub struct ProgressHook {
    title: String,
    last_percent: Option<u64>,
    finished: bool,
}

impl ProgressHook {
    /// Create a hook for the given video title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            last_percent: None,
            finished: false,
        }
    }

    /// Whether a `finished` state has been seen.
    pub const fn finished(&self) -> bool {
        self.finished
    }

    /// Handle one progress update.
    pub fn report(&mut self, progress: &FetchProgress) {
        match progress {
            FetchProgress::Downloading {
                downloaded,
                total,
                estimated,
            } => {
                let Some(ratio) = progress.ratio() else {
                    debug!("Downloading '{}': {} bytes", self.title, downloaded);
                    return;
                };
                let percent = (ratio * 100.0) as u64;
                // One line per 10% keeps the log readable.
                if self.last_percent.is_some_and(|last| percent / 10 == last / 10) {
                    return;
                }
                self.last_percent = Some(percent);
                if *estimated {
                    info!("Downloading '{}': {:.1}% (estimated)", self.title, ratio * 100.0);
                } else {
                    info!(
                        "Downloading '{}': {:.1}% ({}/{} bytes)",
                        self.title,
                        ratio * 100.0,
                        downloaded,
                        total.unwrap_or_default()
                    );
                }
            }
            FetchProgress::Finished => {
                self.finished = true;
                info!("Finished downloading '{}'", self.title);
            }
            FetchProgress::Error(message) => {
                error!("Error downloading '{}': {}", self.title, message);
            }
        }
    }
}

/// Parse one line of our progress template.
///
/// Format: `[watchlater-progress] <status> <downloaded> <total> <estimate>`,
/// with `NA` for unknown numbers.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix(PROGRESS_PREFIX)?;
    let mut fields = rest.split_whitespace();
    let status = fields.next()?;

    let number = |field: Option<&str>| {
        field
            .and_then(|value| value.parse::<f64>().ok())
            .map(|value| value as u64)
    };

    match status {
        "downloading" => {
            let downloaded = number(fields.next()).unwrap_or(0);
            let total = number(fields.next());
            let estimate = number(fields.next());
            Some(FetchProgress::Downloading {
                downloaded,
                total: total.or(estimate),
                estimated: total.is_none() && estimate.is_some(),
            })
        }
        "finished" => Some(FetchProgress::Finished),
        "error" => Some(FetchProgress::Error("download error".to_string())),
        _ => None,
    }
}

/// [`MediaFetcher`] backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    executable: PathBuf,
}

impl Default for YtDlpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_YTDLP_PATH)
    }
}

impl YtDlpFetcher {
    /// Create a fetcher using the given executable (name on `PATH` or full path).
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// The executable this fetcher runs.
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Command-line arguments for `request`.
    pub fn build_args(&self, request: &FetchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--format".into(),
            request.format_selector.clone().into(),
            "--output".into(),
            request.output_template().into_os_string(),
            "--no-playlist".into(),
            "--newline".into(),
            "--progress-template".into(),
            format!(
                "download:{PROGRESS_PREFIX} %(progress.status)s %(progress.downloaded_bytes)s \
                 %(progress.total_bytes)s %(progress.total_bytes_estimate)s"
            )
            .into(),
        ];

        match &request.mode {
            MediaMode::Video => {
                args.push("--merge-output-format".into());
                args.push(VIDEO_EXTENSION.into());
            }
            MediaMode::Audio {
                format: Some(format),
            } => {
                args.push("--extract-audio".into());
                args.push("--audio-format".into());
                args.push(format.into());
                args.push("--audio-quality".into());
                args.push(AUDIO_QUALITY.into());
            }
            MediaMode::Audio { format: None } => {}
        }

        if let Some(cookies_file) = &request.cookies.cookies_file {
            args.push("--cookies".into());
            args.push(cookies_file.clone().into_os_string());
        }
        if let Some(browser) = &request.cookies.cookies_from_browser {
            args.push("--cookies-from-browser".into());
            args.push(browser.into());
        }

        args.push(request.url.clone().into());
        args
    }
}

impl MediaFetcher for YtDlpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        let args = self.build_args(request);
        debug!(
            "Running {} with format selector {}",
            self.executable.display(),
            request.format_selector
        );

        let mut child = Command::new(&self.executable)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                FetchError::new(
                    FetchErrorKind::Other,
                    format!("Failed to start {}: {e}", self.executable.display()),
                )
            })?;

        // Drain stderr on its own thread so a chatty engine cannot block on a full pipe.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            std::thread::spawn(move || {
                let mut buffer = String::new();
                let _ = stderr.read_to_string(&mut buffer);
                buffer
            })
        });

        let mut hook = ProgressHook::new(&request.title);
        if let Some(stdout) = child.stdout.take() {
            for line in BufReader::new(stdout).lines().map_while(std::result::Result::ok) {
                if let Some(progress) = parse_progress_line(&line) {
                    hook.report(&progress);
                } else {
                    debug!(target: "watchlater_core::fetcher::ytdlp", "{}", line);
                }
            }
        }

        let status = child.wait().map_err(|e| {
            FetchError::new(
                FetchErrorKind::Other,
                format!("Failed to wait for {}: {e}", self.executable.display()),
            )
        })?;
        let stderr = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            if !hook.finished() {
                // yt-dlp prints no progress when the output already exists.
                debug!("yt-dlp exited cleanly for '{}' without a finished report", request.title);
            }
            return Ok(());
        }

        let message = engine_error_message(&stderr)
            .unwrap_or_else(|| format!("{} exited with {status}", self.executable.display()));
        hook.report(&FetchProgress::Error(message.clone()));
        warn!("yt-dlp failed for {}: {}", request.url, message);
        Err(FetchError::classified(message))
    }
}

/// The most relevant line of engine stderr: the last `ERROR:` line, else the last line.
fn engine_error_message(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    lines
        .iter()
        .rev()
        .find(|line| line.starts_with("ERROR:"))
        .or_else(|| lines.last())
        .map(|line| (*line).to_string())
}
