//! Durable record of which videos have been downloaded.
//!
//! The tracker is a single JSON document mapping video ID to a
//! [`DownloadRecord`]. It is the source of truth for resuming: a record with
//! status `downloaded` means the video is done, whether or not its file is
//! still on disk.
//!
//! # Concurrency
//!
//! Every mutation is a whole-document read-modify-write. [`TrackerStore`]
//! holds one mutex for the full cycle so that two workers finishing at the
//! same time cannot overwrite each other's snapshot. Writes go to a temporary
//! sibling file which is then renamed over the document, so readers never see
//! a truncated file and a crash mid-write leaves the previous version intact.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{FileSystemError, Result, TrackerError};
use crate::probe::is_media_extension;

/// Trailing YouTube-ID token in a legacy filename stem.
const VIDEO_ID_SUFFIX_PATTERN: &str = r"([a-zA-Z0-9_-]{11})$";

/// Prefix of the temporary file written next to the document.
const TEMP_PREFIX: &str = ".download_tracker.";

/// Tracker document contents, ordered by video ID.
pub type TrackerMap = BTreeMap<String, DownloadRecord>;

/// Status stored for a tracked video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// The video finished downloading.
    Downloaded,
    /// A status written by something else; never treated as complete.
    #[serde(other)]
    Unknown,
}

/// Persisted completion record for one video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// YouTube video ID.
    pub video_id: String,
    /// Title at download time.
    pub title: String,
    /// Where the file was written. It may have been removed since.
    pub filepath: Option<PathBuf>,
    /// Completion time, ISO-8601.
    pub download_date: String,
    /// File size in bytes.
    pub file_size: Option<u64>,
    /// Record status.
    pub status: RecordStatus,
}

impl DownloadRecord {
    /// Create a `downloaded` record stamped with the current time.
    pub fn downloaded(
        video_id: impl Into<String>,
        title: impl Into<String>,
        filepath: Option<PathBuf>,
        file_size: Option<u64>,
    ) -> Self {
        Self {
            video_id: video_id.into(),
            title: title.into(),
            filepath,
            download_date: Utc::now().to_rfc3339(),
            file_size,
            status: RecordStatus::Downloaded,
        }
    }

    /// Whether this record marks the video as complete.
    pub fn is_downloaded(&self) -> bool {
        self.status == RecordStatus::Downloaded
    }
}

/// Download tracker backed by a JSON file.
#[derive(Debug)]
pub struct TrackerStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TrackerStore {
    /// Create a store for the document at `path`. Nothing is read yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Path of the tracker document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the whole mapping.
    ///
    /// Never fails: a missing document is an empty mapping, and an unreadable
    /// or malformed one is an empty mapping plus a warning.
    pub fn load(&self) -> TrackerMap {
        if !self.path.exists() {
            return TrackerMap::new();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                warn!(
                    "Failed to read download tracker {}, treating as empty: {}",
                    self.path.display(),
                    e
                );
                return TrackerMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Download tracker {} is corrupt, treating as empty: {}",
                    self.path.display(),
                    e
                );
                TrackerMap::new()
            }
        }
    }

    /// Atomically replace the whole document with `map`.
    ///
    /// Serialized against [`Self::mark_downloaded`]. On failure the temporary
    /// file is removed and the previous document is left untouched.
    pub fn save(&self, map: &TrackerMap) -> Result<()> {
        let _guard = self.lock();
        self.write_document(map)
    }

    /// Record `video_id` as downloaded, keeping every other record.
    pub fn mark_downloaded(
        &self,
        video_id: &str,
        title: &str,
        filepath: Option<&Path>,
        file_size: Option<u64>,
    ) -> Result<()> {
        let _guard = self.lock();

        let mut map = self.load();
        map.insert(
            video_id.to_string(),
            DownloadRecord::downloaded(
                video_id,
                title,
                filepath.map(Path::to_path_buf),
                file_size,
            ),
        );
        self.write_document(&map)?;

        debug!("Marked video {} as downloaded in tracker", video_id);
        Ok(())
    }

    /// Whether `video_id` has a `downloaded` record.
    pub fn is_downloaded(&self, video_id: &str) -> bool {
        self.load()
            .get(video_id)
            .is_some_and(DownloadRecord::is_downloaded)
    }

    /// The record for `video_id`, if any.
    pub fn record(&self, video_id: &str) -> Option<DownloadRecord> {
        self.load().remove(video_id)
    }

    /// Every video ID considered complete.
    ///
    /// Tracked IDs, plus IDs recovered from the trailing 11-character token of
    /// media filenames in `local_dir` (files written before the tracker
    /// existed, or by another tool). Recovery only ever adds IDs.
    pub fn all_downloaded_ids(&self, local_dir: Option<&Path>) -> HashSet<String> {
        let mut ids: HashSet<String> = self
            .load()
            .into_values()
            .filter(DownloadRecord::is_downloaded)
            .map(|record| record.video_id)
            .collect();

        if let Some(dir) = local_dir {
            let recovered = recover_ids_from_directory(dir);
            if !recovered.is_empty() {
                debug!(
                    "Recovered {} video IDs from filenames in {}",
                    recovered.len(),
                    dir.display()
                );
            }
            ids.extend(recovered);
        }

        ids
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        // The guarded state lives on disk, so a panicked holder leaves nothing
        // half-updated in memory.
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_document(&self, map: &TrackerMap) -> Result<()> {
        let content = serde_json::to_string_pretty(map)?;
        self.replace_document(content.as_bytes(), |_| Ok(()))
    }

    /// Write `content` to a temporary sibling, hand its path to
    /// `before_persist`, then rename it over the document.
    ///
    /// An error at any step removes the temporary file and leaves the
    /// document as it was.
    fn replace_document<F>(&self, content: &[u8], before_persist: F) -> Result<()>
    where
        F: FnOnce(&Path) -> std::io::Result<()>,
    {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        if !parent.exists() {
            fs::create_dir_all(&parent).map_err(|e| FileSystemError::CreateDirFailed {
                path: parent.clone(),
                reason: e.to_string(),
            })?;
        }

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(&parent)
            .map_err(|e| self.persist_error(&e))?;

        temp.write_all(content)
            .and_then(|()| temp.as_file().sync_all())
            .and_then(|()| before_persist(temp.path()))
            .map_err(|e| self.persist_error(&e))?;

        // Dropping the PersistError drops the temp file with it.
        temp.persist(&self.path)
            .map_err(|e| self.persist_error(&e.error))?;

        Ok(())
    }

    fn persist_error(&self, e: &std::io::Error) -> TrackerError {
        TrackerError::PersistFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        }
    }
}

/// Extract trailing video IDs from media filenames directly inside `dir`.
fn recover_ids_from_directory(dir: &Path) -> HashSet<String> {
    let mut ids = HashSet::new();
    if !dir.is_dir() {
        return ids;
    }

    let Ok(id_re) = Regex::new(VIDEO_ID_SUFFIX_PATTERN) else {
        return ids;
    };

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
    {
        let path = entry.path();
        let is_media = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(is_media_extension);
        if !is_media {
            continue;
        }

        if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            && let Some(captures) = id_re.captures(stem)
        {
            ids.insert(captures[1].to_string());
        }
    }

    ids
}
