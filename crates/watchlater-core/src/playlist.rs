//! Watch Later listing: the source trait and the local cache file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{FileSystemError, Result};
use crate::video::VideoDescriptor;

/// Remote source of the Watch Later listing.
///
/// Implementations block on network I/O.
#[cfg_attr(test, mockall::automock)]
pub trait PlaylistSource: Send + Sync {
    /// Fetch every video in the playlist, in playlist order, with 1-based indices.
    fn fetch_videos(&self) -> Result<Vec<VideoDescriptor>>;

    /// Remove `video_id` from the playlist.
    ///
    /// Returns `false` if the video was not in the playlist.
    fn remove_video(&self, video_id: &str) -> Result<bool>;
}

/// Write the listing to `path` as a pretty-printed JSON array.
///
/// The file is replaced atomically; the parent directory is created if needed.
pub fn save_playlist(path: &Path, videos: &[VideoDescriptor]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(|e| FileSystemError::CreateDirFailed {
        path: parent.clone(),
        reason: e.to_string(),
    })?;

    let content = serde_json::to_string_pretty(videos)?;
    let write_failed = |e: std::io::Error| FileSystemError::WriteFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".playlist.")
        .suffix(".tmp")
        .tempfile_in(&parent)
        .map_err(write_failed)?;
    temp.write_all(content.as_bytes()).map_err(write_failed)?;
    temp.persist(path).map_err(|e| write_failed(e.error))?;

    info!("Saved {} videos to {}", videos.len(), path.display());
    Ok(())
}

/// Read the cached listing at `path`; a missing file is an empty listing.
pub fn load_playlist(path: &Path) -> Result<Vec<VideoDescriptor>> {
    if !path.exists() {
        debug!("No cached playlist at {}", path.display());
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(path).map_err(|e| FileSystemError::ReadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let videos: Vec<VideoDescriptor> = serde_json::from_str(&content)?;
    debug!("Loaded {} cached videos from {}", videos.len(), path.display());
    Ok(videos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::TempDir;

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("playlist.json");
        let mut video = VideoDescriptor::new("AAAAAAAAAAA", "Talk").with_index(1);
        video.duration = Some(3730);
        video.uploader = Some("Channel".to_string());

        save_playlist(&path, std::slice::from_ref(&video)).unwrap();
        assert_eq!(load_playlist(&path).unwrap(), vec![video]);

        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(load_playlist(&dir.path().join("none.json")).unwrap().is_empty());
    }

    #[test]
    fn test_cache_layout_and_missing_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playlist.json");
        fs::write(
            &path,
            r#"[{"index": 2, "id": "BBBBBBBBBBB", "title": "Clip",
                 "url": "https://www.youtube.com/watch?v=BBBBBBBBBBB",
                 "duration": null, "uploader": "Someone",
                 "view_count": 12, "published_at": "2024-03-01T10:00:00Z"},
                {"id": "CCCCCCCCCCC"}]"#,
        )
        .unwrap();

        let videos = load_playlist(&path).unwrap();
        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].index, Some(2));
        assert_eq!(videos[0].view_count, Some(12));
        assert_eq!(videos[1].title, "");
        assert_eq!(videos[1].source_url(), "https://www.youtube.com/watch?v=CCCCCCCCCCC");
    }

    #[test]
    fn test_corrupt_cache_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("playlist.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_playlist(&path), Err(Error::Serialization(_))));
    }
}
