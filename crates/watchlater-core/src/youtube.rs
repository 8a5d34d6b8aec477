//! YouTube Data API v3 client for the Watch Later playlist.
//!
//! Uses the blocking `reqwest` client, so every method here (construction
//! included) must run on a blocking thread, never directly inside an async
//! task.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, FileSystemError, Result};
use crate::playlist::PlaylistSource;
use crate::video::{UNKNOWN_TITLE, VideoDescriptor, watch_url};

/// Base URL of the YouTube Data API.
pub const API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

/// Special playlist ID the API accepts for Watch Later.
pub const WATCH_LATER_PLAYLIST_ID: &str = "WL";

/// Largest page the API returns.
const PAGE_SIZE: &str = "50";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Google's OAuth token endpoint, used when the token file names none.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Refresh this many seconds before the recorded expiry.
const EXPIRY_MARGIN_SECONDS: i64 = 60;

/// Supplies bearer tokens for API requests.
pub trait TokenProvider: Send + Sync {
    /// Current access token, refreshed first if it is known to have expired.
    fn access_token(&self) -> Result<String>;

    /// Obtain a new access token after the API rejected the current one.
    fn refresh(&self) -> Result<String> {
        Err(ApiError::Authentication("Token refresh is not supported".to_string()).into())
    }
}

/// OAuth token file as written by Google's client libraries.
///
/// Accepts both the `token` field of the Python client and a plain
/// `access_token`. Refreshing needs `refresh_token`, `client_id` and
/// `client_secret`; `token_uri` defaults to Google's endpoint.
#[derive(Debug, Default, Deserialize)]
struct StoredToken {
    token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    token_uri: Option<String>,
    expiry: Option<String>,
}

impl StoredToken {
    fn current(&self) -> Option<&str> {
        self.token
            .as_deref()
            .or(self.access_token.as_deref())
            .filter(|token| !token.trim().is_empty())
    }

    fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expiry.as_deref().and_then(parse_expiry)
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at()
            .is_some_and(|expiry| expiry - TimeDelta::seconds(EXPIRY_MARGIN_SECONDS) <= now)
    }

    fn can_refresh(&self) -> bool {
        self.refresh_token.is_some() && self.client_id.is_some() && self.client_secret.is_some()
    }
}

/// Response of the token endpoint for a refresh grant.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

/// Reads the access token from a stored OAuth token file and refreshes it
/// through the token endpoint when it expires or is rejected.
///
/// A refreshed token and its expiry are written back to the file, so the next
/// run starts with a valid token. Obtaining the initial grant is left to
/// external tooling.
pub struct FileTokenProvider {
    path: PathBuf,
    http: Client,
    refresh_lock: Mutex<()>,
}

impl FileTokenProvider {
    /// Create a provider for the token file at `path`, refreshing through `http`.
    pub fn new(path: impl Into<PathBuf>, http: Client) -> Self {
        Self {
            path: path.into(),
            http,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Token file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            ApiError::Authentication(format!(
                "Cannot read OAuth token {}: {e}",
                self.path.display()
            ))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ApiError::Authentication(format!(
                "Malformed OAuth token {}: {e}",
                self.path.display()
            ))
            .into()
        })
    }

    fn request_refresh(&self, stored: &StoredToken) -> Result<RefreshResponse> {
        let (Some(refresh_token), Some(client_id), Some(client_secret)) = (
            stored.refresh_token.as_deref(),
            stored.client_id.as_deref(),
            stored.client_secret.as_deref(),
        ) else {
            return Err(ApiError::Authentication(format!(
                "OAuth token {} cannot be refreshed: refresh_token, client_id and client_secret are required",
                self.path.display()
            ))
            .into());
        };
        let token_uri = stored.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);

        info!("Refreshing OAuth access token");
        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", client_id),
                ("client_secret", client_secret),
            ])
            .send()
            .map_err(|e| ApiError::Transport(format!("POST {token_uri}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| ApiError::Transport(format!("Reading token response: {e}")))?;
        if !status.is_success() {
            return Err(ApiError::Authentication(format!(
                "Token refresh failed (HTTP {}): {}",
                status.as_u16(),
                body.trim()
            ))
            .into());
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("token response: {e}")).into())
    }

    /// Merge the refreshed token into the stored document, keeping every
    /// field we do not manage, and replace the file atomically.
    fn write_back(&self, refreshed: &RefreshResponse, now: DateTime<Utc>) -> Result<()> {
        let content = fs::read_to_string(&self.path).map_err(|e| FileSystemError::ReadFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        let mut document: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&content)?;

        let key = if document.contains_key("token") || !document.contains_key("access_token") {
            "token"
        } else {
            "access_token"
        };
        document.insert(key.to_string(), refreshed.access_token.clone().into());
        if let Some(lifetime) = refreshed.expires_in.and_then(TimeDelta::try_seconds) {
            let expiry = now + lifetime;
            document.insert(
                "expiry".to_string(),
                expiry.to_rfc3339_opts(SecondsFormat::Micros, true).into(),
            );
        }
        if let Some(refresh_token) = &refreshed.refresh_token {
            document.insert("refresh_token".to_string(), refresh_token.clone().into());
        }

        let write_failed = |e: std::io::Error| FileSystemError::WriteFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".token.")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(write_failed)?;
        temp.write_all(serde_json::to_string_pretty(&document)?.as_bytes())
            .map_err(write_failed)?;
        temp.persist(&self.path).map_err(|e| write_failed(e.error))?;
        Ok(())
    }
}

impl TokenProvider for FileTokenProvider {
    fn access_token(&self) -> Result<String> {
        let stored = self.read()?;
        if stored.is_expired(Utc::now()) && stored.can_refresh() {
            debug!("OAuth access token expired, refreshing");
            return self.refresh();
        }

        stored.current().map(str::to_string).ok_or_else(|| {
            ApiError::Authentication(format!("No access token in {}", self.path.display())).into()
        })
    }

    fn refresh(&self) -> Result<String> {
        let _guard = self
            .refresh_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let stored = self.read()?;
        let refreshed = self.request_refresh(&stored)?;
        if let Err(e) = self.write_back(&refreshed, Utc::now()) {
            warn!("Could not save refreshed OAuth token: {}", e);
        }
        info!("OAuth access token refreshed");
        Ok(refreshed.access_token)
    }
}

/// Parse a stored expiry: RFC 3339, or the naive UTC form Google's Python
/// client writes (`2024-05-01T12:00:00.123456`).
fn parse_expiry(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|expiry| expiry.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

// Response shapes. Only the fields we read are declared.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    next_page_token: Option<String>,
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    total_results: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    content_details: Option<ChannelContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: Option<RelatedPlaylists>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelatedPlaylists {
    watch_later: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    snippet: Option<TitleSnippet>,
}

#[derive(Debug, Deserialize)]
struct TitleSnippet {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemResource {
    id: String,
    content_details: Option<PlaylistItemDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemDetails {
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    snippet: Option<VideoSnippet>,
    content_details: Option<VideoContentDetails>,
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    title: Option<String>,
    channel_title: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    view_count: Option<String>,
}

/// Watch Later access through the YouTube Data API.
pub struct YouTubeApiClient {
    http: Client,
    base_url: String,
    tokens: Box<dyn TokenProvider>,
    playlist_id: OnceLock<String>,
}

impl YouTubeApiClient {
    /// Create a client using `tokens` for authorization.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Transport`] if the HTTP client cannot be built.
    pub fn new(tokens: Box<dyn TokenProvider>) -> Result<Self> {
        Ok(Self::with_http(build_http_client()?, tokens))
    }

    fn with_http(http: Client, tokens: Box<dyn TokenProvider>) -> Self {
        Self {
            http,
            base_url: API_BASE_URL.to_string(),
            tokens,
            playlist_id: OnceLock::new(),
        }
    }

    /// Create a client reading its token from the OAuth token file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token file holds no usable token (and cannot
    /// be refreshed) or the HTTP client cannot be built.
    pub fn from_token_file(path: impl Into<PathBuf>) -> Result<Self> {
        let http = build_http_client()?;
        let provider = FileTokenProvider::new(path, http.clone());
        // Fail early with a clear message rather than on the first request.
        provider.access_token()?;
        Ok(Self::with_http(http, Box::new(provider)))
    }

    /// Point the client at a different API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Resolve the Watch Later playlist ID, caching it for the client's lifetime.
    ///
    /// Tries the channel's related playlists first, then the special `WL`
    /// ID, then the user's playlists by title.
    pub fn watch_later_playlist_id(&self) -> Result<String> {
        if let Some(id) = self.playlist_id.get() {
            return Ok(id.clone());
        }
        let id = self.resolve_watch_later_id()?;
        Ok(self.playlist_id.get_or_init(|| id).clone())
    }

    fn resolve_watch_later_id(&self) -> Result<String> {
        let channels: ListResponse<ChannelResource> = self.get_json(
            "channels",
            &[("part", "contentDetails"), ("mine", "true")],
        )?;
        if let Some(id) = channels
            .items
            .into_iter()
            .next()
            .and_then(|channel| channel.content_details)
            .and_then(|details| details.related_playlists)
            .and_then(|related| related.watch_later)
            .filter(|id| !id.is_empty())
        {
            info!("Found Watch Later playlist ID from channel: {}", id);
            return Ok(id);
        }

        info!("Trying special Watch Later playlist ID: {}", WATCH_LATER_PLAYLIST_ID);
        match self.get_json::<ListResponse<PlaylistItemResource>>(
            "playlistItems",
            &[
                ("part", "id"),
                ("playlistId", WATCH_LATER_PLAYLIST_ID),
                ("maxResults", "1"),
            ],
        ) {
            Ok(_) => return Ok(WATCH_LATER_PLAYLIST_ID.to_string()),
            Err(crate::Error::Api(ApiError::Http { status: 404, .. })) => {
                warn!("Watch Later playlist '{}' not accessible", WATCH_LATER_PLAYLIST_ID);
            }
            Err(e) => warn!("Error accessing '{}' playlist: {}", WATCH_LATER_PLAYLIST_ID, e),
        }

        info!("Searching for Watch Later playlist in user's playlists...");
        let playlists: ListResponse<PlaylistResource> = self.get_json(
            "playlists",
            &[("part", "id,snippet"), ("mine", "true"), ("maxResults", PAGE_SIZE)],
        )?;
        find_watch_later(&playlists.items).ok_or_else(|| {
            error!("Watch Later playlist not found using any method");
            ApiError::PlaylistNotFound.into()
        })
    }

    fn get_json<T: DeserializeOwned>(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<T> {
        let body = self
            .send(Method::GET, endpoint, query)?
            .text()
            .map_err(|e| ApiError::Transport(format!("Reading {endpoint} response: {e}")))?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::Decode(format!("{endpoint}: {e}")).into())
    }

    fn delete(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<()> {
        self.send(Method::DELETE, endpoint, query)?;
        Ok(())
    }

    /// Send an authorized request, refreshing the token once on a 401.
    fn send(&self, method: Method, endpoint: &str, query: &[(&str, &str)]) -> Result<Response> {
        let token = self.tokens.access_token()?;
        let response = self.send_with(method.clone(), endpoint, query, &token)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response);
        }

        warn!("Access token rejected by {}, refreshing", endpoint);
        match self.tokens.refresh() {
            Ok(token) => check_status(self.send_with(method, endpoint, query, &token)?),
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                check_status(response)
            }
        }
    }

    fn send_with(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<Response> {
        let url = format!("{}/{endpoint}", self.base_url);
        self.http
            .request(method.clone(), &url)
            .bearer_auth(token)
            .query(query)
            .send()
            .map_err(|e| ApiError::Transport(format!("{method} {endpoint}: {e}")).into())
    }

    fn video_details(&self, ids: &[String]) -> Result<HashMap<String, VideoResource>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = ids.join(",");
        let response: ListResponse<VideoResource> = self.get_json(
            "videos",
            &[("part", "snippet,contentDetails,statistics"), ("id", &joined)],
        )?;
        Ok(response
            .items
            .into_iter()
            .map(|video| (video.id.clone(), video))
            .collect())
    }
}

impl PlaylistSource for YouTubeApiClient {
    fn fetch_videos(&self) -> Result<Vec<VideoDescriptor>> {
        info!("Starting to fetch Watch Later playlist...");
        let playlist_id = self.watch_later_playlist_id()?;

        let mut videos = Vec::new();
        let mut position: u32 = 0;
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("part", "snippet,contentDetails"),
                ("playlistId", playlist_id.as_str()),
                ("maxResults", PAGE_SIZE),
            ];
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }
            let page: ListResponse<PlaylistItemResource> =
                self.get_json("playlistItems", &query)?;

            if page.items.is_empty() {
                let total = page
                    .page_info
                    .and_then(|info| info.total_results)
                    .unwrap_or(0);
                if total > 0 {
                    warn!("API reports {} total items but returned none", total);
                } else if videos.is_empty() {
                    warn!("Watch Later playlist appears to be empty");
                }
                break;
            }

            let ids: Vec<String> = page
                .items
                .iter()
                .filter_map(|item| item.content_details.as_ref())
                .map(|details| details.video_id.clone())
                .collect();
            debug!("Found {} video IDs in this page", ids.len());

            let details = self.video_details(&ids)?;
            if details.len() < ids.len() {
                warn!(
                    "Only {} out of {} videos had details (some may be private or deleted)",
                    details.len(),
                    ids.len()
                );
            }

            for video_id in &ids {
                position += 1;
                match details.get(video_id) {
                    Some(resource) => videos.push(descriptor_from_resource(resource, position)),
                    None => warn!("Video details not found for ID: {}", video_id),
                }
            }

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
            info!("Fetched {} videos so far...", videos.len());
        }

        info!("Fetched {} videos from Watch Later playlist", videos.len());
        Ok(videos)
    }

    fn remove_video(&self, video_id: &str) -> Result<bool> {
        let playlist_id = self.watch_later_playlist_id()?;
        let items: ListResponse<PlaylistItemResource> = self.get_json(
            "playlistItems",
            &[
                ("part", "id"),
                ("playlistId", playlist_id.as_str()),
                ("videoId", video_id),
                ("maxResults", "1"),
            ],
        )?;

        let Some(item) = items.items.into_iter().next() else {
            warn!("Video {} not found in Watch Later playlist", video_id);
            return Ok(false);
        };

        self.delete("playlistItems", &[("id", item.id.as_str())])?;
        info!("Removed video {} from Watch Later playlist", video_id);
        Ok(true)
    }
}

fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::Transport(format!("Failed to create HTTP client: {e}")).into())
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response
        .text()
        .ok()
        .filter(|body| !body.trim().is_empty())
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("no details").to_string());

    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized {
            status: status.as_u16(),
            message,
        },
        _ => ApiError::Http {
            status: status.as_u16(),
            message,
        },
    }
    .into())
}

fn find_watch_later(playlists: &[PlaylistResource]) -> Option<String> {
    playlists
        .iter()
        .find(|playlist| {
            playlist.id == WATCH_LATER_PLAYLIST_ID
                || playlist
                    .snippet
                    .as_ref()
                    .is_some_and(|s| s.title.to_lowercase().contains("watch later"))
        })
        .map(|playlist| {
            info!("Found Watch Later playlist: {}", playlist.id);
            playlist.id.clone()
        })
}

fn descriptor_from_resource(resource: &VideoResource, index: u32) -> VideoDescriptor {
    let snippet = resource.snippet.as_ref();
    let title = snippet
        .and_then(|s| s.title.clone())
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    VideoDescriptor {
        index: Some(index),
        id: resource.id.clone(),
        title,
        url: watch_url(&resource.id),
        duration: resource
            .content_details
            .as_ref()
            .and_then(|details| details.duration.as_deref())
            .map(parse_iso8601_duration),
        uploader: snippet.and_then(|s| s.channel_title.clone()),
        view_count: resource
            .statistics
            .as_ref()
            .and_then(|stats| stats.view_count.as_deref())
            .and_then(|count| count.parse().ok()),
        published_at: snippet.and_then(|s| s.published_at.clone()),
    }
}

/// Parse an ISO-8601 duration such as `PT1H2M10S` into seconds.
///
/// Missing components count as zero, days and weeks are honored, and
/// anything unparsable yields zero.
pub fn parse_iso8601_duration(value: &str) -> u64 {
    let Some(rest) = value.trim().strip_prefix('P') else {
        return 0;
    };

    let mut total: u64 = 0;
    let mut number: u64 = 0;
    let mut in_time = false;

    for c in rest.chars() {
        if let Some(digit) = c.to_digit(10) {
            number = number.saturating_mul(10).saturating_add(u64::from(digit));
            continue;
        }
        let unit = match (c, in_time) {
            ('T', _) => {
                in_time = true;
                number = 0;
                continue;
            }
            ('W', false) => 604_800,
            ('D', false) => 86_400,
            ('H', true) => 3_600,
            ('M', true) => 60,
            ('S', true) => 1,
            _ => 0,
        };
        total = total.saturating_add(number.saturating_mul(unit));
        number = 0;
    }

    total
}
