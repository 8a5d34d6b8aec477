//! Integration tests for the download pipeline.
//!
//! These tests drive the tracker, prober, task and scheduler together
//! against temporary directories, with a scripted fetch engine standing in
//! for yt-dlp:
//! - Idempotent re-runs and resume filtering
//! - Retry and non-retry classification
//! - Output verification
//! - Tracker durability under concurrent writers

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;
use watchlater_core::{
    AppConfig, BatchSummary, DownloadOptions, DownloadOutcome, DownloadScheduler, FailureKind,
    FetchError, FetchRequest, MediaFetcher, MediaMode, TrackerStore, VideoDescriptor,
    YtDlpFetcher,
};

// =============================================================================
// Test Fixtures and Utilities
// =============================================================================

/// How the scripted engine answers for one video.
#[derive(Debug, Clone)]
enum Script {
    /// Write `<stem>.<ext>` and succeed.
    Produce(&'static str),
    /// Fail with `message` for the first `n` calls, then produce an mp4.
    FailThenProduce(usize, &'static str),
    /// Always fail with `message`.
    AlwaysFail(&'static str),
    /// Report success without writing anything.
    Lie,
}

/// Fetch engine double that follows a per-video script and counts calls.
struct ScriptedFetcher {
    scripts: HashMap<String, Script>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold: Duration,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hold: Duration::ZERO,
        }
    }

    fn script(mut self, video_id: &str, script: Script) -> Self {
        self.scripts.insert(video_id.to_string(), script);
        self
    }

    fn holding(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    fn calls_for(&self, video_id: &str) -> usize {
        self.calls.lock().unwrap().get(video_id).copied().unwrap_or(0)
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

fn video_id_of(request: &FetchRequest) -> String {
    request
        .url
        .rsplit("v=")
        .next()
        .unwrap_or_default()
        .to_string()
}

fn produce(request: &FetchRequest, ext: &str) {
    fs::write(
        request.output_dir.join(format!("{}.{ext}", request.file_stem)),
        b"media bytes",
    )
    .unwrap();
}

impl MediaFetcher for ScriptedFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<(), FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let id = video_id_of(request);
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if !self.hold.is_zero() {
            thread::sleep(self.hold);
        }

        let result = match self.scripts.get(&id).cloned().unwrap_or(Script::Produce("mp4")) {
            Script::Produce(ext) => {
                produce(request, ext);
                Ok(())
            }
            Script::FailThenProduce(n, message) if call <= n => {
                Err(FetchError::classified(message))
            }
            Script::FailThenProduce(..) => {
                produce(request, "mp4");
                Ok(())
            }
            Script::AlwaysFail(message) => Err(FetchError::classified(message)),
            Script::Lie => Ok(()),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Download directory plus tracker file in one temporary root.
struct TestFixture {
    root: TempDir,
    tracker: Arc<TrackerStore>,
}

impl TestFixture {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("videos")).unwrap();
        let tracker = Arc::new(TrackerStore::new(
            root.path().join("data").join("download_tracker.json"),
        ));
        Self { root, tracker }
    }

    fn videos_dir(&self) -> PathBuf {
        self.root.path().join("videos")
    }

    fn options(&self, retry_attempts: u32) -> DownloadOptions {
        DownloadOptions::new(self.videos_dir()).with_retry(retry_attempts, Duration::ZERO)
    }

    fn scheduler(&self, fetcher: &Arc<ScriptedFetcher>, retry_attempts: u32) -> DownloadScheduler {
        DownloadScheduler::new(
            Arc::clone(fetcher) as Arc<dyn MediaFetcher>,
            Arc::clone(&self.tracker),
            self.options(retry_attempts),
        )
    }
}

fn descriptor(id: &str, title: &str, index: u32) -> VideoDescriptor {
    VideoDescriptor::new(id, title).with_index(index)
}

fn counts(summary: &BatchSummary) -> (usize, usize, usize, usize) {
    (
        summary.total,
        summary.successful,
        summary.failed,
        summary.skipped,
    )
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// =============================================================================
// Scheduler Workflows
// =============================================================================

#[tokio::test]
async fn test_retry_then_succeed_scenario() {
    init_tracing();
    let fixture = TestFixture::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("AAAAAAAAAAA", Script::FailThenProduce(2, "HTTP Error 503")),
    );

    let summary = fixture
        .scheduler(&fetcher, 3)
        .run(vec![descriptor("AAAAAAAAAAA", "Talk", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 1, 0, 0));
    assert_eq!(fetcher.calls_for("AAAAAAAAAAA"), 3);

    let expected = fixture.videos_dir().join("0001 - Talk.mp4");
    assert!(expected.is_file());
    let record = fixture.tracker.record("AAAAAAAAAAA").unwrap();
    assert_eq!(record.filepath, Some(expected));
    assert_eq!(record.file_size, Some(11));
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(ScriptedFetcher::new());
    let videos = vec![
        descriptor("AAAAAAAAAAA", "One", 1),
        descriptor("BBBBBBBBBBB", "Two", 2),
        descriptor("CCCCCCCCCCC", "Three", 3),
    ];

    let first = fixture.scheduler(&fetcher, 3).run(videos.clone()).await;
    assert_eq!(counts(&first), (3, 3, 0, 0));
    assert_eq!(fetcher.total_calls(), 3);

    let second = fixture.scheduler(&fetcher, 3).run(videos.clone()).await;
    assert_eq!(counts(&second), (3, 0, 0, 3));
    assert_eq!(fetcher.total_calls(), 3, "no fetch on the second run");

    // Without resume filtering every video still resolves to a skip inside the task.
    let third = fixture
        .scheduler(&fetcher, 3)
        .with_resume(false)
        .run(videos)
        .await;
    assert_eq!(counts(&third), (3, 0, 0, 3));
    assert!(third.results.iter().all(DownloadOutcome::is_skipped));
    assert_eq!(fetcher.total_calls(), 3);
}

#[tokio::test]
async fn test_one_of_two_already_tracked() {
    let fixture = TestFixture::new();
    fixture
        .tracker
        .mark_downloaded("AAAAAAAAAAA", "Old", None, None)
        .unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());

    let summary = fixture
        .scheduler(&fetcher, 3)
        .run(vec![
            descriptor("AAAAAAAAAAA", "Old", 1),
            descriptor("BBBBBBBBBBB", "New", 2),
        ])
        .await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.skipped, 1);
    assert!(summary.successful <= 1);
    assert_eq!(fetcher.total_calls(), 1);
    assert_eq!(fetcher.calls_for("AAAAAAAAAAA"), 0);
}

#[tokio::test]
async fn test_tracked_video_with_missing_file_is_not_refetched() {
    let fixture = TestFixture::new();
    let gone = fixture.videos_dir().join("0001 - Gone.mp4");
    fixture
        .tracker
        .mark_downloaded("AAAAAAAAAAA", "Gone", Some(&gone), Some(10))
        .unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());

    let summary = fixture
        .scheduler(&fetcher, 3)
        .with_resume(false)
        .run(vec![descriptor("AAAAAAAAAAA", "Gone", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 0, 1));
    assert_eq!(fetcher.total_calls(), 0);
    assert!(!gone.exists());
}

#[tokio::test]
async fn test_legacy_filenames_are_prefiltered() {
    let fixture = TestFixture::new();
    fs::write(
        fixture.videos_dir().join("Some old talk dQw4w9WgXcQ.mp4"),
        b"legacy",
    )
    .unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());

    let summary = fixture
        .scheduler(&fetcher, 3)
        .run(vec![descriptor("dQw4w9WgXcQ", "Some old talk", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 0, 1));
    assert!(summary.results.is_empty(), "pre-filtered videos are not dispatched");
    assert_eq!(fetcher.total_calls(), 0);
}

#[tokio::test]
async fn test_existing_file_registers_with_tracker() {
    let fixture = TestFixture::new();
    fs::write(fixture.videos_dir().join("0004 - Clip.mp4"), b"clip").unwrap();
    let fetcher = Arc::new(ScriptedFetcher::new());

    let summary = fixture
        .scheduler(&fetcher, 3)
        .run(vec![descriptor("DDDDDDDDDDD", "Clip", 4)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 0, 1));
    assert_eq!(fetcher.total_calls(), 0);
    assert!(fixture.tracker.is_downloaded("DDDDDDDDDDD"));
}

// =============================================================================
// Error Classification
// =============================================================================

#[tokio::test]
async fn test_private_video_is_attempted_exactly_once() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(ScriptedFetcher::new().script(
        "PPPPPPPPPPP",
        Script::AlwaysFail("ERROR: [youtube] PPPPPPPPPPP: Private video"),
    ));

    let summary = fixture
        .scheduler(&fetcher, 5)
        .run(vec![descriptor("PPPPPPPPPPP", "Secret", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 1, 0));
    assert_eq!(fetcher.calls_for("PPPPPPPPPPP"), 1);
    let failure = summary.results[0].error().unwrap();
    assert_eq!(failure.kind, FailureKind::Unavailable);
    assert_eq!(failure.message, "Video unavailable or private");
    assert!(!fixture.tracker.is_downloaded("PPPPPPPPPPP"));
}

#[tokio::test]
async fn test_transient_error_exhausts_retry_attempts() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new().script("TTTTTTTTTTT", Script::AlwaysFail("Read timed out.")),
    );

    let summary = fixture
        .scheduler(&fetcher, 4)
        .run(vec![descriptor("TTTTTTTTTTT", "Flaky", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 1, 0));
    assert_eq!(fetcher.calls_for("TTTTTTTTTTT"), 4);
    assert_eq!(summary.results[0].error().unwrap().message, "Read timed out.");
}

#[tokio::test]
async fn test_success_report_without_file_is_failure() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(ScriptedFetcher::new().script("LLLLLLLLLLL", Script::Lie));

    let summary = fixture
        .scheduler(&fetcher, 2)
        .run(vec![descriptor("LLLLLLLLLLL", "Phantom", 1)])
        .await;

    assert_eq!(counts(&summary), (1, 0, 1, 0));
    assert_eq!(fetcher.calls_for("LLLLLLLLLLL"), 2);
    assert_eq!(
        summary.results[0].error().unwrap().kind,
        FailureKind::Verification
    );
    assert!(!fixture.tracker.is_downloaded("LLLLLLLLLLL"));
}

#[tokio::test]
async fn test_failures_do_not_abort_batch() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .script("AAAAAAAAAAA", Script::AlwaysFail("Video unavailable"))
            .script("BBBBBBBBBBB", Script::AlwaysFail("Sign in to confirm your age"))
            .script("CCCCCCCCCCC", Script::Produce("mkv")),
    );

    let summary = fixture
        .scheduler(&fetcher, 2)
        .run(vec![
            descriptor("AAAAAAAAAAA", "A", 1),
            descriptor("BBBBBBBBBBB", "B", 2),
            descriptor("CCCCCCCCCCC", "C", 3),
        ])
        .await;

    assert_eq!(counts(&summary), (3, 1, 2, 0));
    let kinds: Vec<FailureKind> = summary
        .failures()
        .filter_map(|outcome| outcome.error().map(|e| e.kind))
        .collect();
    assert!(kinds.contains(&FailureKind::Unavailable));
    assert!(kinds.contains(&FailureKind::AuthRequired));
    assert!(fixture.videos_dir().join("0003 - C.mp4").is_file());
    assert!(!fixture.videos_dir().join("0003 - C.mkv").exists());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_pool_width_is_respected() {
    let fixture = TestFixture::new();
    let fetcher = Arc::new(ScriptedFetcher::new().holding(Duration::from_millis(50)));
    let videos: Vec<VideoDescriptor> = (1..=6)
        .map(|i| descriptor(&format!("VIDEO{i:06}"), &format!("Video {i}"), i))
        .collect();

    let summary = fixture
        .scheduler(&fetcher, 1)
        .with_max_concurrent(2)
        .run(videos)
        .await;

    assert_eq!(counts(&summary), (6, 6, 0, 0));
    assert!(fetcher.max_in_flight() <= 2);
    assert_eq!(fixture.tracker.load().len(), 6);
}

#[test]
fn test_concurrent_marks_lose_no_updates() {
    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(TrackerStore::new(dir.path().join("tracker.json")));

    thread::scope(|scope| {
        for i in 0..16 {
            let tracker = Arc::clone(&tracker);
            scope.spawn(move || {
                let id = format!("ID{i:09}");
                tracker
                    .mark_downloaded(&id, &format!("Video {i}"), None, Some(i))
                    .unwrap();
            });
        }
    });

    let map = tracker.load();
    assert_eq!(map.len(), 16);
    for i in 0..16 {
        assert!(tracker.is_downloaded(&format!("ID{i:09}")));
    }
}

#[test]
fn test_reader_never_sees_partial_document() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("tracker.json");
    let tracker = Arc::new(TrackerStore::new(&path));
    tracker.mark_downloaded("seed", "Seed", None, None).unwrap();

    thread::scope(|scope| {
        let writer = Arc::clone(&tracker);
        scope.spawn(move || {
            for i in 0..100 {
                writer
                    .mark_downloaded(&format!("w{i}"), &"x".repeat(200), None, None)
                    .unwrap();
            }
        });

        for _ in 0..200 {
            let raw = fs::read_to_string(&path).unwrap();
            assert!(
                serde_json::from_str::<serde_json::Value>(&raw).is_ok(),
                "observed a partial tracker document"
            );
        }
    });

    assert_eq!(tracker.load().len(), 101);
}

#[test]
fn test_crash_before_rename_keeps_previous_document() {
    let dir = TempDir::new().unwrap();
    let tracker = TrackerStore::new(dir.path().join("tracker.json"));
    tracker.mark_downloaded("keep", "Keep", None, None).unwrap();
    let before = fs::read(tracker.path()).unwrap();

    // What a writer killed between writing and renaming leaves behind.
    let stray = dir.path().join(".download_tracker.crashed.tmp");
    fs::write(&stray, br#"{"keep": {"video_id": "keep", "tit"#).unwrap();

    assert_eq!(fs::read(tracker.path()).unwrap(), before);
    assert_eq!(tracker.load().len(), 1);
    assert!(tracker.is_downloaded("keep"));

    tracker.mark_downloaded("next", "Next", None, None).unwrap();
    assert!(tracker.is_downloaded("keep"));
    assert!(tracker.is_downloaded("next"));
}

#[test]
fn test_failed_rename_reports_error_and_cleans_up() {
    let dir = TempDir::new().unwrap();
    let target = dir.path().join("tracker.json");
    // Renaming a file over a non-empty directory fails for every user.
    fs::create_dir(&target).unwrap();
    fs::write(target.join("occupied"), b"x").unwrap();
    let tracker = TrackerStore::new(&target);

    let result = tracker.mark_downloaded("lost", "Lost", None, None);

    assert!(result.is_err());
    assert!(target.join("occupied").is_file());
    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["tracker.json".to_string()]);
}

// =============================================================================
// Configuration to Scheduler
// =============================================================================

#[tokio::test]
async fn test_config_drives_audio_downloads() {
    let fixture = TestFixture::new();
    let config_path = fixture.root.path().join("settings.json");
    fs::write(
        &config_path,
        format!(
            r#"{{"download_path": {:?}, "audio_only": true, "audio_format": "mp3",
                "retry_attempts": 1, "retry_delay_seconds": 0}}"#,
            fixture.videos_dir().to_string_lossy()
        ),
    )
    .unwrap();

    let config = AppConfig::load(&config_path).unwrap();
    let options = config.download_options().unwrap();
    assert_eq!(options.mode, MediaMode::audio("mp3"));

    let fetcher = Arc::new(ScriptedFetcher::new().script("AAAAAAAAAAA", Script::Produce("mp3")));
    let summary = DownloadScheduler::new(
        Arc::clone(&fetcher) as Arc<dyn MediaFetcher>,
        Arc::clone(&fixture.tracker),
        options,
    )
    .run(vec![descriptor("AAAAAAAAAAA", "Song", 1)])
    .await;

    assert_eq!(counts(&summary), (1, 1, 0, 0));
    assert_eq!(
        summary.results[0].path(),
        Some(fixture.videos_dir().join("0001 - Song.mp3").as_path())
    );
}

fn yt_dlp_available() -> bool {
    std::process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

#[tokio::test]
#[ignore = "downloads from YouTube - run with: cargo test --ignored -- --nocapture"]
async fn test_real_download_with_yt_dlp() {
    init_tracing();
    if !yt_dlp_available() {
        eprintln!("yt-dlp not installed, skipping");
        return;
    }

    let dir = TempDir::new().unwrap();
    let tracker = Arc::new(TrackerStore::new(dir.path().join("tracker.json")));
    let options = DownloadOptions::new(dir.path())
        .with_mode(MediaMode::audio("best"))
        .with_retry(1, Duration::ZERO);

    let summary = DownloadScheduler::new(Arc::new(YtDlpFetcher::default()), tracker, options)
        .run(vec![descriptor("jNQXAC9IVRw", "Me at the zoo", 1)])
        .await;

    println!("{summary:#?}");
    assert_eq!(summary.total, 1);
    if let Some(path) = summary.results[0].path() {
        assert!(Path::new(path).is_file());
    }
}
