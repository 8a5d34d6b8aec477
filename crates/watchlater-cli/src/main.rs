//! Watchlater - download the videos in your YouTube Watch Later playlist.

mod args;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tracing::{error, info, warn};
use watchlater_core::{
    AppConfig, DownloadScheduler, PlaylistSession, RunMode, TrackerStore, YouTubeApiClient,
    YtDlpFetcher,
};

use crate::args::{CliArgs, Command, USAGE};
use crate::logging::LoggingConfig;

/// Exit code for argument errors.
const USAGE_ERROR: u8 = 2;

fn main() -> ExitCode {
    let args = match CliArgs::parse() {
        Ok(Command::Run(args)) => args,
        Ok(Command::Help) => {
            println!("{USAGE}");
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("watchlater {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("error: {e}\n\n{USAGE}");
            return ExitCode::from(USAGE_ERROR);
        }
    };

    let mut config = match AppConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!(
                "Please create a configuration file at {}",
                args.config.display()
            );
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut config);

    let _guard = match logging::init(&LoggingConfig::new(&config.log_file).verbose(args.verbose)) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("YouTube Watch Later Downloader - Starting");

    let Some(session) = build_session(&config, args.mode) else {
        return ExitCode::FAILURE;
    };

    let runtime = match build_runtime() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let finished = runtime.block_on(until_interrupted(
        session.run(args.mode),
        tokio::signal::ctrl_c(),
    ));

    match finished {
        Some(Ok(report)) => {
            if report.removed_from_watch_later > 0 {
                info!(
                    "Removed {} videos from Watch Later",
                    report.removed_from_watch_later
                );
            }
            info!("Done");
            ExitCode::SUCCESS
        }
        Some(Err(e)) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
        None => {
            warn!("Download interrupted by user");
            // In-flight downloads are abandoned rather than awaited.
            runtime.shutdown_background();
            ExitCode::FAILURE
        }
    }
}

/// Wire the core components together. Logs and returns `None` on failure.
fn build_session(config: &AppConfig, mode: RunMode) -> Option<PlaylistSession> {
    let options = match config.download_options() {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            return None;
        }
    };

    let scheduler = DownloadScheduler::new(
        Arc::new(YtDlpFetcher::new(&config.ytdlp_path)),
        Arc::new(TrackerStore::new(&config.tracker_file)),
        options,
    )
    .with_max_concurrent(config.max_concurrent_downloads)
    .with_resume(config.resume_downloads);

    let mut session = PlaylistSession::new(scheduler, &config.playlist_data_file)
        .with_auto_clean(config.auto_clean_watch_later);

    if mode.needs_source() {
        info!("Authenticating with YouTube Data API...");
        // Built outside the async runtime: the blocking HTTP client cannot be
        // created from within one.
        match YouTubeApiClient::from_token_file(&config.oauth_token_file) {
            Ok(client) => {
                info!("Authentication successful");
                session = session.with_source(Arc::new(client));
            }
            Err(e) => {
                error!("Authentication failed: {}", e);
                error!(
                    "Authorize with the OAuth client in {} and store the token at {}",
                    config.oauth_credentials_file.display(),
                    config.oauth_token_file.display()
                );
                return None;
            }
        }
    }

    Some(session)
}

/// Drive `run` to completion unless `interrupt` fires first.
///
/// Returns `None` when interrupted. If the interrupt listener itself fails,
/// the run continues without one.
async fn until_interrupted<F, I>(run: F, interrupt: I) -> Option<F::Output>
where
    F: Future,
    I: Future<Output = std::io::Result<()>>,
{
    tokio::pin!(run);
    tokio::select! {
        output = &mut run => Some(output),
        signal = interrupt => match signal {
            Ok(()) => None,
            Err(e) => {
                warn!("Cannot listen for Ctrl-C, continuing without it: {}", e);
                Some(run.await)
            }
        },
    }
}

fn build_runtime() -> std::io::Result<Runtime> {
    Builder::new_multi_thread()
        .thread_name("watchlater-worker")
        .enable_all()
        .build()
}
