//! Command-line arguments.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use watchlater_core::config::DEFAULT_CONFIG_PATH;
use watchlater_core::{AppConfig, RunMode};

/// Usage text printed by `--help` and after argument errors.
pub const USAGE: &str = "\
Download the videos in your YouTube Watch Later playlist.

Usage: watchlater [OPTIONS]

Options:
      --config <PATH>        Configuration file [default: ./config/settings.json]
      --fetch-only           Only fetch the playlist, do not download
      --download-only        Only download from the cached playlist, do not fetch
      --audio-only           Download audio only
      --audio-format <FMT>   Audio format (mp3, m4a, opus, ... or best)
  -v, --verbose              Debug output on the console
  -h, --help                 Print help
  -V, --version              Print version";

/// Argument parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgsError {
    /// A flag that takes a value was last on the line.
    #[error("{0} requires a value")]
    MissingValue(&'static str),

    /// Unrecognized flag or stray positional argument.
    #[error("unknown argument: {0}")]
    Unknown(String),

    /// Both `--fetch-only` and `--download-only`.
    #[error("--fetch-only and --download-only cannot be used together")]
    ConflictingModes,
}

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Perform a run.
    Run(CliArgs),
    /// Print usage.
    Help,
    /// Print the version.
    Version,
}

/// Options for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    /// Configuration file.
    pub config: PathBuf,
    /// Run mode.
    pub mode: RunMode,
    /// Force audio-only downloads.
    pub audio_only: bool,
    /// Audio format override.
    pub audio_format: Option<String>,
    /// Debug-level console output.
    pub verbose: bool,
}

impl Default for CliArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG_PATH),
            mode: RunMode::Full,
            audio_only: false,
            audio_format: None,
            verbose: false,
        }
    }
}

impl CliArgs {
    /// Parse the process arguments.
    pub fn parse() -> Result<Command, ArgsError> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Command, ArgsError> {
        Self::from_iter(values.iter().map(|value| (*value).to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Command, ArgsError>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut fetch_only = false;
        let mut download_only = false;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--config=") {
                parsed.config = PathBuf::from(value);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--audio-format=") {
                parsed.audio_format = Some(value.to_string());
                continue;
            }

            match arg.as_str() {
                "-h" | "--help" => return Ok(Command::Help),
                "-V" | "--version" => return Ok(Command::Version),
                "--config" => {
                    let value = args.next().ok_or(ArgsError::MissingValue("--config"))?;
                    parsed.config = PathBuf::from(value);
                }
                "--audio-format" => {
                    let value = args
                        .next()
                        .ok_or(ArgsError::MissingValue("--audio-format"))?;
                    parsed.audio_format = Some(value);
                }
                "--fetch-only" => fetch_only = true,
                "--download-only" => download_only = true,
                "--audio-only" => parsed.audio_only = true,
                "-v" | "--verbose" => parsed.verbose = true,
                _ => return Err(ArgsError::Unknown(arg)),
            }
        }

        parsed.mode = match (fetch_only, download_only) {
            (true, true) => return Err(ArgsError::ConflictingModes),
            (true, false) => RunMode::FetchOnly,
            (false, true) => RunMode::DownloadOnly,
            (false, false) => RunMode::Full,
        };

        Ok(Command::Run(parsed))
    }

    /// Apply command-line overrides to the loaded configuration.
    pub fn apply(&self, config: &mut AppConfig) {
        if self.audio_only {
            config.audio_only = true;
        }
        if let Some(format) = &self.audio_format {
            config.audio_format.clone_from(format);
        }
    }
}
