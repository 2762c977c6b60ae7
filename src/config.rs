use crate::poller::QueryErrorPolicy;
use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const DEFAULT_INTERVAL_SECS: u64 = 5;
const DEFAULT_OUTPUT: &str = "gpu_memory_log.csv";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Append per-GPU memory usage to a CSV log at a fixed interval.
#[derive(Parser, Debug, Default)]
#[command(name = "gpu-track", version)]
pub struct Cli {
    /// Seconds between samples [default: 5]
    #[arg(short, long, value_name = "SECS", env = "GPU_TRACK_INTERVAL_SECS")]
    pub interval: Option<u64>,

    /// CSV log to write [default: gpu_memory_log.csv]
    #[arg(short, long, value_name = "PATH", env = "GPU_TRACK_OUTPUT")]
    pub output: Option<PathBuf>,

    /// What to do when querying the devices fails [default: skip]
    #[arg(long, value_enum, value_name = "POLICY")]
    pub on_query_error: Option<QueryErrorPolicy>,

    /// Continue an existing log instead of truncating it
    #[arg(long, overrides_with = "no_resume")]
    pub resume: bool,

    /// Truncate the log even if the config file sets `resume`
    #[arg(long, overrides_with = "resume")]
    pub no_resume: bool,

    /// Stop after this many ticks
    #[arg(long, value_name = "N")]
    pub ticks: Option<u64>,

    /// JSON file with defaults for the options above
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Cli {
    // `--resume` / `--no-resume`, whichever came last
    fn resume_flag(&self) -> Option<bool> {
        match (self.resume, self.no_resume) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Deserialize, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub interval_secs: Option<u64>,
    pub output: Option<PathBuf>,
    pub on_query_error: Option<QueryErrorPolicy>,
    pub resume: Option<bool>,
    pub ticks: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interval: Duration,
    pub output: PathBuf,
    pub on_query_error: QueryErrorPolicy,
    pub resume: bool,
    pub max_ticks: Option<u64>,
}

impl Config {
    /// Command line over config file over built-in defaults.
    pub fn resolve(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(cli, file)
    }

    fn merge(cli: Cli, file: FileConfig) -> Result<Self, ConfigError> {
        let interval_secs = cli
            .interval
            .or(file.interval_secs)
            .unwrap_or(DEFAULT_INTERVAL_SECS);
        if interval_secs == 0 {
            return Err(ConfigError::Zero("interval"));
        }

        let max_ticks = cli.ticks.or(file.ticks);
        if max_ticks == Some(0) {
            return Err(ConfigError::Zero("ticks"));
        }

        let resume = cli.resume_flag().or(file.resume).unwrap_or(false);

        Ok(Self {
            interval: Duration::from_secs(interval_secs),
            output: cli
                .output
                .or(file.output)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT)),
            on_query_error: cli
                .on_query_error
                .or(file.on_query_error)
                .unwrap_or_default(),
            resume,
            max_ticks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = Config::merge(Cli::default(), FileConfig::default()).unwrap();
        assert_eq!(
            config,
            Config {
                interval: Duration::from_secs(5),
                output: PathBuf::from("gpu_memory_log.csv"),
                on_query_error: QueryErrorPolicy::Skip,
                resume: false,
                max_ticks: None,
            }
        );
    }

    #[test]
    fn parses_command_line() {
        let cli = Cli::try_parse_from([
            "gpu-track",
            "--interval",
            "2",
            "--output",
            "/tmp/gpu.csv",
            "--on-query-error",
            "fail",
            "--resume",
            "--ticks",
            "10",
        ])
        .unwrap();
        let config = Config::merge(cli, FileConfig::default()).unwrap();

        assert_eq!(config.interval, Duration::from_secs(2));
        assert_eq!(config.output, PathBuf::from("/tmp/gpu.csv"));
        assert_eq!(config.on_query_error, QueryErrorPolicy::Fail);
        assert!(config.resume);
        assert_eq!(config.max_ticks, Some(10));
    }

    #[test]
    fn command_line_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gpu-track.json");
        fs::write(
            &path,
            r#"{"interval_secs": 30, "output": "from-file.csv", "on_query_error": "fail"}"#,
        )
        .unwrap();

        let cli = Cli {
            interval: Some(1),
            config: Some(path),
            ..Cli::default()
        };
        let config = Config::resolve(cli).unwrap();

        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.output, PathBuf::from("from-file.csv"));
        assert_eq!(config.on_query_error, QueryErrorPolicy::Fail);
    }

    #[test]
    fn no_resume_overrides_file() {
        let file = FileConfig {
            resume: Some(true),
            ..FileConfig::default()
        };
        let cli = Cli::try_parse_from(["gpu-track", "--no-resume"]).unwrap();
        assert!(!Config::merge(cli, file).unwrap().resume);

        let file = FileConfig {
            resume: Some(true),
            ..FileConfig::default()
        };
        assert!(Config::merge(Cli::default(), file).unwrap().resume);
    }

    #[test]
    fn last_resume_flag_wins() {
        let cli = Cli::try_parse_from(["gpu-track", "--resume", "--no-resume"]).unwrap();
        assert_eq!(cli.resume_flag(), Some(false));

        let cli = Cli::try_parse_from(["gpu-track", "--no-resume", "--resume"]).unwrap();
        assert_eq!(cli.resume_flag(), Some(true));
    }

    #[test]
    fn rejects_zero_interval() {
        let cli = Cli {
            interval: Some(0),
            ..Cli::default()
        };
        let err = Config::merge(cli, FileConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "interval must be greater than zero");
    }

    #[test]
    fn rejects_zero_ticks_from_file() {
        let file = FileConfig {
            ticks: Some(0),
            ..FileConfig::default()
        };
        assert!(matches!(
            Config::merge(Cli::default(), file),
            Err(ConfigError::Zero("ticks"))
        ));
    }

    #[test]
    fn unknown_keys_in_file_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"intervall": 3}"#).unwrap();

        let err = FileConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_is_reported_with_its_path() {
        let err = FileConfig::load(Path::new("/nonexistent/gpu-track.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/gpu-track.json"));
    }
}
