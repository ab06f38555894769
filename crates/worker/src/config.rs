//! Batch configuration.
//!
//! Values are looked up in three layers, first match wins:
//!
//! 1. `KEY=value` command-line arguments
//! 2. process environment (a local `.env` is loaded into it at startup)
//! 3. `~/.encbatch/batch.env`
//!
//! | Key                     | Default     |
//! |-------------------------|-------------|
//! | `ENCODING_API_URL`      | required    |
//! | `TARGET_QUEUE_SIZE`     | `3`         |
//! | `MAX_RETRIES`           | `2`         |
//! | `POLL_INTERVAL_SECS`    | `10`        |
//! | `REQUEST_PAUSE_MS`      | `300`       |
//! | `THROTTLE_TIMEOUT_SECS` | unset       |
//! | `REQUEST_TIMEOUT_SECS`  | `30`        |
//! | `JOBS_FILE`             | unset       |
//! | `INPUT_FILE_PATH`       | required without `JOBS_FILE` |
//! | `OUTPUT_BASE_PATH`      | `output`    |
//! | `JOB_COUNT`             | `6`         |
//! | `RUN_MODE`              | `batch`     |
//! | `LOG_FORMAT`            | `text`      |

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use encbatch_core::poll::PollOptions;
use encbatch_core::retry::{RetryPolicy, DEFAULT_MAX_RETRIES};

const DEFAULT_TARGET_QUEUE_SIZE: usize = 3;
const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
const DEFAULT_REQUEST_PAUSE_MS: u64 = 300;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_OUTPUT_BASE_PATH: &str = "output";
const DEFAULT_JOB_COUNT: usize = 6;

/// Location of the per-user configuration file, relative to `$HOME`.
const USER_CONFIG_FILE: &str = ".encbatch/batch.env";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Command-line argument '{0}' is not of the form KEY=value")]
    Argument(String),

    #[error("Failed to read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// How jobs are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Keep the remote queue topped up and run many jobs at once.
    Batch,
    /// Submit one job and wait for it before submitting the next.
    Sequential,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(Self::Batch),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("unknown run mode '{other}', expected batch or sequential")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected text or json")),
        }
    }
}

/// Where the job list comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSource {
    /// JSON array of job descriptors.
    File(PathBuf),
    /// `count` jobs named `encoding1..=count` over the same input.
    Generated {
        input_path: String,
        output_base_path: String,
        count: usize,
    },
}

/// Everything the worker needs for one batch run.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Base URL of the encoding service.
    pub api_url: String,
    /// Number of tasks to keep queued remotely.
    pub target_queue_size: usize,
    /// Retry budget per job.
    pub max_retries: u32,
    /// Pause between scheduling rounds.
    pub poll_interval: Duration,
    /// Pause between two consecutive remote calls within a round.
    pub request_pause: Duration,
    /// Optional cap on how long a job may stay throttled.
    pub throttle_timeout: Option<Duration>,
    /// HTTP request timeout.
    pub request_timeout: Duration,
    pub jobs: JobSource,
    pub run_mode: RunMode,
    pub log_format: LogFormat,
}

impl BatchConfig {
    /// Load configuration from command-line overrides, the environment and
    /// the per-user file.
    pub fn load(args: impl IntoIterator<Item = String>) -> Result<Self, ConfigError> {
        let overrides = parse_overrides(args)?;
        let user_file = read_user_file()?;

        Self::from_lookup(|key| {
            overrides
                .get(key)
                .cloned()
                .or_else(|| std::env::var(key).ok())
                .or_else(|| user_file.get(key).cloned())
        })
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("ENCODING_API_URL").ok_or(ConfigError::Missing("ENCODING_API_URL"))?;

        let target_queue_size: usize =
            parse_or("TARGET_QUEUE_SIZE", get("TARGET_QUEUE_SIZE"), DEFAULT_TARGET_QUEUE_SIZE)?;
        if target_queue_size == 0 {
            return Err(ConfigError::Invalid {
                key: "TARGET_QUEUE_SIZE",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        let max_retries = parse_or("MAX_RETRIES", get("MAX_RETRIES"), DEFAULT_MAX_RETRIES)?;
        let poll_interval_secs = parse_or(
            "POLL_INTERVAL_SECS",
            get("POLL_INTERVAL_SECS"),
            DEFAULT_POLL_INTERVAL_SECS,
        )?;
        let request_pause_ms = parse_or(
            "REQUEST_PAUSE_MS",
            get("REQUEST_PAUSE_MS"),
            DEFAULT_REQUEST_PAUSE_MS,
        )?;
        let request_timeout_secs = parse_or(
            "REQUEST_TIMEOUT_SECS",
            get("REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let throttle_timeout = get("THROTTLE_TIMEOUT_SECS")
            .map(|v| parse_value::<u64>("THROTTLE_TIMEOUT_SECS", v))
            .transpose()?
            .map(Duration::from_secs);

        let jobs = match get("JOBS_FILE") {
            Some(path) => JobSource::File(PathBuf::from(path)),
            None => JobSource::Generated {
                input_path: get("INPUT_FILE_PATH").ok_or(ConfigError::Missing("INPUT_FILE_PATH"))?,
                output_base_path: get("OUTPUT_BASE_PATH")
                    .unwrap_or_else(|| DEFAULT_OUTPUT_BASE_PATH.to_string()),
                count: parse_or("JOB_COUNT", get("JOB_COUNT"), DEFAULT_JOB_COUNT)?,
            },
        };

        let run_mode = get("RUN_MODE")
            .map(|v| parse_value::<RunMode>("RUN_MODE", v))
            .transpose()?
            .unwrap_or(RunMode::Batch);
        let log_format = get("LOG_FORMAT")
            .map(|v| parse_value::<LogFormat>("LOG_FORMAT", v))
            .transpose()?
            .unwrap_or(LogFormat::Text);

        Ok(Self {
            api_url,
            target_queue_size,
            max_retries,
            poll_interval: Duration::from_secs(poll_interval_secs),
            request_pause: Duration::from_millis(request_pause_ms),
            throttle_timeout,
            request_timeout: Duration::from_secs(request_timeout_secs),
            jobs,
            run_mode,
            log_format,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries).with_throttle_timeout(self.throttle_timeout)
    }

    /// Polling used while waiting on a single job in sequential mode.
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval,
            ..Default::default()
        }
    }
}

/// Parse `KEY=value` arguments into a map.
pub fn parse_overrides(
    args: impl IntoIterator<Item = String>,
) -> Result<HashMap<String, String>, ConfigError> {
    args.into_iter()
        .map(|arg| match arg.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::Argument(arg)),
        })
        .collect()
}

/// Read `~/.encbatch/batch.env` if it exists.
fn read_user_file() -> Result<HashMap<String, String>, ConfigError> {
    let Some(home) = std::env::var_os("HOME") else {
        return Ok(HashMap::new());
    };
    let path = PathBuf::from(home).join(USER_CONFIG_FILE);
    if !path.is_file() {
        return Ok(HashMap::new());
    }

    let to_error = |source| ConfigError::File {
        path: path.clone(),
        source,
    };
    dotenvy::from_path_iter(&path)
        .map_err(to_error)?
        .map(|item| item.map_err(to_error))
        .collect()
}

fn parse_value<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_or<T>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.map_or(Ok(default), |v| parse_value(key, v))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn config(pairs: &[(&str, &str)]) -> Result<BatchConfig, ConfigError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BatchConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply() {
        let cfg = config(&[
            ("ENCODING_API_URL", "http://localhost:8080"),
            ("INPUT_FILE_PATH", "videos/sintel.mp4"),
        ])
        .unwrap();

        assert_eq!(cfg.target_queue_size, 3);
        assert_eq!(cfg.max_retries, 2);
        assert_eq!(cfg.poll_interval, Duration::from_secs(10));
        assert_eq!(cfg.request_pause, Duration::from_millis(300));
        assert_eq!(cfg.throttle_timeout, None);
        assert_eq!(cfg.run_mode, RunMode::Batch);
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(
            cfg.jobs,
            JobSource::Generated {
                input_path: "videos/sintel.mp4".into(),
                output_base_path: "output".into(),
                count: 6,
            }
        );
    }

    #[test]
    fn poll_options_follow_poll_interval() {
        let cfg = config(&[
            ("ENCODING_API_URL", "http://x"),
            ("INPUT_FILE_PATH", "in.mp4"),
            ("POLL_INTERVAL_SECS", "3"),
        ])
        .unwrap();
        let options = cfg.poll_options();
        assert_eq!(options.interval, Duration::from_secs(3));
        assert_eq!(options.timeout, PollOptions::default().timeout);
    }

    #[test]
    fn default_max_retries_matches_core_policy() {
        let cfg = config(&[
            ("ENCODING_API_URL", "http://x"),
            ("INPUT_FILE_PATH", "in.mp4"),
        ])
        .unwrap();
        assert_eq!(cfg.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn api_url_is_required() {
        assert_matches!(
            config(&[("INPUT_FILE_PATH", "in.mp4")]),
            Err(ConfigError::Missing("ENCODING_API_URL"))
        );
    }

    #[test]
    fn input_required_without_jobs_file() {
        assert_matches!(
            config(&[("ENCODING_API_URL", "http://x")]),
            Err(ConfigError::Missing("INPUT_FILE_PATH"))
        );
    }

    #[test]
    fn jobs_file_replaces_generated_jobs() {
        let cfg = config(&[
            ("ENCODING_API_URL", "http://x"),
            ("JOBS_FILE", "jobs.json"),
        ])
        .unwrap();
        assert_eq!(cfg.jobs, JobSource::File(PathBuf::from("jobs.json")));
    }

    #[test]
    fn zero_queue_size_rejected() {
        assert_matches!(
            config(&[
                ("ENCODING_API_URL", "http://x"),
                ("INPUT_FILE_PATH", "in.mp4"),
                ("TARGET_QUEUE_SIZE", "0"),
            ]),
            Err(ConfigError::Invalid { key: "TARGET_QUEUE_SIZE", .. })
        );
    }

    #[test]
    fn malformed_number_rejected() {
        assert_matches!(
            config(&[
                ("ENCODING_API_URL", "http://x"),
                ("INPUT_FILE_PATH", "in.mp4"),
                ("MAX_RETRIES", "-1"),
            ]),
            Err(ConfigError::Invalid { key: "MAX_RETRIES", .. })
        );
    }

    #[test]
    fn overrides_and_optional_values_parse() {
        let cfg = config(&[
            ("ENCODING_API_URL", "http://x"),
            ("INPUT_FILE_PATH", "in.mp4"),
            ("THROTTLE_TIMEOUT_SECS", "600"),
            ("RUN_MODE", "Sequential"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(cfg.throttle_timeout, Some(Duration::from_secs(600)));
        assert_eq!(cfg.run_mode, RunMode::Sequential);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(
            cfg.retry_policy().throttle_timeout,
            Some(Duration::from_secs(600))
        );
    }

    #[test]
    fn unknown_run_mode_rejected() {
        assert_matches!(
            config(&[
                ("ENCODING_API_URL", "http://x"),
                ("INPUT_FILE_PATH", "in.mp4"),
                ("RUN_MODE", "parallel"),
            ]),
            Err(ConfigError::Invalid { key: "RUN_MODE", .. })
        );
    }

    #[test]
    fn cli_overrides_parse() {
        let args = vec!["MAX_RETRIES=5".to_string(), "OUTPUT_BASE_PATH=a=b".to_string()];
        let map = parse_overrides(args).unwrap();
        assert_eq!(map["MAX_RETRIES"], "5");
        assert_eq!(map["OUTPUT_BASE_PATH"], "a=b");
    }

    #[test]
    fn cli_argument_without_equals_rejected() {
        assert_matches!(
            parse_overrides(vec!["--verbose".to_string()]),
            Err(ConfigError::Argument(_))
        );
    }
}
