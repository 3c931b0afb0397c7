// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Saved user configuration, environment overrides, and the final resolved
//! settings. Precedence is command line, then `CWLOGS_*` environment
//! variables, then `~/.config/cwlogs/config.json`, then defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use cwlogs_forwarder::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL};
use cwlogs_forwarder::{DrainPolicy, ForwarderConfig};
use cwlogs_sinks::{CloudWatchConfig, HttpSinkConfig};

use crate::cli::{RunArgs, SinkKind};

const CONFIG_DIR: &str = ".config/cwlogs";
const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_PROFILE: &str = "default";
pub const DEFAULT_REGION: &str = "us-west-2";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to get home directory")]
    NoHomeDir,

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Contents of `~/.config/cwlogs/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub log_group: String,
    #[serde(default)]
    pub profile: String,
    #[serde(default)]
    pub region: String,
}

pub fn config_path() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Returns `Ok(None)` when the file does not exist yet.
pub fn load_from(path: &Path) -> Result<Option<FileConfig>, ConfigError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn save_to(path: &Path, config: &FileConfig) -> Result<(), ConfigError> {
    let io_err = |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    let data = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, data).map_err(io_err)
}

/// `CWLOGS_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub log_group: Option<String>,
    pub profile: Option<String>,
    pub region: Option<String>,
    pub batch_size: Option<usize>,
    pub flush_interval_secs: Option<u64>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            log_group: non_empty_var("CWLOGS_LOG_GROUP"),
            profile: non_empty_var("CWLOGS_PROFILE"),
            region: non_empty_var("CWLOGS_REGION"),
            batch_size: parse_var("CWLOGS_BATCH_SIZE")?,
            flush_interval_secs: parse_var("CWLOGS_FLUSH_INTERVAL_SECS")?,
            log_level: non_empty_var("CWLOGS_LOG_LEVEL").map(|val| val.to_lowercase()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match non_empty_var(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkSettings {
    CloudWatch(CloudWatchConfig),
    Http(HttpSinkConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub sink: SinkSettings,
    pub forwarder: ForwarderConfig,
    /// Copy forwarded lines to stdout.
    pub echo: bool,
}

pub fn resolve(
    args: &RunArgs,
    env: &EnvOverrides,
    file: Option<FileConfig>,
) -> Result<Settings, ConfigError> {
    let file = file.unwrap_or_default();

    let batch_size = args
        .batch_size
        .or(env.batch_size)
        .unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size == 0 {
        return Err(ConfigError::Invalid {
            key: "batch size",
            value: "0".to_string(),
        });
    }
    let flush_interval = match args.flush_interval.or(env.flush_interval_secs) {
        Some(0) => {
            return Err(ConfigError::Invalid {
                key: "flush interval",
                value: "0".to_string(),
            })
        }
        Some(secs) => Duration::from_secs(secs),
        None => DEFAULT_FLUSH_INTERVAL,
    };
    let drain_policy = match args.await_in_flight {
        Some(secs) if secs > 0 => DrainPolicy::AwaitInFlight(Duration::from_secs(secs)),
        _ => DrainPolicy::Detach,
    };

    let sink = match args.sink {
        SinkKind::Cloudwatch => {
            let log_group = first_of([
                args.log_group.clone(),
                env.log_group.clone(),
                Some(file.log_group),
            ])
            .ok_or(ConfigError::Missing(
                "no log group configured; run `cwlogs setup` or set CWLOGS_LOG_GROUP",
            ))?;
            SinkSettings::CloudWatch(CloudWatchConfig {
                profile: first_of([args.profile.clone(), env.profile.clone(), Some(file.profile)]),
                region: first_of([args.region.clone(), env.region.clone(), Some(file.region)]),
                log_group,
                log_stream: args.stream.clone(),
            })
        }
        SinkKind::Http => {
            let endpoint = args
                .endpoint
                .clone()
                .filter(|e| !e.is_empty())
                .ok_or(ConfigError::Missing("the http sink requires --endpoint"))?;
            SinkSettings::Http(HttpSinkConfig {
                endpoint,
                token: args.token.clone(),
                timeout: DEFAULT_HTTP_TIMEOUT,
                compression_level: args.compress,
                https_proxy: env::var("HTTPS_PROXY").ok(),
            })
        }
    };

    Ok(Settings {
        sink,
        forwarder: ForwarderConfig {
            batch_size,
            flush_interval,
            drain_policy,
        },
        echo: !args.silent,
    })
}

fn first_of<const N: usize>(candidates: [Option<String>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.is_empty())
}
