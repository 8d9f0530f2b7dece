use std::env::VarError;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use reqwest::header::HeaderValue;
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

pub const BACKEND_URL_ENV: &str = "NUTRITRACK_BACKEND_URL";
pub const BACKEND_KEY_ENV: &str = "NUTRITRACK_BACKEND_KEY";
pub const COOKIE_SECURE_ENV: &str = "NUTRITRACK_COOKIE_SECURE";

#[derive(Debug, Default, Parser)]
#[command(
    name = "nutritrack",
    version,
    about = "Personal nutrition tracker over a hosted auth/row-store backend"
)]
pub struct Cli {
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<SocketAddr>,

    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use the in-process backend instead of the hosted one.
    #[arg(long)]
    pub in_memory: bool,

    /// Accounts to create in the in-process backend.
    #[arg(long, value_name = "FILE", requires = "in_memory")]
    pub seed_users: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Remote { url: Url, api_key: String },
    Memory {
        seed_users: Option<PathBuf>,
        session_ttl: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub backend: BackendConfig,
    pub cookie_secure: bool,
    pub public_paths: Vec<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config in {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("required environment variable {key} is not set")]
    MissingEnv { key: &'static str },
    #[error("environment variable {key} is not valid unicode")]
    NonUnicodeEnv { key: &'static str },
    #[error("invalid backend url {value}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("invalid boolean value for env var {key}: {value}")]
    InvalidEnvBool { key: String, value: String },
    #[error("invalid duration for {key}: {value}")]
    InvalidDuration { key: &'static str, value: String },
    #[error("environment variable {key} is not a valid header value")]
    InvalidApiKey { key: &'static str },
    #[error("public path {0} must start with '/'")]
    InvalidPublicPath(String),
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    bind: Option<SocketAddr>,
    backend_url: Option<String>,
    cookie_secure: Option<bool>,
    #[serde(default)]
    public_paths: Vec<String>,
    request_timeout: Option<String>,
    session_ttl: Option<String>,
    seed_users: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        Self::from_sources(cli, |key| std::env::var(key))
    }

    /// Merge CLI flags, the optional TOML file and the environment. CLI wins over the file;
    /// the backend key only comes from the environment.
    pub fn from_sources<F>(cli: Cli, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let from_file = read_file_config(cli.config.as_deref())?;

        let bind = cli
            .bind
            .or(from_file.bind)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));
        let request_timeout = parse_duration(
            "request_timeout",
            from_file.request_timeout.as_deref().unwrap_or("10s"),
        )?;

        let backend = if cli.in_memory {
            BackendConfig::Memory {
                seed_users: cli.seed_users.or(from_file.seed_users),
                session_ttl: parse_duration(
                    "session_ttl",
                    from_file.session_ttl.as_deref().unwrap_or("1h"),
                )?,
            }
        } else {
            let raw_url = match read_env(&env, BACKEND_URL_ENV)? {
                Some(value) => value,
                None => from_file.backend_url.ok_or(ConfigError::MissingEnv {
                    key: BACKEND_URL_ENV,
                })?,
            };
            let url = raw_url
                .trim()
                .parse::<Url>()
                .map_err(|err| ConfigError::InvalidUrl {
                    value: raw_url.clone(),
                    reason: err.to_string(),
                })?;
            let api_key = read_env(&env, BACKEND_KEY_ENV)?
                .filter(|value| !value.trim().is_empty())
                .ok_or(ConfigError::MissingEnv {
                    key: BACKEND_KEY_ENV,
                })?;
            if HeaderValue::from_str(&api_key).is_err() {
                return Err(ConfigError::InvalidApiKey {
                    key: BACKEND_KEY_ENV,
                });
            }
            BackendConfig::Remote { url, api_key }
        };

        let cookie_secure = match read_env(&env, COOKIE_SECURE_ENV)? {
            Some(value) => parse_bool_value(COOKIE_SECURE_ENV, &value)?,
            None => from_file.cookie_secure.unwrap_or(false),
        };

        if let Some(bad) = from_file
            .public_paths
            .iter()
            .find(|path| !path.starts_with('/'))
        {
            return Err(ConfigError::InvalidPublicPath(bad.clone()));
        }

        Ok(Self {
            bind,
            backend,
            cookie_secure,
            public_paths: from_file.public_paths,
            request_timeout,
        })
    }
}

fn read_file_config(path: Option<&Path>) -> Result<FileConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(FileConfig::default());
    };

    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

fn read_env<F>(env: &F, key: &'static str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match env(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NonUnicodeEnv { key }),
    }
}

fn parse_duration(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw.trim()).map_err(|_| ConfigError::InvalidDuration {
        key,
        value: String::from(raw),
    })
}

fn parse_bool_value(key: &str, raw: &str) -> Result<bool, ConfigError> {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnvBool {
            key: String::from(key),
            value: String::from(raw),
        }),
    }
}
