//! Process configuration read from the environment.
//!
//! | Key | Default | Meaning |
//! |---|---|---|
//! | `HOST` | `0.0.0.0` | bind host |
//! | `PORT` | `3000` | bind port |
//! | `APP_ENV` | `development` | `production` hides internal error detail |
//! | `REQUEST_TIMEOUT_SECS` | `30` | per-request deadline, answered with 408 |
//! | `RATE_LIMIT_MAX` | `100` | requests per client per window |
//! | `RATE_LIMIT_WINDOW_MS` | `900000` | window length (15 minutes), 1 ms to 1 day |
//! | `RATE_LIMIT_MAX_CLIENTS` | `10000` | in-memory store capacity |
//! | `CORS_ALLOWED_ORIGINS` | empty | comma-separated origin allow-list |
//! | `MAX_BODY_BYTES` | `10485760` | request body limit (10 MiB), answered with 413 |
//!
//! A `.env` file in the working directory is loaded first when present.

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Longest accepted `RATE_LIMIT_WINDOW_MS`.
const MAX_RATE_LIMIT_WINDOW_MS: u64 = 24 * 60 * 60 * 1000;

/// Deployment mode. Production hides internal causes from clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    /// Reads `APP_ENV`. Anything other than `production` is development.
    pub fn from_env() -> Self {
        Self::parse(std::env::var("APP_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("production") => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

/// Rate-limit settings for the default middleware stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_millis(15 * 60 * 1000),
            max_clients: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub request_timeout: Duration,
    pub rate_limit: RateLimitConfig,
    pub cors_allowed_origins: Vec<String>,
    pub max_body_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 3000,
            environment: Environment::Development,
            request_timeout: Duration::from_secs(30),
            rate_limit: RateLimitConfig::default(),
            cors_allowed_origins: Vec::new(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, Error> {
        // A missing .env file is the normal case outside local development.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let defaults = Self::default();

        let window_ms = parse_or(
            &lookup,
            "RATE_LIMIT_WINDOW_MS",
            defaults.rate_limit.window.as_millis() as u64,
        )?;
        if !(1..=MAX_RATE_LIMIT_WINDOW_MS).contains(&window_ms) {
            return Err(Error::Config {
                key: "RATE_LIMIT_WINDOW_MS",
                reason: format!("`{window_ms}`: must be between 1 and {MAX_RATE_LIMIT_WINDOW_MS}"),
            });
        }

        let rate_limit = RateLimitConfig {
            max_requests: parse_or(&lookup, "RATE_LIMIT_MAX", defaults.rate_limit.max_requests)?,
            window: Duration::from_millis(window_ms),
            max_clients: parse_or(&lookup, "RATE_LIMIT_MAX_CLIENTS", defaults.rate_limit.max_clients)?,
        };
        if rate_limit.max_clients == 0 {
            return Err(Error::Config {
                key: "RATE_LIMIT_MAX_CLIENTS",
                reason: "must be at least 1".to_owned(),
            });
        }

        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: lookup("HOST").unwrap_or(defaults.host),
            port: parse_or(&lookup, "PORT", defaults.port)?,
            environment: Environment::parse(lookup("APP_ENV").as_deref()),
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            rate_limit,
            cors_allowed_origins,
            max_body_bytes: parse_or(&lookup, "MAX_BODY_BYTES", defaults.max_body_bytes)?,
        })
    }

    /// `host:port`, ready for [`Server::bind`](crate::Server::bind).
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| Error::Config {
            key,
            reason: format!("`{raw}`: {e}"),
        }),
    }
}
