use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
    extractor::parse_cookie_string,
    fetcher::{FetcherConfig, RetryPolicy},
    formats::SelectionPolicy,
};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_RATE_LIMIT_MAX: u32 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 15 * 60;
const DEFAULT_CACHE_TTL_SECONDS: u64 = 60 * 60;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;
const DEFAULT_FETCH_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_FETCH_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_AUTH_REFRESH_THRESHOLD: u64 = 3;

pub const COOKIES_ENV: &str = "YT_COOKIES";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid origin in ALLOWED_ORIGINS: {0}. Use values like https://example.com")]
    InvalidOrigin(String),
    #[error("invalid PROXY_URL: {0}")]
    InvalidProxy(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedOrigins {
    Any,
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub environment: String,
    pub allowed_origins: AllowedOrigins,
    pub ytdlp_path: String,
    pub trust_proxy_headers: bool,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
    pub fetch: FetcherConfig,
    pub selection: SelectionPolicy,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |name: &str| {
            lookup(name).and_then(|value| non_empty(&value).map(ToString::to_string))
        };
        let number = |name: &str| text(name).and_then(|value| value.parse::<u64>().ok());

        let proxy = text("PROXY_URL")
            .map(|value| {
                Url::parse(&value)
                    .map(|_| value.clone())
                    .map_err(|_| ConfigError::InvalidProxy(value))
            })
            .transpose()?;

        let defaults = SelectionPolicy::default();
        let selection = SelectionPolicy {
            preferred_codec: text("PREFERRED_CODEC").unwrap_or(defaults.preferred_codec),
            high_threshold_kbps: text("HIGH_BITRATE_THRESHOLD_KBPS")
                .and_then(|value| value.parse::<f64>().ok())
                .filter(|value| value.is_finite() && *value >= 0.0)
                .unwrap_or(defaults.high_threshold_kbps),
            allowed_containers: text("ALLOWED_CONTAINERS")
                .map(|value| split_list(&value))
                .filter(|list| !list.is_empty()),
        };

        let fetch = FetcherConfig {
            retry: RetryPolicy {
                attempts: number("FETCH_ATTEMPTS")
                    .filter(|value| *value > 0)
                    .map(|value| value.min(u64::from(u32::MAX)) as u32)
                    .unwrap_or(RetryPolicy::default().attempts),
                delay: Duration::from_millis(
                    number("FETCH_RETRY_DELAY_MS").unwrap_or(DEFAULT_FETCH_RETRY_DELAY_MS),
                ),
            },
            timeout: Duration::from_secs(
                number("FETCH_TIMEOUT_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECONDS),
            ),
            proxy,
            cookies: text(COOKIES_ENV)
                .map(|value| parse_cookie_string(&value))
                .unwrap_or_default(),
            refresh_threshold: number("AUTH_REFRESH_THRESHOLD")
                .unwrap_or(DEFAULT_AUTH_REFRESH_THRESHOLD),
        };

        Ok(Self {
            bind_addr: resolve_bind_addr(text("APP_ADDR"), text("PORT")),
            environment: text("APP_ENV").unwrap_or_else(|| "development".to_string()),
            allowed_origins: parse_allowed_origins(text("ALLOWED_ORIGINS").as_deref())?,
            ytdlp_path: text("YT_DLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            trust_proxy_headers: text("TRUST_PROXY_HEADERS")
                .and_then(|value| parse_bool(&value))
                .unwrap_or(false),
            rate_limit_max: number("RATE_LIMIT_MAX")
                .filter(|value| *value > 0)
                .map(|value| value.min(u64::from(u32::MAX)) as u32)
                .unwrap_or(DEFAULT_RATE_LIMIT_MAX),
            rate_limit_window: Duration::from_secs(
                number("RATE_LIMIT_WINDOW_SECONDS")
                    .filter(|value| *value > 0)
                    .unwrap_or(DEFAULT_RATE_LIMIT_WINDOW_SECONDS),
            ),
            cache_ttl: Duration::from_secs(
                number("CACHE_TTL_SECONDS").unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            ),
            cache_max_entries: number("CACHE_MAX_ENTRIES")
                .filter(|value| *value > 0)
                .map(|value| value as usize)
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            fetch,
            selection,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

fn resolve_bind_addr(app_addr: Option<String>, port: Option<String>) -> String {
    if let Some(configured) = app_addr {
        return configured;
    }

    if let Some(port) = port.and_then(|value| value.parse::<u16>().ok()) {
        return format!("0.0.0.0:{port}");
    }

    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn parse_allowed_origins(raw: Option<&str>) -> Result<AllowedOrigins, ConfigError> {
    let origins = raw.map(split_list).unwrap_or_default();
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return Ok(AllowedOrigins::Any);
    }

    let mut normalized = Vec::with_capacity(origins.len());
    for origin in origins {
        let value = normalize_origin(&origin).ok_or(ConfigError::InvalidOrigin(origin))?;
        if !normalized.contains(&value) {
            normalized.push(value);
        }
    }

    Ok(AllowedOrigins::List(normalized))
}

pub fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let scheme = parsed.scheme();
    let default_port = match scheme {
        "http" => 80,
        "https" => 443,
        _ => return None,
    };

    if parsed.path() != "/" || parsed.query().is_some() || parsed.fragment().is_some() {
        return None;
    }

    match parsed.port() {
        Some(port) if port != default_port => Some(format!("{scheme}://{host}:{port}")),
        _ => Some(format!("{scheme}://{host}")),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}
