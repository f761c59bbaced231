//! Metadata fetcher: disguised extractor calls with fixed-delay retry.

use std::{
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    error::FetchError,
    extractor::{
        AudioStream, ExtractError, Extractor, RelatedVideo, RequestProfile, VideoInfo,
        parse_cookie_string,
    },
    video_id::VideoId,
};

pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Mobile/15E148 Safari/604.1",
];

const UNAVAILABLE_MARKERS: [&str; 6] = [
    "video unavailable",
    "private video",
    "is private",
    "not available",
    "has been removed",
    "does not exist",
];

const BLOCKED_MARKERS: [&str; 5] = [
    "sign in to confirm",
    "sign-in required",
    "not a bot",
    "captcha",
    "unusual traffic",
];

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub retry: RetryPolicy,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub cookies: Vec<(String, String)>,
    /// Auth failures tolerated before the refresher runs; 0 disables it.
    pub refresh_threshold: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
            proxy: None,
            cookies: Vec::new(),
            refresh_threshold: 3,
        }
    }
}

#[derive(Debug, Error)]
#[error("credential refresh failed: {0}")]
pub struct RefreshError(pub String);

/// Supplies a fresh cookie jar when the upstream keeps flagging requests.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh(&self) -> Result<Vec<(String, String)>, RefreshError>;
}

/// Re-reads the cookie string from an environment variable.
pub struct EnvCookieRefresher {
    variable: String,
}

impl EnvCookieRefresher {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
        }
    }
}

#[async_trait]
impl CredentialRefresher for EnvCookieRefresher {
    async fn refresh(&self) -> Result<Vec<(String, String)>, RefreshError> {
        let raw = std::env::var(&self.variable)
            .map_err(|_| RefreshError(format!("{} is not set", self.variable)))?;
        let cookies = parse_cookie_string(&raw);
        if cookies.is_empty() {
            return Err(RefreshError(format!(
                "{} contains no usable cookies",
                self.variable
            )));
        }
        Ok(cookies)
    }
}

pub struct Fetcher {
    extractor: Arc<dyn Extractor>,
    retry: RetryPolicy,
    timeout: Duration,
    proxy: Option<String>,
    cookies: RwLock<Vec<(String, String)>>,
    refresh_threshold: u64,
    refresher: Option<Arc<dyn CredentialRefresher>>,
    auth_failures: AtomicU64,
    last_cookie_refresh: Mutex<Option<DateTime<Utc>>>,
}

impl Fetcher {
    pub fn new(extractor: Arc<dyn Extractor>, config: FetcherConfig) -> Self {
        Self {
            extractor,
            retry: config.retry,
            timeout: config.timeout,
            proxy: config.proxy,
            cookies: RwLock::new(config.cookies),
            refresh_threshold: config.refresh_threshold,
            refresher: None,
            auth_failures: AtomicU64::new(0),
            last_cookie_refresh: Mutex::new(None),
        }
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    pub async fn last_cookie_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_cookie_refresh.lock().await
    }

    pub async fn profile(&self) -> RequestProfile {
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0])
            .to_string();

        RequestProfile {
            user_agent,
            cookies: self.cookies.read().await.clone(),
            proxy: self.proxy.clone(),
            timeout: self.timeout,
        }
    }

    pub async fn video_info(&self, id: &VideoId) -> Result<VideoInfo, FetchError> {
        let extractor = &self.extractor;
        self.with_retry("video_info", id, |profile| async move {
            extractor.video_info(id, &profile).await
        })
        .await
    }

    pub async fn related_videos(&self, id: &VideoId) -> Result<Vec<RelatedVideo>, FetchError> {
        let extractor = &self.extractor;
        self.with_retry("related_videos", id, |profile| async move {
            extractor.related_videos(id, &profile).await
        })
        .await
    }

    pub async fn open_stream(&self, id: &VideoId, url: &str) -> Result<AudioStream, FetchError> {
        let extractor = &self.extractor;
        self.with_retry("open_stream", id, |profile| async move {
            extractor.open_stream(url, &profile).await
        })
        .await
    }

    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        id: &VideoId,
        call: F,
    ) -> Result<T, FetchError>
    where
        F: Fn(RequestProfile) -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let max_attempts = self.retry.attempts.max(1);
        let mut attempt = 0;

        let last_error = loop {
            attempt += 1;
            let profile = self.profile().await;
            let error = match call(profile).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !is_retryable(&error) || attempt >= max_attempts {
                break error;
            }

            warn!(
                operation,
                video_id = %id,
                attempt,
                max_attempts,
                delay_ms = self.retry.delay.as_millis() as u64,
                error = %error,
                "retrying after extractor failure"
            );
            tokio::time::sleep(self.retry.delay).await;
        };

        let failure = classify(&last_error, attempt);
        warn!(operation, video_id = %id, attempt, error = %failure, "extractor call failed");
        if matches!(failure, FetchError::UpstreamBlocked(_)) {
            self.record_auth_failure().await;
        }
        Err(failure)
    }

    async fn record_auth_failure(&self) {
        let failures = self.auth_failures.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(auth_failures = failures, "upstream flagged the request as automated");

        if self.refresh_threshold > 0 && failures >= self.refresh_threshold {
            self.refresh_credentials().await;
        }
    }

    /// Swaps in a new cookie jar from the configured refresher, if any.
    pub async fn refresh_credentials(&self) -> bool {
        let Some(refresher) = &self.refresher else {
            return false;
        };

        match refresher.refresh().await {
            Ok(cookies) => {
                let count = cookies.len();
                *self.cookies.write().await = cookies;
                *self.last_cookie_refresh.lock().await = Some(Utc::now());
                self.auth_failures.store(0, Ordering::Relaxed);
                info!(cookies = count, "cookie jar refreshed");
                true
            }
            Err(error) => {
                warn!(%error, "cookie jar refresh skipped");
                false
            }
        }
    }
}

fn is_unavailable_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    UNAVAILABLE_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_blocked_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    BLOCKED_MARKERS.iter().any(|marker| lower.contains(marker))
}

fn is_retryable(error: &ExtractError) -> bool {
    match error {
        ExtractError::Launch(_) => false,
        ExtractError::Upstream(message) => !is_unavailable_message(message),
        ExtractError::Status { status } => !matches!(*status, 404 | 410),
        _ => true,
    }
}

pub fn classify(error: &ExtractError, attempts: u32) -> FetchError {
    match error {
        ExtractError::Upstream(message) if is_unavailable_message(message) => {
            FetchError::UpstreamUnavailable(message.clone())
        }
        ExtractError::Upstream(message) if is_blocked_message(message) => {
            FetchError::UpstreamBlocked(message.clone())
        }
        ExtractError::Upstream(message) => FetchError::GenericFailure(message.clone()),
        ExtractError::Status { status: 404 | 410 } => {
            FetchError::UpstreamUnavailable(error.to_string())
        }
        ExtractError::Status { status: 403 | 429 } => {
            FetchError::UpstreamBlocked(error.to_string())
        }
        ExtractError::Status { status } if *status >= 500 => FetchError::TransientFetchFailure {
            attempts,
            message: error.to_string(),
        },
        ExtractError::Timeout(_) | ExtractError::Transport(_) => {
            FetchError::TransientFetchFailure {
                attempts,
                message: error.to_string(),
            }
        }
        ExtractError::Status { .. } | ExtractError::Launch(_) | ExtractError::Decode(_) => {
            FetchError::GenericFailure(error.to_string())
        }
    }
}
