use std::{sync::Arc, time::Instant};

use tokio::sync::Mutex;

use crate::{
    cache::ResponseCache, config::Config, fetcher::Fetcher, formats::SelectionPolicy,
    rate_limit::RateLimiter,
};

/// Process context shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub fetcher: Arc<Fetcher>,
    pub cache: Arc<Mutex<ResponseCache>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub selection: Arc<SelectionPolicy>,
    pub trust_proxy_headers: bool,
    pub environment: Arc<str>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &Config, fetcher: Fetcher) -> Self {
        Self {
            fetcher: Arc::new(fetcher),
            cache: Arc::new(Mutex::new(ResponseCache::new(
                to_chrono(config.cache_ttl),
                config.cache_max_entries,
            ))),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                config.rate_limit_max,
                to_chrono(config.rate_limit_window),
            ))),
            selection: Arc::new(config.selection.clone()),
            trust_proxy_headers: config.trust_proxy_headers,
            environment: Arc::from(config.environment.as_str()),
            started_at: Instant::now(),
        }
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365))
}
