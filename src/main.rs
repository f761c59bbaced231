use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::TcpListener;
use tracing::{info, warn};

use tubetap::{
    AppState, Config, build_router,
    config::COOKIES_ENV,
    extractor::YoutubeExtractor,
    fetcher::{EnvCookieRefresher, Fetcher},
    routes::build_cors_layer,
};

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tubetap=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = Config::from_env().map_err(|error| error.to_string())?;

    let mut http_client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS));
    if let Some(proxy) = &config.fetch.proxy {
        let proxy = reqwest::Proxy::all(proxy)
            .map_err(|error| format!("Could not configure PROXY_URL: {error}"))?;
        http_client = http_client.proxy(proxy);
    }
    let http_client = http_client
        .build()
        .map_err(|error| format!("Could not build HTTP client: {error}"))?;

    if !config.trust_proxy_headers {
        warn!("TRUST_PROXY_HEADERS=false: rate limiting keys on the socket address.");
    }
    if config.fetch.cookies.is_empty() {
        warn!("{COOKIES_ENV} is not set. Requests go out without cookies.");
    } else {
        info!(cookies = config.fetch.cookies.len(), "cookie jar loaded");
    }
    if config.fetch.proxy.is_some() {
        info!("outbound requests use the configured proxy");
    }

    let extractor = Arc::new(YoutubeExtractor::new(
        config.ytdlp_path.clone(),
        http_client,
    ));
    let fetcher = Fetcher::new(extractor, config.fetch.clone())
        .with_refresher(Arc::new(EnvCookieRefresher::new(COOKIES_ENV)));
    let state = AppState::new(&config, fetcher);

    let cors = build_cors_layer(&config.allowed_origins);
    let app = build_router(state, cors);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|error| format!("Could not bind {}: {error}", config.bind_addr))?;

    info!(
        environment = %config.environment,
        production = config.is_production(),
        "server listening on http://{}",
        config.bind_addr
    );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| format!("HTTP server error: {error}"))
}
