use std::{collections::HashSet, future::Future, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{ConnectInfo, Path, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, Uri,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, RETRY_AFTER},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::Serialize;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{AllowedOrigins, normalize_origin},
    error::ApiError,
    extractor::RelatedVideo,
    formats::Selection,
    state::AppState,
    video_id::VideoId,
};

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SongResponse {
    id: String,
    title: String,
    duration: Option<u64>,
    thumbnail: Option<String>,
    formats: Selection,
    meta: SongMeta,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SongMeta {
    channel: Option<String>,
    channel_id: Option<String>,
    view_count: Option<u64>,
    is_live: bool,
    upload_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelatedResponse {
    video_id: String,
    related: Vec<RelatedVideo>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    environment: String,
    uptime: f64,
    memory_usage: MemoryUsage,
    auth_failures: u64,
    last_cookie_refresh: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MemoryUsage {
    resident_bytes: Option<u64>,
    cache_entries: usize,
    rate_limit_clients: usize,
}

pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/song/{id}", get(song))
        .route("/related/{id}", get(related))
        .route("/download/{id}", get(download))
        .fallback(not_found)
        .with_state(state)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub fn build_cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(cors::Any)
        .expose_headers([
            CONTENT_DISPOSITION,
            RETRY_AFTER,
            HeaderName::from_static("ratelimit-limit"),
            HeaderName::from_static("ratelimit-remaining"),
            HeaderName::from_static("ratelimit-reset"),
        ]);

    match origins {
        AllowedOrigins::Any => {
            info!("CORS open to every origin");
            layer.allow_origin(cors::Any)
        }
        AllowedOrigins::List(list) => {
            info!(
                "CORS allow-list loaded with {} origin(s): {:?}",
                list.len(),
                list
            );
            let allowed_origins: Arc<HashSet<String>> = Arc::new(list.iter().cloned().collect());
            layer.allow_origin(AllowOrigin::predicate(
                move |origin: &HeaderValue, _| {
                    let normalized = origin.to_str().ok().and_then(normalize_origin);
                    let allowed = normalized
                        .as_ref()
                        .is_some_and(|value| allowed_origins.contains(value));
                    debug!(
                        "CORS origin check raw={:?} normalized={:?} allowed={}",
                        origin, normalized, allowed
                    );
                    allowed
                },
            ))
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let cache_entries = state.cache.lock().await.len();
    let rate_limit_clients = state.rate_limiter.lock().await.tracked_clients();

    Json(HealthResponse {
        status: "ok",
        environment: state.environment.to_string(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        memory_usage: MemoryUsage {
            resident_bytes: resident_memory_bytes().await,
            cache_entries,
            rate_limit_clients,
        },
        auth_failures: state.fetcher.auth_failures(),
        last_cookie_refresh: state.fetcher.last_cookie_refresh().await,
    })
}

async fn song(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    Path(raw): Path<String>,
) -> Response {
    let cache_key = uri.path().to_string();
    guarded(&state, &headers, addr, &raw, |id| {
        song_response(&state, id, cache_key)
    })
    .await
}

async fn related(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    Path(raw): Path<String>,
) -> Response {
    let cache_key = uri.path().to_string();
    guarded(&state, &headers, addr, &raw, |id| {
        related_response(&state, id, cache_key)
    })
    .await
}

async fn download(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Response {
    guarded(&state, &headers, addr, &raw, |id| download_response(&state, id)).await
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("No route for {}", uri.path()))
}

/// Validates the id, then charges the client's quota before running `handler`.
async fn guarded<F, Fut>(
    state: &AppState,
    headers: &HeaderMap,
    addr: SocketAddr,
    raw: &str,
    handler: F,
) -> Response
where
    F: FnOnce(VideoId) -> Fut,
    Fut: Future<Output = Result<Response, ApiError>>,
{
    let id = match VideoId::parse(raw) {
        Ok(id) => id,
        Err(error) => {
            debug!(raw, "rejected malformed video id");
            return ApiError::fetch(error, raw).into_response();
        }
    };

    let client_ip = client_ip_for_request(state, headers, addr);
    let admission = state.rate_limiter.lock().await.admit(&client_ip);

    let mut response = if admission.allowed {
        handler(id)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    } else {
        warn!(client_ip, limit = admission.limit, "rate limit exceeded");
        ApiError::rate_limited(admission.limit, admission.reset_after_seconds()).into_response()
    };

    admission.apply_headers(response.headers_mut());
    response
}

async fn song_response(
    state: &AppState,
    id: VideoId,
    cache_key: String,
) -> Result<Response, ApiError> {
    if let Some(body) = cached_body(state, &cache_key).await {
        debug!(video_id = %id, "song served from cache");
        return Ok(json_body(body, true));
    }

    let info = state
        .fetcher
        .video_info(&id)
        .await
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;
    let formats = state
        .selection
        .select(&info.formats)
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;

    info!(
        video_id = %id,
        high = %formats.high.format_id,
        low = %formats.low.format_id,
        "audio formats selected"
    );

    let body = SongResponse {
        id: id.to_string(),
        title: info.title,
        duration: info.duration_seconds,
        thumbnail: info.thumbnail,
        formats,
        meta: SongMeta {
            channel: info.channel,
            channel_id: info.channel_id,
            view_count: info.view_count,
            is_live: info.is_live,
            upload_date: info.upload_date,
        },
    };

    store_json(state, cache_key, &body).await
}

async fn related_response(
    state: &AppState,
    id: VideoId,
    cache_key: String,
) -> Result<Response, ApiError> {
    if let Some(body) = cached_body(state, &cache_key).await {
        debug!(video_id = %id, "related videos served from cache");
        return Ok(json_body(body, true));
    }

    let related = state
        .fetcher
        .related_videos(&id)
        .await
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;

    let body = RelatedResponse {
        video_id: id.to_string(),
        related,
    };

    store_json(state, cache_key, &body).await
}

async fn download_response(state: &AppState, id: VideoId) -> Result<Response, ApiError> {
    let info = state
        .fetcher
        .video_info(&id)
        .await
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;
    let formats = state
        .selection
        .select(&info.formats)
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;
    let stream = state
        .fetcher
        .open_stream(&id, &formats.high.url)
        .await
        .map_err(|error| ApiError::fetch(error, id.as_str()))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("audio/mpeg"));
    let content_disposition = build_content_disposition(&format!("{}.mp3", info.title));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition)
            .map_err(|_| ApiError::internal("Could not build the download header."))?,
    );
    if let Some(length) = stream.content_length {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }

    info!(
        video_id = %id,
        format_id = %formats.high.format_id,
        bitrate = formats.high.bitrate,
        content_length = stream.content_length,
        "streaming audio download"
    );

    let video_id = id.to_string();
    let body = Body::from_stream(stream.body.inspect_err(move |error| {
        warn!(video_id = %video_id, %error, "upstream audio stream failed mid-transfer");
    }));

    Ok((headers, body).into_response())
}

async fn cached_body(state: &AppState, key: &str) -> Option<String> {
    state.cache.lock().await.get(key)
}

async fn store_json<T: Serialize>(
    state: &AppState,
    key: String,
    body: &T,
) -> Result<Response, ApiError> {
    let payload = serde_json::to_string(body)
        .map_err(|error| ApiError::internal(format!("Could not serialize response: {error}")))?;

    {
        let mut cache = state.cache.lock().await;
        let ttl = cache.ttl();
        cache.put(key, payload.clone(), ttl);
    }

    Ok(json_body(payload, false))
}

fn json_body(body: String, hit: bool) -> Response {
    let cache_status = if hit { "HIT" } else { "MISS" };
    (
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
            (X_CACHE, HeaderValue::from_static(cache_status)),
        ],
        body,
    )
        .into_response()
}

fn handle_panic(panic: Box<dyn std::any::Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(detail, "request handler panicked");
    ApiError::internal("Internal Server Error").into_response()
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let check_header = |key: &str| {
        headers
            .get(key)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
    };

    if let Some(forwarded) = check_header("x-forwarded-for") {
        let first_ip = forwarded
            .split(',')
            .next()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        if first_ip.is_some() {
            return first_ip;
        }
    }

    check_header("cf-connecting-ip").or_else(|| check_header("x-real-ip"))
}

fn client_ip_for_request(state: &AppState, headers: &HeaderMap, addr: SocketAddr) -> String {
    if state.trust_proxy_headers {
        extract_client_ip(headers).unwrap_or_else(|| addr.ip().to_string())
    } else {
        addr.ip().to_string()
    }
}

async fn resident_memory_bytes() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    parse_vm_rss(&status)
}

fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .map(|rest| rest.trim().trim_end_matches("kB").trim())
        .and_then(|kilobytes| kilobytes.parse::<u64>().ok())
        .map(|kilobytes| kilobytes * 1024)
}

pub fn build_content_disposition(filename: &str) -> String {
    let safe_ascii = sanitize_ascii_filename(filename);
    format!(
        "attachment; filename=\"{safe_ascii}\"; filename*=UTF-8''{}",
        encode_rfc5987(filename)
    )
}

/// Percent-encodes for an RFC 5987 `ext-value`, keeping `!`, `|`, `` ` `` and `^` literal.
pub fn encode_rfc5987(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%21", "!")
        .replace("%7C", "|")
        .replace("%60", "`")
        .replace("%5E", "^")
}

fn sanitize_ascii_filename(value: &str) -> String {
    let mut sanitized = String::with_capacity(value.len());

    for character in value.chars() {
        if character.is_ascii_alphanumeric()
            || matches!(character, '.' | '-' | '_' | ' ' | '(' | ')')
        {
            sanitized.push(character);
        } else {
            sanitized.push('_');
        }
    }

    let compact = sanitized.trim();
    if compact.is_empty() || compact == ".mp3" {
        "audio.mp3".to_string()
    } else {
        compact.to_string()
    }
}
