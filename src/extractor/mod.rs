//! The extraction capability seam.
//!
//! [`Extractor`] is the only thing that talks to YouTube. The bundled
//! [`YoutubeExtractor`] resolves video info through `yt-dlp` and related videos
//! through the InnerTube `next` endpoint. Tests swap in an in-memory fake.

mod innertube;
mod ytdlp;

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::video_id::VideoId;

pub use innertube::parse_related_response;
pub use ytdlp::{build_ytdlp_args, parse_ytdlp_output};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("could not launch extractor: {0}")]
    Launch(String),
    #[error("{0}")]
    Upstream(String),
    #[error("upstream responded with HTTP {status}")]
    Status { status: u16 },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("could not decode extractor output: {0}")]
    Decode(String),
}

impl ExtractError {
    /// Maps a reqwest failure; `timeout` is the bound that was in force.
    pub fn from_reqwest(error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            Self::Timeout(timeout)
        } else if let Some(status) = error.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Per-attempt request disguise handed to the extractor.
#[derive(Debug, Clone, Default)]
pub struct RequestProfile {
    pub user_agent: String,
    pub cookies: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub timeout: Duration,
}

impl RequestProfile {
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Parses `name=value; other=value` into discrete pairs, dropping malformed ones.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}

/// One stream variant as reported by the extractor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FormatCandidate {
    pub format_id: String,
    pub url: String,
    pub bitrate_kbps: Option<f64>,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub container: Option<String>,
    pub content_length: Option<u64>,
    pub sample_rate: Option<u32>,
}

impl FormatCandidate {
    pub fn has_video(&self) -> bool {
        matches!(self.video_codec.as_deref(), Some(value) if value != "none")
    }

    pub fn has_audio(&self) -> bool {
        matches!(self.audio_codec.as_deref(), Some(value) if value != "none")
    }

    pub fn is_audio_only(&self) -> bool {
        !self.has_video() && self.has_audio()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoInfo {
    pub id: String,
    pub title: String,
    pub duration_seconds: Option<u64>,
    pub thumbnail: Option<String>,
    pub channel: Option<String>,
    pub channel_id: Option<String>,
    pub view_count: Option<u64>,
    pub is_live: bool,
    pub upload_date: Option<String>,
    pub formats: Vec<FormatCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedVideo {
    pub id: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration: Option<u64>,
}

pub struct AudioStream {
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, Result<Bytes, ExtractError>>,
}

impl AudioStream {
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        let content_length = chunks.iter().map(|chunk| chunk.len() as u64).sum();
        Self {
            content_length: Some(content_length),
            body: futures_util::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn video_info(
        &self,
        id: &VideoId,
        profile: &RequestProfile,
    ) -> Result<VideoInfo, ExtractError>;

    async fn related_videos(
        &self,
        id: &VideoId,
        profile: &RequestProfile,
    ) -> Result<Vec<RelatedVideo>, ExtractError>;

    async fn open_stream(
        &self,
        url: &str,
        profile: &RequestProfile,
    ) -> Result<AudioStream, ExtractError>;
}

pub struct YoutubeExtractor {
    ytdlp_path: String,
    http_client: reqwest::Client,
}

impl YoutubeExtractor {
    pub fn new(ytdlp_path: impl Into<String>, http_client: reqwest::Client) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            http_client,
        }
    }
}

#[async_trait]
impl Extractor for YoutubeExtractor {
    async fn video_info(
        &self,
        id: &VideoId,
        profile: &RequestProfile,
    ) -> Result<VideoInfo, ExtractError> {
        ytdlp::fetch_video_info(&self.ytdlp_path, id, profile).await
    }

    async fn related_videos(
        &self,
        id: &VideoId,
        profile: &RequestProfile,
    ) -> Result<Vec<RelatedVideo>, ExtractError> {
        innertube::fetch_related(&self.http_client, id, profile).await
    }

    async fn open_stream(
        &self,
        url: &str,
        profile: &RequestProfile,
    ) -> Result<AudioStream, ExtractError> {
        let mut request = self
            .http_client
            .get(url)
            .header(reqwest::header::USER_AGENT, &profile.user_agent);
        if let Some(cookie) = profile.cookie_header() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        // Only the wait for response headers is bounded; the body may take as
        // long as the downstream client needs.
        let timeout = profile.timeout;
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| ExtractError::Timeout(timeout))?
            .map_err(|error| ExtractError::from_reqwest(error, timeout))?
            .error_for_status()
            .map_err(|error| ExtractError::from_reqwest(error, timeout))?;
        let content_length = response.content_length();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|error| ExtractError::from_reqwest(error, timeout)))
            .boxed();

        Ok(AudioStream {
            content_length,
            body,
        })
    }
}

/// Duration as either numeric seconds or a text form (`"212"`, `PT3M32S`, `3:32`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(f64),
    Text(String),
}

impl DurationValue {
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            Self::Seconds(value) if value.is_finite() && *value >= 0.0 => {
                Some(value.round() as u64)
            }
            Self::Seconds(_) => None,
            Self::Text(text) => {
                let text = text.trim();
                text.parse::<f64>()
                    .ok()
                    .and_then(|value| Self::Seconds(value).as_seconds())
                    .or_else(|| parse_iso8601_duration(text))
                    .or_else(|| parse_clock_duration(text))
            }
        }
    }
}

/// Parses the time-only subset of ISO-8601 durations used by YouTube (`P1DT2H3M4S`).
pub fn parse_iso8601_duration(value: &str) -> Option<u64> {
    let rest = value.strip_prefix('P').or_else(|| value.strip_prefix('p'))?;
    if rest.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_component = false;

    for character in rest.chars() {
        match character.to_ascii_uppercase() {
            'T' if !in_time && number.is_empty() => in_time = true,
            digit if digit.is_ascii_digit() || digit == '.' => number.push(digit),
            unit => {
                let amount: f64 = number.parse().ok()?;
                number.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 604_800.0,
                    ('D', false) => 86_400.0,
                    ('H', true) => 3_600.0,
                    ('M', true) => 60.0,
                    ('S', true) => 1.0,
                    _ => return None,
                };
                total += amount * factor;
                saw_component = true;
            }
        }
    }

    (saw_component && number.is_empty()).then(|| total.round() as u64)
}

/// Parses `h:mm:ss` / `m:ss` clock text.
pub fn parse_clock_duration(value: &str) -> Option<u64> {
    let parts = value
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    parts.iter().try_fold(0u64, |total, part| {
        total.checked_mul(60).and_then(|total| total.checked_add(*part))
    })
}

#[cfg(test)]
mod tests {
    use axum::{Router, body::Body, http::StatusCode, routing::get};
    use futures_util::TryStreamExt;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}")
    }

    fn extractor() -> YoutubeExtractor {
        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        YoutubeExtractor::new("yt-dlp", client)
    }

    fn profile_with_timeout(timeout: Duration) -> RequestProfile {
        RequestProfile {
            user_agent: "tubetap-test".to_string(),
            timeout,
            ..RequestProfile::default()
        }
    }

    async fn open_error(url: &str, timeout: Duration) -> ExtractError {
        match extractor().open_stream(url, &profile_with_timeout(timeout)).await {
            Ok(_) => panic!("{url} should fail to open"),
            Err(error) => error,
        }
    }

    // Three 10 byte chunks, 400ms apart.
    fn slow_body() -> Body {
        let chunks = futures_util::stream::iter(0u8..3).then(|index| async move {
            if index > 0 {
                tokio::time::sleep(Duration::from_millis(400)).await;
            }
            Ok::<_, std::convert::Infallible>(Bytes::from(vec![b'a' + index; 10]))
        });
        Body::from_stream(chunks)
    }

    #[tokio::test]
    async fn stream_body_may_outlast_the_header_timeout() {
        let base = serve(Router::new().route("/slow", get(|| async { slow_body() }))).await;

        let stream = extractor()
            .open_stream(
                &format!("{base}/slow"),
                &profile_with_timeout(Duration::from_millis(500)),
            )
            .await
            .unwrap();
        let chunks: Vec<Bytes> = stream.body.try_collect().await.unwrap();

        let received: Vec<u8> = chunks.iter().flat_map(|chunk| chunk.iter().copied()).collect();
        assert_eq!(received.len(), 30);
        assert_eq!(&received[20..], b"cccccccccc");
    }

    #[tokio::test]
    async fn stalled_upstream_reports_the_configured_timeout() {
        let app = Router::new().route(
            "/stall",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
        let base = serve(app).await;

        let error = open_error(&format!("{base}/stall"), Duration::from_millis(200)).await;
        assert_eq!(error, ExtractError::Timeout(Duration::from_millis(200)));
        assert_eq!(error.to_string(), "extractor timed out after 200ms");
    }

    #[tokio::test]
    async fn upstream_status_is_kept() {
        let app = Router::new().route("/gone", get(|| async { StatusCode::NOT_FOUND }));
        let base = serve(app).await;

        let error = open_error(&format!("{base}/gone"), Duration::from_secs(5)).await;
        assert_eq!(error, ExtractError::Status { status: 404 });
    }

    #[test]
    fn clock_durations_reject_overflow() {
        assert_eq!(parse_clock_duration("3:32"), Some(212));
        assert_eq!(parse_clock_duration("1:02:03"), Some(3723));
        assert_eq!(parse_clock_duration("18446744073709551615:00"), None);
        assert_eq!(parse_clock_duration("a:b"), None);
    }

    #[test]
    fn cookie_string_is_split_into_pairs() {
        let cookies = parse_cookie_string(" SID=abc ; HSID = def;broken; =nameless; token=a=b ;");
        assert_eq!(
            cookies,
            vec![
                ("SID".to_string(), "abc".to_string()),
                ("HSID".to_string(), "def".to_string()),
                ("token".to_string(), "a=b".to_string()),
            ]
        );

        let profile = RequestProfile {
            cookies,
            ..RequestProfile::default()
        };
        assert_eq!(
            profile.cookie_header().as_deref(),
            Some("SID=abc; HSID=def; token=a=b")
        );
        assert_eq!(RequestProfile::default().cookie_header(), None);
    }

    #[test]
    fn iso8601_durations() {
        assert_eq!(parse_iso8601_duration("PT3M32S"), Some(212));
        assert_eq!(parse_iso8601_duration("PT1H"), Some(3600));
        assert_eq!(parse_iso8601_duration("P1DT1S"), Some(86_401));
        assert_eq!(parse_iso8601_duration("PT0.5S"), Some(1));
        assert_eq!(parse_iso8601_duration("PT"), None);
        assert_eq!(parse_iso8601_duration("P"), None);
        assert_eq!(parse_iso8601_duration("PT5"), None);
        assert_eq!(parse_iso8601_duration("3M"), None);
    }

    #[test]
    fn duration_values_accept_every_shape() {
        let parse = |json: &str| {
            serde_json::from_str::<DurationValue>(json)
                .unwrap()
                .as_seconds()
        };
        assert_eq!(parse("212"), Some(212));
        assert_eq!(parse("211.6"), Some(212));
        assert_eq!(parse("\"212\""), Some(212));
        assert_eq!(parse("\"PT3M32S\""), Some(212));
        assert_eq!(parse("\"1:02:03\""), Some(3723));
        assert_eq!(parse("\"live\""), None);
    }

    #[test]
    fn audio_only_detection() {
        let audio = FormatCandidate {
            audio_codec: Some("opus".into()),
            video_codec: Some("none".into()),
            ..FormatCandidate::default()
        };
        let muxed = FormatCandidate {
            audio_codec: Some("mp4a.40.2".into()),
            video_codec: Some("avc1.42001E".into()),
            ..FormatCandidate::default()
        };
        let video = FormatCandidate {
            audio_codec: Some("none".into()),
            video_codec: Some("vp9".into()),
            ..FormatCandidate::default()
        };

        assert!(audio.is_audio_only());
        assert!(!muxed.is_audio_only());
        assert!(!video.is_audio_only());
    }
}
