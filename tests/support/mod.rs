#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Bytes;
use tokio::net::TcpListener;

use tubetap::{
    AppState, Config, build_router,
    extractor::{
        AudioStream, ExtractError, Extractor, FormatCandidate, RelatedVideo, RequestProfile,
        VideoInfo,
    },
    fetcher::Fetcher,
    routes::build_cors_layer,
    video_id::VideoId,
};

pub const VIDEO_ID: &str = "dQw4w9WgXcQ";

pub struct FakeExtractor {
    pub info: Result<VideoInfo, ExtractError>,
    pub related: Result<Vec<RelatedVideo>, ExtractError>,
    pub chunks: Vec<Bytes>,
    pub stream_error: Option<ExtractError>,
    pub info_calls: AtomicUsize,
    pub related_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(info: Result<VideoInfo, ExtractError>) -> Self {
        Self {
            info,
            related: Ok(Vec::new()),
            chunks: vec![Bytes::from_static(b"ID3"), Bytes::from_static(b"audio-bytes")],
            stream_error: None,
            info_calls: AtomicUsize::new(0),
            related_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_related(mut self, related: Result<Vec<RelatedVideo>, ExtractError>) -> Self {
        self.related = related;
        self
    }

    pub fn with_stream_error(mut self, error: ExtractError) -> Self {
        self.stream_error = Some(error);
        self
    }

    pub fn info_calls(&self) -> usize {
        self.info_calls.load(Ordering::SeqCst)
    }

    pub fn related_calls(&self) -> usize {
        self.related_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.info_calls() + self.related_calls() + self.stream_calls()
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn video_info(
        &self,
        _id: &VideoId,
        _profile: &RequestProfile,
    ) -> Result<VideoInfo, ExtractError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        self.info.clone()
    }

    async fn related_videos(
        &self,
        _id: &VideoId,
        _profile: &RequestProfile,
    ) -> Result<Vec<RelatedVideo>, ExtractError> {
        self.related_calls.fetch_add(1, Ordering::SeqCst);
        self.related.clone()
    }

    async fn open_stream(
        &self,
        _url: &str,
        _profile: &RequestProfile,
    ) -> Result<AudioStream, ExtractError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        match &self.stream_error {
            Some(error) => Err(error.clone()),
            None => Ok(AudioStream::from_chunks(self.chunks.clone())),
        }
    }
}

pub fn audio_format(id: &str, bitrate: f64, codec: &str, ext: &str) -> FormatCandidate {
    FormatCandidate {
        format_id: id.to_string(),
        url: format!("https://media.example/{id}"),
        bitrate_kbps: Some(bitrate),
        audio_codec: Some(codec.to_string()),
        video_codec: Some("none".to_string()),
        container: Some(ext.to_string()),
        content_length: Some(2_000_000),
        sample_rate: Some(48_000),
    }
}

pub fn sample_video() -> VideoInfo {
    VideoInfo {
        id: VIDEO_ID.to_string(),
        title: "Never Gonna Give You Up".to_string(),
        duration_seconds: Some(212),
        thumbnail: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hq.jpg".to_string()),
        channel: Some("Rick Astley".to_string()),
        channel_id: Some("UCuAXFkgsw1L7xaCfnd5JJOw".to_string()),
        view_count: Some(1_500_000_000),
        is_live: false,
        upload_date: Some("20091025".to_string()),
        formats: vec![
            audio_format("249", 64.0, "opus", "webm"),
            audio_format("251", 160.0, "opus", "webm"),
            audio_format("140", 128.0, "mp4a.40.2", "m4a"),
        ],
    }
}

pub fn test_config() -> Config {
    let mut config = Config::from_lookup(|_| None).expect("default config should load");
    config.fetch.retry.delay = Duration::ZERO;
    config
}

pub async fn spawn_app(extractor: Arc<FakeExtractor>, config: Config) -> (String, AppState) {
    let fetcher = Fetcher::new(extractor, config.fetch.clone());
    let state = AppState::new(&config, fetcher);
    let app = build_router(state.clone(), build_cors_layer(&config.allowed_origins));

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("should bind an ephemeral port");
    let addr = listener.local_addr().expect("listener has an address");

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("test server should run");
    });

    (format!("http://{addr}"), state)
}
