use std::io::ErrorKind;

use serde::Deserialize;
use tokio::{process::Command, time::timeout};
use tracing::debug;

use super::{DurationValue, ExtractError, FormatCandidate, RequestProfile, VideoInfo};
use crate::video_id::VideoId;

#[derive(Debug, Deserialize)]
struct YtDlpVideoInfo {
    id: Option<String>,
    title: Option<String>,
    duration: Option<DurationValue>,
    thumbnail: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    channel_id: Option<String>,
    view_count: Option<u64>,
    is_live: Option<bool>,
    upload_date: Option<String>,
    #[serde(default)]
    formats: Vec<YtDlpFormat>,
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    format_id: String,
    url: Option<String>,
    ext: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
    abr: Option<f64>,
    tbr: Option<f64>,
    asr: Option<f64>,
    filesize: Option<f64>,
    filesize_approx: Option<f64>,
}

impl From<YtDlpFormat> for FormatCandidate {
    fn from(format: YtDlpFormat) -> Self {
        let content_length = format
            .filesize
            .or(format.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size as u64);

        Self {
            format_id: format.format_id,
            url: format.url.unwrap_or_default(),
            bitrate_kbps: format
                .abr
                .or(format.tbr)
                .filter(|rate| rate.is_finite() && *rate > 0.0),
            audio_codec: format.acodec,
            video_codec: format.vcodec,
            container: format.ext,
            content_length,
            sample_rate: format
                .asr
                .filter(|rate| rate.is_finite() && *rate > 0.0)
                .map(|rate| rate as u32),
        }
    }
}

pub fn build_ytdlp_args(id: &VideoId, profile: &RequestProfile) -> Vec<String> {
    let mut args = vec![
        "-J".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
    ];

    if !profile.user_agent.is_empty() {
        args.push("--user-agent".to_string());
        args.push(profile.user_agent.clone());
    }
    if let Some(cookie) = profile.cookie_header() {
        args.push("--add-header".to_string());
        args.push(format!("Cookie:{cookie}"));
    }
    if let Some(proxy) = &profile.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }
    if !profile.timeout.is_zero() {
        args.push("--socket-timeout".to_string());
        args.push(profile.timeout.as_secs().max(1).to_string());
    }

    args.push(id.watch_url());
    args
}

pub fn parse_ytdlp_output(stdout: &[u8], requested: &VideoId) -> Result<VideoInfo, ExtractError> {
    let info: YtDlpVideoInfo =
        serde_json::from_slice(stdout).map_err(|error| ExtractError::Decode(error.to_string()))?;

    Ok(VideoInfo {
        id: info.id.unwrap_or_else(|| requested.to_string()),
        title: info
            .title
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string()),
        duration_seconds: info.duration.as_ref().and_then(DurationValue::as_seconds),
        thumbnail: info.thumbnail,
        channel: info.channel.or(info.uploader),
        channel_id: info.channel_id,
        view_count: info.view_count,
        is_live: info.is_live.unwrap_or(false),
        upload_date: info.upload_date,
        formats: info.formats.into_iter().map(FormatCandidate::from).collect(),
    })
}

fn run_error_message(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .unwrap_or("yt-dlp could not complete the request")
        .trim_start_matches("ERROR:")
        .trim()
        .to_string()
}

pub(super) async fn fetch_video_info(
    binary: &str,
    id: &VideoId,
    profile: &RequestProfile,
) -> Result<VideoInfo, ExtractError> {
    let args = build_ytdlp_args(id, profile);
    debug!(video_id = %id, binary, "running yt-dlp");

    let command_future = Command::new(binary).args(args).kill_on_drop(true).output();
    let output = timeout(profile.timeout, command_future)
        .await
        .map_err(|_| ExtractError::Timeout(profile.timeout))?
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                ExtractError::Launch(format!("{binary} is not installed"))
            } else {
                ExtractError::Launch(error.to_string())
            }
        })?;

    if !output.status.success() {
        return Err(ExtractError::Upstream(run_error_message(&output.stderr)));
    }

    parse_ytdlp_output(&output.stdout, id)
}
