use std::sync::LazyLock;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{ExtractError, RelatedVideo, RequestProfile, parse_clock_duration};
use crate::video_id::VideoId;

static IT_NEXT_URL: LazyLock<reqwest::Url> = LazyLock::new(|| {
    reqwest::Url::parse("https://www.youtube.com/youtubei/v1/next?prettyPrint=false")
        .expect("Should be able to parse the IT_NEXT_URL")
});

const CLIENT_NAME: &str = "WEB";
const CLIENT_VERSION: &str = "2.20240726.00.00";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NextInput<'a> {
    context: Context,
    video_id: &'a str,
}

#[derive(Serialize)]
struct Context {
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Client {
    client_name: &'static str,
    client_version: &'static str,
    hl: &'static str,
    gl: &'static str,
}

pub(super) async fn fetch_related(
    http_client: &reqwest::Client,
    id: &VideoId,
    profile: &RequestProfile,
) -> Result<Vec<RelatedVideo>, ExtractError> {
    let input = NextInput {
        context: Context {
            client: Client {
                client_name: CLIENT_NAME,
                client_version: CLIENT_VERSION,
                hl: "en",
                gl: "US",
            },
        },
        video_id: id.as_str(),
    };

    let mut request = http_client
        .post(IT_NEXT_URL.clone())
        .timeout(profile.timeout)
        .header(reqwest::header::USER_AGENT, &profile.user_agent)
        .json(&input);
    if let Some(cookie) = profile.cookie_header() {
        request = request.header(reqwest::header::COOKIE, cookie);
    }

    let into_extract_error =
        |error: reqwest::Error| ExtractError::from_reqwest(error, profile.timeout);
    let body: Value = request
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(into_extract_error)?
        .json()
        .await
        .map_err(into_extract_error)?;

    let related = parse_related_response(&body);
    debug!(video_id = %id, count = related.len(), "innertube related videos parsed");
    Ok(related)
}

/// Pulls related videos out of an InnerTube `next` response.
///
/// Understands both the `compactVideoRenderer` and the newer `lockupViewModel`
/// layouts. Entries without a video id are dropped.
pub fn parse_related_response(body: &Value) -> Vec<RelatedVideo> {
    let Some(results) = body
        .pointer("/contents/twoColumnWatchNextResults/secondaryResults/secondaryResults/results")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for result in results {
        match result
            .pointer("/itemSectionRenderer/contents")
            .and_then(Value::as_array)
        {
            Some(contents) => items.extend(contents.iter()),
            None => items.push(result),
        }
    }

    items
        .into_iter()
        .filter_map(|item| {
            if let Some(renderer) = item.get("compactVideoRenderer") {
                from_compact_renderer(renderer)
            } else if let Some(lockup) = item.get("lockupViewModel") {
                from_lockup_view_model(lockup)
            } else {
                None
            }
        })
        .collect()
}

fn from_compact_renderer(renderer: &Value) -> Option<RelatedVideo> {
    let id = non_empty_str(renderer.get("videoId"))?;

    Some(RelatedVideo {
        id,
        title: renderer.get("title").and_then(text_of),
        author: renderer
            .get("longBylineText")
            .or_else(|| renderer.get("shortBylineText"))
            .and_then(text_of),
        thumbnail: renderer
            .pointer("/thumbnail/thumbnails")
            .and_then(Value::as_array)
            .and_then(|thumbnails| thumbnails.last())
            .and_then(|thumbnail| non_empty_str(thumbnail.get("url"))),
        duration: renderer
            .get("lengthText")
            .and_then(text_of)
            .and_then(|text| parse_clock_duration(&text)),
    })
}

fn from_lockup_view_model(lockup: &Value) -> Option<RelatedVideo> {
    if lockup.get("contentType").and_then(Value::as_str) != Some("LOCKUP_CONTENT_TYPE_VIDEO") {
        return None;
    }
    let id = non_empty_str(lockup.get("contentId"))?;
    let metadata = lockup.pointer("/metadata/lockupMetadataViewModel");

    Some(RelatedVideo {
        id,
        title: metadata.and_then(|meta| non_empty_str(meta.pointer("/title/content"))),
        author: metadata.and_then(|meta| {
            non_empty_str(meta.pointer(
                "/metadata/contentMetadataViewModel/metadataRows/0/metadataParts/0/text/content",
            ))
        }),
        thumbnail: non_empty_str(
            lockup.pointer("/contentImage/thumbnailViewModel/image/sources/0/url"),
        ),
        duration: non_empty_str(lockup.pointer(
            "/contentImage/thumbnailViewModel/overlays/0/thumbnailOverlayBadgeViewModel/thumbnailBadges/0/thumbnailBadgeViewModel/text",
        ))
        .and_then(|text| parse_clock_duration(&text)),
    })
}

fn text_of(value: &Value) -> Option<String> {
    if let Some(simple) = non_empty_str(value.get("simpleText")) {
        return Some(simple);
    }

    let joined = value
        .get("runs")?
        .as_array()?
        .iter()
        .filter_map(|run| run.get("text").and_then(Value::as_str))
        .collect::<String>();
    (!joined.trim().is_empty()).then_some(joined)
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}
