use std::{fmt, sync::LazyLock};

use regex::Regex;
use url::Url;

use crate::error::FetchError;

static VIDEO_ID_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("Should be able to parse the video id regex")
});

const WATCH_HOSTS: [&str; 4] = [
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
];

const ID_PATH_PREFIXES: [&str; 4] = ["shorts", "embed", "live", "v"];

/// An 11 character YouTube video identifier, validated on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoId(String);

impl VideoId {
    /// Accepts either a bare id or a watch-page URL that embeds one.
    ///
    /// `raw` is expected to be already percent-decoded, as axum's `Path` hands it over.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let trimmed = raw.trim();
        if VIDEO_ID_REGEX.is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }

        extract_from_url(trimmed)
            .map(Self)
            .ok_or_else(|| FetchError::InvalidIdentifier(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn watch_url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.0)
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn extract_from_url(input: &str) -> Option<String> {
    let parsed = Url::parse(input)
        .or_else(|_| Url::parse(&format!("https://{input}")))
        .ok()?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }

    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let mut segments = parsed.path_segments()?.filter(|segment| !segment.is_empty());

    let candidate = if host == "youtu.be" {
        segments.next().map(ToString::to_string)
    } else if WATCH_HOSTS.contains(&host) {
        match segments.next() {
            Some("watch") => parsed
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some(prefix) if ID_PATH_PREFIXES.contains(&prefix) => {
                segments.next().map(ToString::to_string)
            }
            _ => None,
        }
    } else {
        None
    };

    candidate.filter(|value| VIDEO_ID_REGEX.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bare_ids() {
        let id = VideoId::parse("dQw4w9WgXcQ").unwrap();
        assert_eq!(id.as_str(), "dQw4w9WgXcQ");

        assert!(VideoId::parse("a-b_c-d_e-f").is_ok());
    }

    #[test]
    fn rejects_malformed_ids() {
        for raw in ["", "short", "dQw4w9WgXcQQ", "dQw4w9WgXc!", "../../etc/pa"] {
            assert!(
                matches!(VideoId::parse(raw), Err(FetchError::InvalidIdentifier(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn extracts_ids_from_watch_urls() {
        let cases = [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ&t=42",
            "https://music.youtube.com/watch?v=dQw4w9WgXcQ",
            "https://youtu.be/dQw4w9WgXcQ?si=abc",
            "https://www.youtube.com/shorts/dQw4w9WgXcQ",
            "https://www.youtube.com/embed/dQw4w9WgXcQ",
            "youtube.com/watch?v=dQw4w9WgXcQ",
        ];

        for raw in cases {
            let id = VideoId::parse(raw).unwrap_or_else(|_| panic!("{raw} should parse"));
            assert_eq!(id.as_str(), "dQw4w9WgXcQ", "{raw}");
        }
    }

    #[test]
    fn input_is_not_decoded_a_second_time() {
        assert!(VideoId::parse("dQw4w9WgXc%51").is_err());
        assert!(VideoId::parse("https%3A%2F%2Fyoutu.be%2FdQw4w9WgXcQ").is_err());
    }

    #[test]
    fn rejects_foreign_or_incomplete_urls() {
        for raw in [
            "https://vimeo.com/watch?v=dQw4w9WgXcQ",
            "https://www.youtube.com/watch?v=tooShort",
            "https://www.youtube.com/channel/UCabcdefghij",
            "ftp://youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert!(VideoId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }
}
