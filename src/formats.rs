//! Picks the "high" and "low" audio variants out of the extractor's format list.

use serde::Serialize;

use crate::{error::FetchError, extractor::FormatCandidate};

#[derive(Debug, Clone)]
pub struct SelectionPolicy {
    pub preferred_codec: String,
    pub high_threshold_kbps: f64,
    pub allowed_containers: Option<Vec<String>>,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            preferred_codec: "opus".to_string(),
            high_threshold_kbps: 128.0,
            allowed_containers: None,
        }
    }
}

/// A candidate that survived filtering; bitrate and length are known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedFormat {
    pub format_id: String,
    pub url: String,
    pub bitrate: f64,
    pub codec: String,
    pub container: Option<String>,
    pub content_length: u64,
    pub sample_rate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub high: SelectedFormat,
    pub low: SelectedFormat,
}

impl SelectionPolicy {
    fn codec_matches(&self, codec: &str) -> bool {
        codec
            .to_ascii_lowercase()
            .starts_with(&self.preferred_codec.to_ascii_lowercase())
    }

    fn container_allowed(&self, container: Option<&str>) -> bool {
        match &self.allowed_containers {
            None => true,
            Some(allowed) => container.is_some_and(|container| {
                allowed
                    .iter()
                    .any(|entry| entry.eq_ignore_ascii_case(container))
            }),
        }
    }

    pub fn playable(&self, formats: &[FormatCandidate]) -> Vec<SelectedFormat> {
        formats
            .iter()
            .filter(|format| format.is_audio_only() && !format.url.trim().is_empty())
            .filter(|format| self.container_allowed(format.container.as_deref()))
            .filter_map(|format| {
                Some(SelectedFormat {
                    format_id: format.format_id.clone(),
                    url: format.url.clone(),
                    bitrate: format.bitrate_kbps?,
                    codec: format.audio_codec.clone()?,
                    container: format.container.clone(),
                    content_length: format.content_length.filter(|length| *length > 0)?,
                    sample_rate: format.sample_rate,
                })
            })
            .collect()
    }

    pub fn select(&self, formats: &[FormatCandidate]) -> Result<Selection, FetchError> {
        let playable = self.playable(formats);
        if playable.is_empty() {
            return Err(FetchError::NoPlayableFormat);
        }

        let preferred = |format: &&SelectedFormat| self.codec_matches(&format.codec);

        let high = highest(
            playable
                .iter()
                .filter(preferred)
                .filter(|format| format.bitrate > self.high_threshold_kbps),
        )
        .or_else(|| highest(playable.iter()))
        .ok_or(FetchError::NoPlayableFormat)?;

        let low = lowest(
            playable
                .iter()
                .filter(preferred)
                .filter(|format| format.bitrate <= self.high_threshold_kbps),
        )
        .or_else(|| lowest(playable.iter()))
        .ok_or(FetchError::NoPlayableFormat)?;

        Ok(Selection {
            high: high.clone(),
            low: low.clone(),
        })
    }
}

// Ties keep the earliest candidate so repeated selection is stable.
fn highest<'a>(formats: impl Iterator<Item = &'a SelectedFormat>) -> Option<&'a SelectedFormat> {
    formats.fold(None, |best, format| match best {
        Some(current) if current.bitrate >= format.bitrate => Some(current),
        _ => Some(format),
    })
}

fn lowest<'a>(formats: impl Iterator<Item = &'a SelectedFormat>) -> Option<&'a SelectedFormat> {
    formats.fold(None, |best, format| match best {
        Some(current) if current.bitrate <= format.bitrate => Some(current),
        _ => Some(format),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(id: &str, bitrate: f64, codec: &str, ext: &str) -> FormatCandidate {
        FormatCandidate {
            format_id: id.to_string(),
            url: format!("https://cdn.example/{id}"),
            bitrate_kbps: Some(bitrate),
            audio_codec: Some(codec.to_string()),
            video_codec: Some("none".to_string()),
            container: Some(ext.to_string()),
            content_length: Some(1_000_000),
            sample_rate: Some(48_000),
        }
    }

    #[test]
    fn prefers_opus_above_and_below_threshold() {
        let formats = vec![
            audio("249", 64.0, "opus", "webm"),
            audio("251", 160.0, "opus", "webm"),
            audio("140", 128.0, "mp4a.40.2", "m4a"),
        ];

        let selection = SelectionPolicy::default().select(&formats).unwrap();
        assert_eq!(selection.high.format_id, "251");
        assert_eq!(selection.low.format_id, "249");
    }

    #[test]
    fn falls_back_to_overall_extremes_without_preferred_codec() {
        let formats = vec![
            audio("139", 48.0, "mp4a.40.5", "m4a"),
            audio("140", 128.0, "mp4a.40.2", "m4a"),
        ];

        let selection = SelectionPolicy::default().select(&formats).unwrap();
        assert_eq!(selection.high.format_id, "140");
        assert_eq!(selection.low.format_id, "139");
    }

    #[test]
    fn preferred_codec_only_below_threshold_uses_overall_high() {
        let formats = vec![
            audio("250", 70.0, "opus", "webm"),
            audio("140", 128.0, "mp4a.40.2", "m4a"),
        ];

        let selection = SelectionPolicy::default().select(&formats).unwrap();
        assert_eq!(selection.high.format_id, "140");
        assert_eq!(selection.low.format_id, "250");
    }

    #[test]
    fn single_candidate_fills_both_slots() {
        let formats = vec![audio("251", 160.0, "opus", "webm")];
        let selection = SelectionPolicy::default().select(&formats).unwrap();
        assert_eq!(selection.high, selection.low);
    }

    #[test]
    fn filters_unplayable_candidates() {
        let mut no_url = audio("a", 160.0, "opus", "webm");
        no_url.url = String::new();
        let mut no_bitrate = audio("b", 160.0, "opus", "webm");
        no_bitrate.bitrate_kbps = None;
        let mut no_length = audio("c", 160.0, "opus", "webm");
        no_length.content_length = Some(0);
        let mut muxed = audio("d", 160.0, "opus", "webm");
        muxed.video_codec = Some("vp9".to_string());

        let result = SelectionPolicy::default().select(&[no_url, no_bitrate, no_length, muxed]);
        assert_eq!(result, Err(FetchError::NoPlayableFormat));
        assert_eq!(SelectionPolicy::default().select(&[]), Err(FetchError::NoPlayableFormat));
    }

    #[test]
    fn container_allowlist_restricts_candidates() {
        let policy = SelectionPolicy {
            allowed_containers: Some(vec!["m4a".to_string()]),
            ..SelectionPolicy::default()
        };
        let formats = vec![
            audio("251", 160.0, "opus", "webm"),
            audio("140", 128.0, "mp4a.40.2", "m4a"),
        ];

        let selection = policy.select(&formats).unwrap();
        assert_eq!(selection.high.format_id, "140");
        assert_eq!(selection.low.format_id, "140");
    }

    #[test]
    fn selection_is_stable_and_ordered() {
        let formats = vec![
            audio("x", 96.0, "opus", "webm"),
            audio("y", 96.0, "opus", "webm"),
            audio("z", 256.0, "mp4a.40.2", "m4a"),
            audio("w", 256.0, "mp4a.40.2", "m4a"),
        ];
        let policy = SelectionPolicy::default();

        let first = policy.select(&formats).unwrap();
        let second = policy.select(&formats).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.high.format_id, "z");
        assert_eq!(first.low.format_id, "x");
        assert!(first.high.bitrate >= first.low.bitrate);
    }
}
