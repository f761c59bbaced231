use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy for everything between the path parameter and the upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("invalid video identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("video is unavailable or private: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream blocked the request: {0}")]
    UpstreamBlocked(String),
    #[error("no playable audio format found")]
    NoPlayableFormat,
    #[error("fetch failed after {attempts} attempt(s): {message}")]
    TransientFetchFailure { attempts: u32, message: String },
    #[error("{0}")]
    GenericFailure(String),
}

impl FetchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidIdentifier(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable(_) | Self::NoPlayableFormat => StatusCode::NOT_FOUND,
            Self::UpstreamBlocked(_) => StatusCode::FORBIDDEN,
            Self::TransientFetchFailure { .. } | Self::GenericFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::UpstreamUnavailable(_) => "VIDEO_UNAVAILABLE",
            Self::UpstreamBlocked(_) => "UPSTREAM_BLOCKED",
            Self::NoPlayableFormat => "NO_PLAYABLE_FORMAT",
            Self::TransientFetchFailure { .. } => "FETCH_FAILED",
            Self::GenericFailure(_) => "INTERNAL_ERROR",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
    pub id: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl ApiError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
            id: None,
            retry_after_seconds: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            code: Some("ROUTE_NOT_FOUND"),
            id: None,
            retry_after_seconds: None,
        }
    }

    pub fn rate_limited(limit: u32, retry_after_seconds: u64) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: format!("Too many requests: limit of {limit} per window exceeded."),
            code: Some("RATE_LIMITED"),
            id: None,
            retry_after_seconds: Some(retry_after_seconds),
        }
    }

    pub fn fetch(error: FetchError, id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::from(error)
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            code: Some(error.code()),
            id: None,
            retry_after_seconds: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
            id: self.id,
            retry_after_seconds: self.retry_after_seconds,
        });

        let mut response = (self.status, body).into_response();
        if let Some(seconds) = self.retry_after_seconds
            && let Ok(value) = HeaderValue::from_str(&seconds.to_string())
        {
            response.headers_mut().insert(RETRY_AFTER, value);
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_to_statuses() {
        let cases = [
            (FetchError::InvalidIdentifier("x".into()), StatusCode::BAD_REQUEST),
            (FetchError::UpstreamUnavailable("gone".into()), StatusCode::NOT_FOUND),
            (FetchError::NoPlayableFormat, StatusCode::NOT_FOUND),
            (FetchError::UpstreamBlocked("bot".into()), StatusCode::FORBIDDEN),
            (
                FetchError::TransientFetchFailure {
                    attempts: 3,
                    message: "timeout".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (FetchError::GenericFailure("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(error.status(), status, "{error}");
        }
    }

    #[test]
    fn rate_limited_response_sets_retry_after() {
        let response = ApiError::rate_limited(100, 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "42");
    }

    #[test]
    fn fetch_error_echoes_identifier() {
        let error = ApiError::fetch(FetchError::NoPlayableFormat, "dQw4w9WgXcQ");
        assert_eq!(error.id.as_deref(), Some("dQw4w9WgXcQ"));
        assert_eq!(error.code, Some("NO_PLAYABLE_FORMAT"));
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }
}
