//! Mapping of HTTP failures onto [`Error`] variants.

use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::Deserialize;

use crate::error::Error;

/// Maximum number of characters of a response body kept in an error.
pub const MAX_BODY_SNIPPET: usize = 1024;

const INFLUX_ERROR_HEADER: &str = "x-influxdb-error";

/// Error body returned by the InfluxDB 2.x API.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Convert a non-success response into a typed error.
///
/// | status | error |
/// |---|---|
/// | 401, 403 | [`Error::Auth`] |
/// | 404 | [`Error::NotFound`] |
/// | 429 | [`Error::RateLimited`] |
/// | 5xx | [`Error::Server`] |
/// | anything else | [`Error::UnexpectedStatus`] |
pub fn map_status(status: StatusCode, headers: &HeaderMap, body: &str) -> Error {
    let code = status.as_u16();
    let message = error_message(status, headers, body);
    let body = truncate(body);

    match code {
        401 | 403 => Error::Auth {
            status: code,
            message,
            body,
        },
        404 => Error::NotFound {
            status: code,
            message,
            body,
        },
        429 => Error::RateLimited {
            status: code,
            retry_after: retry_after(headers, Utc::now()),
            message,
            body,
        },
        500..=599 => Error::Server {
            status: code,
            message,
            body,
        },
        _ => Error::UnexpectedStatus {
            status: code,
            message,
            body,
        },
    }
}

/// Pick the most specific error message available.
///
/// Order: JSON `message`/`error` field, `X-Influxdb-Error` header, raw body,
/// canonical status reason.
fn error_message(status: StatusCode, headers: &HeaderMap, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = parsed.message.or(parsed.error).filter(|m| !m.is_empty()) {
            return message;
        }
    }
    if let Some(header) = headers
        .get(INFLUX_ERROR_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        return header.to_string();
    }
    let trimmed = body.trim();
    if !trimmed.is_empty() {
        return truncate(trimmed);
    }
    status
        .canonical_reason()
        .unwrap_or("unknown status")
        .to_string()
}

/// Parse `Retry-After` as delta-seconds or an HTTP-date.
fn retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_BODY_SNIPPET) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn map(code: u16, body: &str) -> Error {
        map_status(StatusCode::from_u16(code).unwrap(), &HeaderMap::new(), body)
    }

    #[test]
    fn test_status_classes() {
        assert!(matches!(map(401, ""), Error::Auth { status: 401, .. }));
        assert!(matches!(map(403, ""), Error::Auth { status: 403, .. }));
        assert!(matches!(map(404, ""), Error::NotFound { status: 404, .. }));
        assert!(matches!(map(429, ""), Error::RateLimited { status: 429, .. }));
        assert!(matches!(map(500, ""), Error::Server { status: 500, .. }));
        assert!(matches!(map(503, ""), Error::Server { status: 503, .. }));
        assert!(matches!(map(400, ""), Error::UnexpectedStatus { status: 400, .. }));
    }

    #[test]
    fn test_message_from_json_body() {
        let body = r#"{"code":"invalid","message":"compilation failed: error at @1:1-1:5"}"#;
        match map(400, body) {
            Error::UnexpectedStatus { message, body: b, .. } => {
                assert_eq!(message, "compilation failed: error at @1:1-1:5");
                assert_eq!(b, body);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_message_from_header_then_body() {
        let mut headers = HeaderMap::new();
        headers.insert(INFLUX_ERROR_HEADER, HeaderValue::from_static("database not found"));
        let err = map_status(StatusCode::NOT_FOUND, &headers, "");
        assert!(err.to_string().contains("database not found"));

        let err = map(500, "plain text failure\n");
        assert!(err.to_string().contains("plain text failure"));

        let err = map(502, "");
        assert!(err.to_string().contains("Bad Gateway"));
    }

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        match map_status(StatusCode::TOO_MANY_REQUESTS, &headers, "") {
            Error::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = DateTime::parse_from_rfc3339("2015-10-21T07:28:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:45 GMT"),
        );
        assert_eq!(retry_after(&headers, now), Some(Duration::from_secs(45)));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after(&headers, now), None);
    }

    #[test]
    fn test_body_is_truncated() {
        let long = "x".repeat(MAX_BODY_SNIPPET * 2);
        let err = map(500, &long);
        let body = err.body().unwrap();
        assert_eq!(body.len(), MAX_BODY_SNIPPET + 3);
        assert!(body.ends_with("..."));
    }
}
