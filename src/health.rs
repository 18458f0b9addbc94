//! Health and metadata endpoints.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mapper::map_status;
use crate::transport::{HttpRequest, LOG_TARGET, Transport};

const VERSION_HEADER: &str = "x-influxdb-version";

/// Overall state reported by `GET /health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// The server is ready for queries and writes.
    Pass,
    /// The server is not ready.
    Fail,
}

/// Body of `GET /health`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Name of the service, e.g. `influxdb`.
    pub name: String,
    /// Human readable description of the state.
    #[serde(default)]
    pub message: Option<String>,
    /// Overall state.
    pub status: HealthState,
    /// Server version.
    #[serde(default)]
    pub version: Option<String>,
    /// Server build commit.
    #[serde(default)]
    pub commit: Option<String>,
}

/// Client for `/ping` and `/health`.
///
/// `ping` never fails: any problem is reported as `false`. `version` and
/// `health` return the mapped error instead.
#[derive(Clone)]
pub struct HealthClient {
    transport: Arc<Transport>,
}

impl HealthClient {
    pub(crate) fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }

    /// Check that the server answers `GET /ping` with a success status.
    ///
    /// Returns `false` for unreachable servers, error statuses and closed clients.
    pub async fn ping(&self) -> bool {
        match self.transport.send(HttpRequest::get("/ping")).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(target: LOG_TARGET, error = %e, "ping failed");
                false
            }
        }
    }

    /// Server version, taken from the `X-Influxdb-Version` header of `GET /ping`.
    pub async fn version(&self) -> Result<String> {
        let response = self.transport.send_checked(HttpRequest::get("/ping")).await?;
        let status = response.status().as_u16();
        response
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::MalformedResponse {
                message: "response has no X-Influxdb-Version header".to_string(),
                status: Some(status),
            })
    }

    /// Detailed health from `GET /health`.
    ///
    /// A server that is up but not ready answers 503 with a health body; that is
    /// returned as [`HealthState::Fail`] rather than an error.
    pub async fn health(&self) -> Result<HealthCheck> {
        let response = self.transport.send(HttpRequest::get("/health")).await?;
        let status = response.status();
        if !status.is_success() && status.as_u16() != 503 {
            return Err(self.transport.status_error(response).await);
        }

        let headers = response.headers().clone();
        let body = self.transport.read_body(response).await?;
        match serde_json::from_str::<HealthCheck>(&body) {
            Ok(check) => Ok(check),
            Err(_) if !status.is_success() => {
                Err(map_status(status, &headers, &body))
            }
            Err(e) => Err(Error::MalformedResponse {
                message: format!("invalid health body: {}", e),
                status: Some(status.as_u16()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_body() {
        let body = r#"{
            "name": "influxdb",
            "message": "ready for queries and writes",
            "status": "pass",
            "checks": [],
            "version": "v2.7.4",
            "commit": "19e5c0e1b7"
        }"#;
        let check: HealthCheck = serde_json::from_str(body).unwrap();
        assert_eq!(check.name, "influxdb");
        assert_eq!(check.status, HealthState::Pass);
        assert_eq!(check.version.as_deref(), Some("v2.7.4"));
        assert_eq!(check.commit.as_deref(), Some("19e5c0e1b7"));

        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json["status"], "pass");
        let again: HealthCheck = serde_json::from_value(json).unwrap();
        assert_eq!(again, check);
    }

    #[test]
    fn test_health_body_optional_fields() {
        let check: HealthCheck =
            serde_json::from_str(r#"{"name":"influxdb","status":"fail"}"#).unwrap();
        assert_eq!(check.status, HealthState::Fail);
        assert_eq!(check.message, None);
        assert_eq!(check.version, None);
    }

    #[test]
    fn test_unknown_health_status_is_rejected() {
        let result = serde_json::from_str::<HealthCheck>(r#"{"name":"influxdb","status":"warn"}"#);
        assert!(result.is_err());
    }
}
