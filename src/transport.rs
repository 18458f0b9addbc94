//! HTTP transport shared by the health, write and query clients.
//!
//! The transport owns the pooled `reqwest::Client`, applies the configured
//! timeout and authentication, and logs each exchange according to the current
//! [`LogLevel`]. Logging goes through `tracing` under the `influxdb_flux::http`
//! target; install a subscriber to see it.
//!
//! The timeout bounds connecting and waiting for the response headers. For
//! ordinary requests it also bounds reading the body; streamed query bodies
//! may take as long as the caller keeps reading.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use reqwest::{Method, Response, Url};

use crate::config::{ClientConfig, LogLevel};
use crate::error::{Error, Result};
use crate::mapper;
use crate::types::FluxRecord;

pub(crate) const LOG_TARGET: &str = "influxdb_flux::http";

const USER_AGENT: &str = concat!("influxdb-flux/", env!("CARGO_PKG_VERSION"));

/// A request relative to the client's base URL.
#[derive(Debug)]
pub(crate) struct HttpRequest<'a> {
    method: Method,
    path: &'a str,
    query: Vec<(&'static str, String)>,
    headers: Vec<(HeaderName, String)>,
    body: Option<String>,
    streamed: bool,
}

impl<'a> HttpRequest<'a> {
    pub(crate) fn get(path: &'a str) -> Self {
        Self::new(Method::GET, path)
    }

    pub(crate) fn post(path: &'a str) -> Self {
        Self::new(Method::POST, path)
    }

    fn new(method: Method, path: &'a str) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            streamed: false,
        }
    }

    pub(crate) fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    pub(crate) fn header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub(crate) fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The response body is consumed incrementally; only the headers are timed.
    pub(crate) fn streamed(mut self) -> Self {
        self.streamed = true;
        self
    }
}

/// Pooled HTTP transport.
pub(crate) struct Transport {
    http: RwLock<Option<reqwest::Client>>,
    base_url: Url,
    token: String,
    timeout: Duration,
    log_level: AtomicU8,
    closed: AtomicBool,
}

impl Transport {
    /// Build a transport with its own connection pool.
    pub(crate) fn new(config: &ClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Self::with_http_client(http, config)
    }

    /// Build a transport around a caller-supplied `reqwest::Client`.
    pub(crate) fn with_http_client(http: reqwest::Client, config: &ClientConfig) -> Result<Self> {
        let base_url = config.validate()?;
        Ok(Self {
            http: RwLock::new(Some(http)),
            base_url,
            token: config.token.clone(),
            timeout: config.timeout,
            log_level: AtomicU8::new(config.log_level as u8),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn log_level(&self) -> LogLevel {
        LogLevel::from_u8(self.log_level.load(Ordering::Relaxed))
    }

    pub(crate) fn set_log_level(&self, level: LogLevel) {
        self.log_level.store(level as u8, Ordering::Relaxed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop the connection pool. Safe to call more than once.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let pool = self
            .http
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(pool);
        tracing::debug!(target: LOG_TARGET, url = %self.base_url, "transport closed");
    }

    fn http(&self) -> Result<reqwest::Client> {
        if self.is_closed() {
            return Err(Error::ClosedClient);
        }
        self.http
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::ClosedClient)
    }

    /// Build the full URL for an API endpoint, keeping any base path prefix.
    pub(crate) fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Url {
        let mut url = self.base_url.clone();
        let prefix = self.base_url.path().trim_end_matches('/');
        url.set_path(&format!("{}{}", prefix, path));
        url.set_query(None);
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        url
    }

    /// Perform one HTTP exchange. Non-success statuses are returned as-is.
    pub(crate) async fn send(&self, request: HttpRequest<'_>) -> Result<Response> {
        let http = self.http()?;
        let level = self.log_level();
        let url = self.endpoint(request.path, &request.query);

        let mut builder = http.request(request.method, url);
        if !request.streamed {
            builder = builder.timeout(self.timeout);
        }
        if !self.token.is_empty() {
            builder = builder.header(AUTHORIZATION, format!("Token {}", self.token));
        }
        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        let req = builder
            .build()
            .map_err(|e| Error::InvalidConfig(format!("cannot build request: {}", e)))?;

        log_request(level, &req);

        let started = Instant::now();
        let source: Box<dyn std::error::Error + Send + Sync> =
            match tokio::time::timeout(self.timeout, http.execute(req)).await {
                Ok(Ok(response)) => {
                    log_response(level, &response, started.elapsed());
                    return Ok(response);
                }
                Ok(Err(e)) => Box::new(e),
                Err(_) => Box::new(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no response within {:?}", self.timeout),
                )),
            };
        if level >= LogLevel::Basic {
            tracing::info!(target: LOG_TARGET, error = %source, "<-- HTTP FAILED");
        }
        Err(Error::Connectivity { source })
    }

    /// Perform one HTTP exchange and map any non-success status to an error.
    pub(crate) async fn send_checked(&self, request: HttpRequest<'_>) -> Result<Response> {
        let response = self.send(request).await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(self.status_error(response).await)
    }

    /// Map a non-success response to its error, reading the body for the message.
    pub(crate) async fn status_error(&self, response: Response) -> Error {
        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    status = status.as_u16(),
                    error = %e,
                    "failed to read error response body"
                );
                String::new()
            }
        };
        self.log_body(&body);
        mapper::map_status(status, &headers, &body)
    }

    /// Read a whole response body as text.
    pub(crate) async fn read_body(&self, response: Response) -> Result<String> {
        let body = response.text().await?;
        self.log_body(&body);
        Ok(body)
    }

    fn log_body(&self, body: &str) {
        if self.log_level() >= LogLevel::Body && !body.is_empty() {
            tracing::info!(target: LOG_TARGET, body = %body, "<-- body");
        }
    }

    pub(crate) fn log_record(&self, record: &FluxRecord) {
        if self.log_level() >= LogLevel::Full {
            tracing::info!(target: LOG_TARGET, table = record.table, record = ?record.values, "<-- record");
        }
    }
}

fn log_request(level: LogLevel, req: &reqwest::Request) {
    if level == LogLevel::None {
        return;
    }
    tracing::info!(target: LOG_TARGET, method = %req.method(), url = %req.url(), "--> request");
    if level >= LogLevel::Headers {
        log_headers("-->", req.headers());
    }
    if level >= LogLevel::Body {
        if let Some(bytes) = req.body().and_then(|b| b.as_bytes()) {
            tracing::info!(target: LOG_TARGET, body = %String::from_utf8_lossy(bytes), "--> body");
        }
    }
}

fn log_response(level: LogLevel, response: &Response, elapsed: Duration) {
    if level == LogLevel::None {
        return;
    }
    tracing::info!(
        target: LOG_TARGET,
        status = response.status().as_u16(),
        url = %response.url(),
        elapsed_ms = elapsed.as_millis() as u64,
        "<-- response"
    );
    if level >= LogLevel::Headers {
        log_headers("<--", response.headers());
    }
}

fn log_headers(direction: &str, headers: &HeaderMap) {
    for (name, value) in headers {
        let value = if name == AUTHORIZATION {
            "<redacted>".to_string()
        } else {
            String::from_utf8_lossy(value.as_bytes()).into_owned()
        };
        tracing::info!(target: LOG_TARGET, header = %name, value = %value, "{} header", direction);
    }
}
