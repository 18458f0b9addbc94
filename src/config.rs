//! Client configuration.

use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderValue;

use crate::error::{Error, Result};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum number of points per write request.
pub const DEFAULT_BATCH_SIZE: usize = 5_000;

/// Default maximum size of a single write request body.
pub const DEFAULT_MAX_BATCH_BYTES: usize = 10 * 1024 * 1024;

/// How much of each HTTP exchange is logged.
///
/// Levels are ordered by verbosity; each level includes everything logged by
/// the levels below it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// No logging.
    #[default]
    None = 0,
    /// Request method and URL, response status and elapsed time.
    Basic = 1,
    /// Basic plus request and response headers.
    Headers = 2,
    /// Headers plus request bodies and buffered response bodies.
    Body = 3,
    /// Body plus every record produced by query streams.
    Full = 4,
}

impl LogLevel {
    /// All levels, least verbose first.
    pub const ALL: [LogLevel; 5] = [
        LogLevel::None,
        LogLevel::Basic,
        LogLevel::Headers,
        LogLevel::Body,
        LogLevel::Full,
    ];

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => LogLevel::None,
            1 => LogLevel::Basic,
            2 => LogLevel::Headers,
            3 => LogLevel::Body,
            _ => LogLevel::Full,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.to_ascii_uppercase().as_str() {
            "NONE" => Ok(LogLevel::None),
            "BASIC" => Ok(LogLevel::Basic),
            "HEADERS" => Ok(LogLevel::Headers),
            "BODY" => Ok(LogLevel::Body),
            "FULL" => Ok(LogLevel::Full),
            _ => Err(Error::InvalidConfig(format!("unknown log level '{}'", input))),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::None => "NONE",
            LogLevel::Basic => "BASIC",
            LogLevel::Headers => "HEADERS",
            LogLevel::Body => "BODY",
            LogLevel::Full => "FULL",
        };
        write!(f, "{}", s)
    }
}

/// Timestamp precision used when writing points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum WritePrecision {
    /// Seconds.
    Seconds,
    /// Milliseconds.
    Millis,
    /// Microseconds.
    Micros,
    /// Nanoseconds.
    #[default]
    Nanos,
}

impl WritePrecision {
    /// Value of the `precision` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            WritePrecision::Seconds => "s",
            WritePrecision::Millis => "ms",
            WritePrecision::Micros => "us",
            WritePrecision::Nanos => "ns",
        }
    }
}

impl std::fmt::Display for WritePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opt-in retry policy for write batches.
///
/// The default performs no retries. When `max_retries` is positive, a batch
/// that fails with a retryable error (see [`Error::is_retryable`]) is resent
/// after the server's `Retry-After` delay or an exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of additional attempts per batch.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Factor applied to the delay after each attempt.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Exponential backoff with the given number of retries.
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::disabled()
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(delay) = retry_after {
            return delay.min(self.max_delay);
        }
        let factor = self.multiplier.max(1.0).powi(attempt as i32);
        let delay = self.initial_delay.as_secs_f64() * factor;
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Configuration for a [`Client`](crate::Client).
///
/// # Example
///
/// ```ignore
/// use influxdb_flux::{ClientConfig, LogLevel};
/// use std::time::Duration;
///
/// let config = ClientConfig::new("http://localhost:8086")
///     .with_org("my-org")
///     .with_token("my-token")
///     .with_timeout(Duration::from_secs(5))
///     .with_log_level(LogLevel::Basic);
/// ```
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the InfluxDB server.
    pub url: String,
    /// Organization name used for writes and queries.
    pub org: String,
    /// Authentication token. Empty means no `Authorization` header.
    pub token: String,
    /// Timeout applied to every request.
    pub timeout: Duration,
    /// Initial log level.
    pub log_level: LogLevel,
    /// Maximum number of points per write request.
    pub batch_size: usize,
    /// Maximum body size of a write request.
    pub max_batch_bytes: usize,
    /// Timestamp precision for writes.
    pub precision: WritePrecision,
    /// Retry policy for write batches.
    pub retry: RetryPolicy,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            org: String::new(),
            token: String::new(),
            timeout: DEFAULT_TIMEOUT,
            log_level: LogLevel::None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_bytes: DEFAULT_MAX_BATCH_BYTES,
            precision: WritePrecision::Nanos,
            retry: RetryPolicy::disabled(),
        }
    }

    /// Set the organization.
    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = org.into();
        self
    }

    /// Set the authentication token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the initial log level.
    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    /// Set the maximum number of points per write request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the maximum body size of a write request.
    pub fn with_max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    /// Set the write precision.
    pub fn with_precision(mut self, precision: WritePrecision) -> Self {
        self.precision = precision;
        self
    }

    /// Set the retry policy for write batches.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the configuration and return the parsed base URL.
    pub fn validate(&self) -> Result<Url> {
        if self.url.trim().is_empty() {
            return Err(Error::InvalidConfig("URL must not be empty".to_string()));
        }
        let url = Url::parse(self.url.trim())
            .map_err(|e| Error::InvalidConfig(format!("invalid URL '{}': {}", self.url, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::InvalidConfig(format!(
                "unsupported URL scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::InvalidConfig(format!("URL '{}' has no host", self.url)));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }
        if self.max_batch_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max batch bytes must be positive".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout must be positive".to_string()));
        }
        if !self.token.is_empty()
            && HeaderValue::from_str(&format!("Token {}", self.token)).is_err()
        {
            return Err(Error::InvalidConfig(
                "token contains characters not allowed in an HTTP header".to_string(),
            ));
        }
        Ok(url)
    }
}
