//! Error types for influxdb-flux.

use std::time::Duration;

use thiserror::Error;

/// Error type for influxdb-flux operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The server could not be reached (connect failure, timeout, broken transport).
    #[error("Cannot reach InfluxDB: {source}")]
    Connectivity {
        /// Underlying transport error, usually a `reqwest::Error` or `io::Error`.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The server rejected the credentials (401 or 403).
    #[error("Authentication failed ({status}): {message}")]
    Auth {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response.
        message: String,
        /// Response body, truncated.
        body: String,
    },

    /// The requested resource does not exist (404).
    #[error("Not found ({status}): {message}")]
    NotFound {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response.
        message: String,
        /// Response body, truncated.
        body: String,
    },

    /// The server is throttling requests (429).
    #[error("Rate limited ({status}): {message}")]
    RateLimited {
        /// HTTP status code.
        status: u16,
        /// Delay requested by the `Retry-After` header, if any.
        retry_after: Option<Duration>,
        /// Error message extracted from the response.
        message: String,
        /// Response body, truncated.
        body: String,
    },

    /// The server failed to handle the request (5xx).
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response.
        message: String,
        /// Response body, truncated.
        body: String,
    },

    /// Any other non-success status, e.g. 400 for an invalid Flux query.
    #[error("Unexpected response ({status}): {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response.
        message: String,
        /// Response body, truncated.
        body: String,
    },

    /// The client has been closed.
    #[error("Client is closed")]
    ClosedClient,

    /// The response could not be interpreted.
    #[error("Malformed response: {message}")]
    MalformedResponse {
        /// Description of what was wrong with the response.
        message: String,
        /// HTTP status code, when a response was received.
        status: Option<u16>,
    },

    /// The client configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A point could not be built.
    #[error("Invalid point: {0}")]
    InvalidPoint(String),

    /// One batch of a write failed. Earlier batches were accepted by the server.
    #[error("Write batch {batch} of {batches} failed after {points_written} points were written: {source}")]
    WriteBatch {
        /// Zero-based index of the failing batch.
        batch: usize,
        /// Total number of batches in the write.
        batches: usize,
        /// Points accepted before the failing batch.
        points_written: usize,
        /// Error returned for the failing batch.
        #[source]
        source: Box<Error>,
    },

    /// Failed to serialize query to JSON.
    #[error("Failed to serialize query: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to parse CSV data.
    #[error("CSV parse error: {0}")]
    Csv(String),

    /// Failed to parse a value from the response.
    #[error("Failed to parse value: {message}")]
    Parse {
        /// Description of what failed to parse.
        message: String,
    },

    /// Unknown data type in annotated CSV.
    #[error("Unknown data type: {0}")]
    UnknownDataType(String),

    /// Missing required annotation in CSV.
    #[error("Missing annotation: {0}")]
    MissingAnnotation(String),

    /// Row has different number of columns than expected.
    #[error("Column count mismatch: expected {expected}, got {actual}")]
    ColumnMismatch {
        /// Expected number of columns.
        expected: usize,
        /// Actual number of columns found.
        actual: usize,
    },

    /// Query returned an error from InfluxDB.
    #[error("Query error from InfluxDB: {message}")]
    QueryError {
        /// Error message returned by InfluxDB.
        message: String,
        /// Optional reference link for debugging.
        reference: Option<String>,
    },

    /// I/O error during streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code attached to this error, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Auth { status, .. }
            | Error::NotFound { status, .. }
            | Error::RateLimited { status, .. }
            | Error::Server { status, .. }
            | Error::UnexpectedStatus { status, .. } => Some(*status),
            Error::MalformedResponse { status, .. } => *status,
            Error::WriteBatch { source, .. } => source.status(),
            _ => None,
        }
    }

    /// Truncated response body attached to this error, if any.
    pub fn body(&self) -> Option<&str> {
        match self {
            Error::Auth { body, .. }
            | Error::NotFound { body, .. }
            | Error::RateLimited { body, .. }
            | Error::Server { body, .. }
            | Error::UnexpectedStatus { body, .. } => Some(body),
            Error::WriteBatch { source, .. } => source.body(),
            _ => None,
        }
    }

    /// Whether repeating the same request may succeed.
    ///
    /// Only consulted by an explicitly configured [`RetryPolicy`](crate::RetryPolicy).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connectivity { .. } | Error::RateLimited { .. } => true,
            Error::Server { status, .. } => *status == 503,
            _ => false,
        }
    }

    /// Delay the server asked for before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(source: reqwest::Error) -> Self {
        if source.is_decode() {
            Error::MalformedResponse {
                message: source.to_string(),
                status: source.status().map(|s| s.as_u16()),
            }
        } else {
            Error::Connectivity {
                source: Box::new(source),
            }
        }
    }
}

/// Result type alias for influxdb-flux operations.
pub type Result<T> = std::result::Result<T, Error>;
