//! Batched line-protocol writes.

use std::sync::Arc;

use reqwest::header::CONTENT_TYPE;

use crate::config::{ClientConfig, RetryPolicy, WritePrecision};
use crate::error::{Error, Result};
use crate::point::Point;
use crate::transport::{HttpRequest, LOG_TARGET, Transport};

const WRITE_PATH: &str = "/api/v2/write";

/// A serialized write request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Batch {
    pub(crate) body: String,
    pub(crate) points: usize,
}

/// Split points into request bodies of at most `max_points` lines and
/// `max_bytes` bytes. A single line longer than `max_bytes` is sent alone.
pub(crate) fn batches(
    points: &[Point],
    precision: WritePrecision,
    max_points: usize,
    max_bytes: usize,
) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current = Batch {
        body: String::new(),
        points: 0,
    };

    for point in points {
        let line = point.to_line_protocol(precision);
        let grown = current.body.len() + usize::from(current.points > 0) + line.len();
        if current.points > 0 && (current.points >= max_points || grown > max_bytes) {
            batches.push(std::mem::replace(
                &mut current,
                Batch {
                    body: String::new(),
                    points: 0,
                },
            ));
        }
        if current.points > 0 {
            current.body.push('\n');
        }
        current.body.push_str(&line);
        current.points += 1;
    }

    if current.points > 0 {
        batches.push(current);
    }
    batches
}

/// Client for `POST /api/v2/write`.
///
/// Batches are sent one after another. The first failing batch stops the
/// write; batches before it have already been accepted by the server. Nothing
/// is retried unless the client was configured with a [`RetryPolicy`].
#[derive(Clone)]
pub struct WriteClient {
    transport: Arc<Transport>,
    org: String,
    precision: WritePrecision,
    batch_size: usize,
    max_batch_bytes: usize,
    retry: RetryPolicy,
}

impl WriteClient {
    pub(crate) fn new(transport: Arc<Transport>, config: &ClientConfig) -> Self {
        Self {
            transport,
            org: config.org.clone(),
            precision: config.precision,
            batch_size: config.batch_size,
            max_batch_bytes: config.max_batch_bytes,
            retry: config.retry.clone(),
        }
    }

    /// Write points to `bucket`, split into batches.
    ///
    /// An empty slice sends nothing. On failure the error is
    /// [`Error::WriteBatch`], naming the failing batch.
    pub async fn write(&self, bucket: &str, points: &[Point]) -> Result<()> {
        if self.transport.is_closed() {
            return Err(Error::ClosedClient);
        }
        let batches = batches(points, self.precision, self.batch_size, self.max_batch_bytes);
        let total = batches.len();
        let mut written = 0;

        for (index, batch) in batches.into_iter().enumerate() {
            let points = batch.points;
            if let Err(source) = self.send_with_retry(bucket, batch.body).await {
                // Closing the client is terminal, not a partial write
                if matches!(source, Error::ClosedClient) {
                    return Err(source);
                }
                tracing::warn!(
                    target: LOG_TARGET,
                    bucket,
                    batch = index,
                    batches = total,
                    points_written = written,
                    error = %source,
                    "write batch failed"
                );
                return Err(Error::WriteBatch {
                    batch: index,
                    batches: total,
                    points_written: written,
                    source: Box::new(source),
                });
            }
            written += points;
        }

        tracing::debug!(
            target: LOG_TARGET,
            bucket,
            points = written,
            batches = total,
            "write complete"
        );
        Ok(())
    }

    /// Write a single point.
    pub async fn write_point(&self, bucket: &str, point: &Point) -> Result<()> {
        self.write(bucket, std::slice::from_ref(point)).await
    }

    /// Write pre-serialized line protocol as one request, without batching.
    pub async fn write_line_protocol(&self, bucket: &str, body: impl Into<String>) -> Result<()> {
        let body = body.into();
        if body.trim().is_empty() {
            return if self.transport.is_closed() {
                Err(Error::ClosedClient)
            } else {
                Ok(())
            };
        }
        self.send_with_retry(bucket, body).await
    }

    async fn send_with_retry(&self, bucket: &str, body: String) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.send(bucket, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt, e.retry_after());
                    tracing::info!(
                        target: LOG_TARGET,
                        bucket,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying write"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(&self, bucket: &str, body: String) -> Result<()> {
        let request = HttpRequest::post(WRITE_PATH)
            .query("org", self.org.clone())
            .query("bucket", bucket)
            .query("precision", self.precision.as_str())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body);
        self.transport.send_checked(request).await?;
        Ok(())
    }
}
