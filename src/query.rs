//! Flux queries with streamed results.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_stream::stream;
use futures::{Stream, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::parser::AnnotatedCsvParser;
use crate::transport::{HttpRequest, LOG_TARGET, Transport};
use crate::types::FluxRecord;

const QUERY_PATH: &str = "/api/v2/query";

/// Query payload for the InfluxDB API.
#[derive(Debug, Serialize)]
struct QueryPayload {
    query: String,
    #[serde(rename = "type")]
    query_type: &'static str,
    dialect: QueryDialect,
}

/// CSV dialect settings for query responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryDialect {
    annotations: [&'static str; 3],
    comment_prefix: &'static str,
    date_time_format: &'static str,
    delimiter: &'static str,
    header: bool,
}

impl QueryPayload {
    fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            query_type: "flux",
            dialect: QueryDialect {
                annotations: ["datatype", "group", "default"],
                comment_prefix: "#",
                date_time_format: "RFC3339",
                delimiter: ",",
                header: true,
            },
        }
    }
}

type RecordStream = Pin<Box<dyn Stream<Item = Result<FluxRecord>> + Send>>;

/// Lazily parsed result of a Flux query.
///
/// Records are produced as the response body arrives. The result is single
/// pass: once it returns `None` (end of data, an error, or [`close`](Self::close))
/// it stays exhausted. Dropping or closing it releases the HTTP connection.
///
/// Also usable as a `futures::Stream`.
pub struct QueryResult {
    inner: Option<RecordStream>,
    transport: Arc<Transport>,
}

impl QueryResult {
    /// Next record, or `None` when the result is exhausted or closed.
    ///
    /// If the owning client was closed, yields `Err(ClosedClient)` once.
    pub async fn next(&mut self) -> Option<Result<FluxRecord>> {
        futures::StreamExt::next(self).await
    }

    /// Stop reading and release the connection. Never fails; safe to repeat.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(target: LOG_TARGET, "query result closed");
        }
    }

    /// Whether no further records will be produced.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

impl Stream for QueryResult {
    type Item = Result<FluxRecord>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.inner.is_none() {
            return Poll::Ready(None);
        }
        if this.transport.is_closed() {
            this.inner = None;
            return Poll::Ready(Some(Err(Error::ClosedClient)));
        }
        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };
        let polled = inner.as_mut().poll_next(cx);
        match &polled {
            Poll::Ready(None) | Poll::Ready(Some(Err(_))) => this.inner = None,
            Poll::Ready(Some(Ok(record))) => this.transport.log_record(record),
            Poll::Pending => {}
        }
        polled
    }
}

impl std::fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Client for `POST /api/v2/query`.
#[derive(Clone)]
pub struct QueryClient {
    transport: Arc<Transport>,
    org: String,
}

impl QueryClient {
    pub(crate) fn new(transport: Arc<Transport>, org: String) -> Self {
        Self { transport, org }
    }

    fn request(&self, query: impl Into<String>) -> Result<HttpRequest<'static>> {
        let body = serde_json::to_string(&QueryPayload::new(query))?;
        Ok(HttpRequest::post(QUERY_PATH)
            .query("org", self.org.clone())
            .header(ACCEPT, "application/csv")
            .header(CONTENT_TYPE, "application/json")
            .body(body))
    }

    /// Execute a Flux query and return its records as a lazy [`QueryResult`].
    ///
    /// HTTP failures are reported here; parse errors and in-band query errors
    /// are reported by the result.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut result = client.querier().query_stream(r#"
    ///     from(bucket: "sensors") |> range(start: -1h)
    /// "#).await?;
    ///
    /// while let Some(record) = result.next().await {
    ///     println!("{:?}", record?);
    /// }
    /// ```
    pub async fn query_stream(&self, query: impl Into<String>) -> Result<QueryResult> {
        let request = self.request(query)?.streamed();
        let response = self.transport.send_checked(request).await?;

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let mut parser = AnnotatedCsvParser::new(reader);

        let records = stream! {
            loop {
                match parser.next().await {
                    Ok(Some(record)) => yield Ok(record),
                    Ok(None) => break,
                    // The reader only fails when the response body does
                    Err(Error::Io(io)) => {
                        yield Err(Error::Connectivity { source: Box::new(io) });
                        break;
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };

        Ok(QueryResult {
            inner: Some(Box::pin(records)),
            transport: self.transport.clone(),
        })
    }

    /// Execute a Flux query and collect all records.
    ///
    /// **Warning**: loads the whole result into memory. Prefer
    /// [`query_stream`](Self::query_stream) for large results.
    pub async fn query(&self, query: impl Into<String>) -> Result<Vec<FluxRecord>> {
        let mut result = self.query_stream(query).await?;
        let mut records = Vec::new();
        while let Some(record) = result.next().await {
            records.push(record?);
        }
        Ok(records)
    }

    /// Execute a Flux query and return the raw annotated CSV.
    pub async fn query_raw(&self, query: impl Into<String>) -> Result<String> {
        let response = self.transport.send_checked(self.request(query)?).await?;
        self.transport.read_body(response).await
    }
}
