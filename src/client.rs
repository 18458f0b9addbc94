//! The client facade.
//!
//! [`Client`] owns the transport and hands out the health, write and query
//! clients that share it.

use std::sync::Arc;

use reqwest::Url;

use crate::config::{ClientConfig, LogLevel};
use crate::error::Result;
use crate::health::{HealthCheck, HealthClient};
use crate::point::Point;
use crate::query::{QueryClient, QueryResult};
use crate::transport::{LOG_TARGET, Transport};
use crate::types::FluxRecord;
use crate::write::WriteClient;

/// InfluxDB 2.x client.
///
/// Cloning is cheap; clones share the connection pool, the log level and the
/// closed state.
///
/// # Example
///
/// ```ignore
/// use influxdb_flux::{Client, LogLevel, Point};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = Client::new("http://localhost:8086", "my-org", "my-token")?;
///     client.set_log_level(LogLevel::Basic);
///
///     if !client.ping().await {
///         eprintln!("InfluxDB is not reachable");
///         return Ok(());
///     }
///     println!("connected to InfluxDB {}", client.version().await?);
///
///     let point = Point::builder("temperature")
///         .tag("room", "kitchen")
///         .field("value", 21.5)
///         .build()?;
///     client.write("sensors", &[point]).await?;
///
///     let mut result = client.query_stream(r#"
///         from(bucket: "sensors") |> range(start: -1h)
///     "#).await?;
///     while let Some(record) = result.next().await {
///         println!("{:?}", record?.value());
///     }
///
///     client.close();
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    transport: Arc<Transport>,
    health: HealthClient,
    write: WriteClient,
    query: QueryClient,
    org: String,
}

impl Client {
    /// Create a client with default settings.
    ///
    /// # Arguments
    ///
    /// * `url` - Base URL of the InfluxDB server (e.g., "http://localhost:8086")
    /// * `org` - Organization name
    /// * `token` - Authentication token
    pub fn new(
        url: impl Into<String>,
        org: impl Into<String>,
        token: impl Into<String>,
    ) -> Result<Self> {
        Self::from_config(ClientConfig::new(url).with_org(org).with_token(token))
    }

    /// Create a client from a full configuration.
    ///
    /// Fails with [`Error::InvalidConfig`](crate::Error::InvalidConfig) when the
    /// configuration does not validate.
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let transport = Transport::new(&config)?;
        Ok(Self::assemble(transport, &config))
    }

    /// Create a client around a custom reqwest client.
    ///
    /// This allows you to configure proxies, TLS settings, etc. The configured
    /// timeout still bounds every request up to its response headers.
    pub fn with_http_client(http: reqwest::Client, config: ClientConfig) -> Result<Self> {
        let transport = Transport::with_http_client(http, &config)?;
        Ok(Self::assemble(transport, &config))
    }

    fn assemble(transport: Transport, config: &ClientConfig) -> Self {
        let transport = Arc::new(transport);
        tracing::debug!(
            target: LOG_TARGET,
            url = %transport.base_url(),
            org = %config.org,
            "client created"
        );
        Self {
            health: HealthClient::new(transport.clone()),
            write: WriteClient::new(transport.clone(), config),
            query: QueryClient::new(transport.clone(), config.org.clone()),
            org: config.org.clone(),
            transport,
        }
    }

    /// Get the base URL.
    pub fn url(&self) -> &Url {
        self.transport.base_url()
    }

    /// Get the organization name.
    pub fn org(&self) -> &str {
        &self.org
    }

    /// Health and version endpoints.
    pub fn health(&self) -> &HealthClient {
        &self.health
    }

    /// Write endpoint.
    pub fn writer(&self) -> &WriteClient {
        &self.write
    }

    /// Query endpoint.
    pub fn querier(&self) -> &QueryClient {
        &self.query
    }

    /// Current log level.
    pub fn log_level(&self) -> LogLevel {
        self.transport.log_level()
    }

    /// Change the log level. Applies to requests started after this call.
    pub fn set_log_level(&self, level: LogLevel) {
        self.transport.set_log_level(level);
    }

    /// Release the connection pool.
    ///
    /// Idempotent. Afterwards every operation on this client, its clones and
    /// its sub-clients fails with [`Error::ClosedClient`](crate::Error::ClosedClient),
    /// and [`ping`](Self::ping) returns `false`.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// See [`HealthClient::ping`].
    pub async fn ping(&self) -> bool {
        self.health.ping().await
    }

    /// See [`HealthClient::version`].
    pub async fn version(&self) -> Result<String> {
        self.health.version().await
    }

    /// See [`HealthClient::health`].
    pub async fn health_check(&self) -> Result<HealthCheck> {
        self.health.health().await
    }

    /// See [`WriteClient::write`].
    pub async fn write(&self, bucket: &str, points: &[Point]) -> Result<()> {
        self.write.write(bucket, points).await
    }

    /// See [`QueryClient::query_stream`].
    pub async fn query_stream(&self, query: impl Into<String>) -> Result<QueryResult> {
        self.query.query_stream(query).await
    }

    /// See [`QueryClient::query`].
    pub async fn query(&self, query: impl Into<String>) -> Result<Vec<FluxRecord>> {
        self.query.query(query).await
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.url().as_str())
            .field("org", &self.org)
            .field("log_level", &self.log_level())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
