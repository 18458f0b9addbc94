//! # influxdb-flux
//!
//! Async client for InfluxDB 2.x: health checks, batched line-protocol writes
//! and Flux queries whose results are streamed one record at a time.
//!
//! ## Quick Start
//!
//! ```ignore
//! use influxdb_flux::{Client, Point};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::new("http://localhost:8086", "my-org", "my-token")?;
//!
//!     assert!(client.ping().await);
//!     println!("InfluxDB {}", client.version().await?);
//!
//!     let point = Point::builder("temperature")
//!         .tag("host", "server01")
//!         .field("value", 21.5)
//!         .build()?;
//!     client.write("sensors", &[point]).await?;
//!
//!     let mut result = client.query_stream(r#"
//!         from(bucket: "sensors")
//!         |> range(start: -30d)
//!         |> filter(fn: (r) => r._measurement == "temperature")
//!     "#).await?;
//!
//!     while let Some(record) = result.next().await {
//!         let record = record?;
//!         println!(
//!             "{}: {} = {:?}",
//!             record.measurement().unwrap_or_default(),
//!             record.field().unwrap_or_default(),
//!             record.value()
//!         );
//!     }
//!
//!     client.close();
//!     Ok(())
//! }
//! ```
//!
//! ## Behaviour worth knowing
//!
//! - `ping()` never fails: an unreachable server is just `false`. `version()`
//!   and every other operation return a typed [`Error`].
//! - Writes are split into batches (`batch_size` points, `max_batch_bytes`
//!   bytes). A failing batch is reported as [`Error::WriteBatch`]; nothing is
//!   retried unless a [`RetryPolicy`] is configured.
//! - Query results are parsed lazily from InfluxDB's annotated CSV. Closing a
//!   [`QueryResult`] early releases the connection.
//! - HTTP exchanges are logged through `tracing` according to [`LogLevel`],
//!   which can be changed at runtime.
//! - After [`Client::close`] every call fails with [`Error::ClosedClient`].

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod mapper;
pub mod parser;
pub mod point;
pub mod query;
pub mod types;
pub mod value;
pub mod write;

mod transport;

// Re-export main types at crate root
pub use client::Client;
pub use config::{ClientConfig, LogLevel, RetryPolicy, WritePrecision};
pub use error::{Error, Result};
pub use health::{HealthCheck, HealthClient, HealthState};
pub use point::{FieldValue, Point, PointBuilder};
pub use query::{QueryClient, QueryResult};
pub use types::{DataType, FluxColumn, FluxRecord, FluxTableMetadata};
pub use value::Value;
pub use write::WriteClient;

// Re-export parser for advanced use cases
pub use parser::AnnotatedCsvParser;
