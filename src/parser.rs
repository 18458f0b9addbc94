//! Streaming parser for the annotated CSV returned by `/api/v2/query`.
//!
//! A response is a sequence of tables. Each table starts with annotation rows
//! (`#datatype`, `#group`, `#default`), followed by a header row and data rows.
//! The first column of every row is the annotation column and is empty for
//! header and data rows. A table whose header starts with `error` carries a
//! query failure reported after the response status was sent.

use std::collections::BTreeMap;
use std::str::FromStr;

use base64::Engine;
use chrono::DateTime;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord, Trim};
use go_parse_duration::parse_duration;
use ordered_float::OrderedFloat;
use tokio::io::AsyncRead;

use crate::error::{Error, Result};
use crate::types::{DataType, FluxRecord, FluxTableMetadata};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    /// Data rows of the current table.
    Data,
    /// Annotation rows, waiting for the header row.
    Annotations,
    /// Inside an error table.
    Error,
}

/// Table bookkeeping, fed one CSV row at a time.
#[derive(Debug)]
struct TableTracker {
    next_position: i32,
    current: Option<FluxTableMetadata>,
    section: Section,
    datatype_seen: bool,
}

impl TableTracker {
    fn new() -> Self {
        Self {
            next_position: 0,
            current: None,
            section: Section::Data,
            datatype_seen: false,
        }
    }

    /// Consume one row; returns a record for data rows.
    fn accept(&mut self, row: &StringRecord) -> Result<Option<FluxRecord>> {
        // Blank separator lines between results
        if row.len() <= 1 {
            return Ok(None);
        }
        let first = cell(row, 0);
        let width = row.len() - 1;

        if first.starts_with('#') && self.section == Section::Data {
            self.current = Some(FluxTableMetadata::new(self.next_position, width));
            self.next_position += 1;
            self.section = Section::Annotations;
            self.datatype_seen = false;
        }

        let Some(table) = self.current.as_mut() else {
            return Err(Error::MissingAnnotation(
                "No annotations found before data".to_string(),
            ));
        };
        if width != table.columns.len() {
            return Err(Error::ColumnMismatch {
                expected: table.columns.len(),
                actual: width,
            });
        }

        match first {
            "#datatype" => {
                self.datatype_seen = true;
                for (column, name) in table.columns.iter_mut().zip(row.iter().skip(1)) {
                    column.data_type = DataType::from_str(name)?;
                }
                Ok(None)
            }
            "#group" => {
                for (column, flag) in table.columns.iter_mut().zip(row.iter().skip(1)) {
                    column.group = flag == "true";
                }
                Ok(None)
            }
            "#default" => {
                for (column, default) in table.columns.iter_mut().zip(row.iter().skip(1)) {
                    column.default_value = default.to_string();
                }
                Ok(None)
            }
            "" => match self.section {
                Section::Annotations => {
                    if !self.datatype_seen {
                        return Err(Error::MissingAnnotation(
                            "#datatype annotation not found".to_string(),
                        ));
                    }
                    if cell(row, 1) == "error" {
                        self.section = Section::Error;
                    } else {
                        for (column, name) in table.columns.iter_mut().zip(row.iter().skip(1)) {
                            column.name = name.to_string();
                        }
                        self.section = Section::Data;
                    }
                    Ok(None)
                }
                Section::Error => {
                    let message = match cell(row, 1) {
                        "" => "Unknown query error".to_string(),
                        m => m.to_string(),
                    };
                    let reference = Some(cell(row, 2))
                        .filter(|r| !r.is_empty())
                        .map(str::to_string);
                    Err(Error::QueryError { message, reference })
                }
                Section::Data => {
                    let mut values = BTreeMap::new();
                    for (column, raw) in table.columns.iter().zip(row.iter().skip(1)) {
                        let raw = if raw.is_empty() {
                            column.default_value.as_str()
                        } else {
                            raw
                        };
                        let value = parse_value(raw, column.data_type, &column.name)?;
                        values.insert(column.name.clone(), value);
                    }
                    Ok(Some(FluxRecord {
                        table: table.position,
                        values,
                    }))
                }
            },
            other => Err(Error::Parse {
                message: format!("Invalid first cell: {}", other),
            }),
        }
    }
}

fn cell(row: &StringRecord, index: usize) -> &str {
    row.get(index).unwrap_or_default()
}

/// Failures of the underlying reader stay `Io`; everything else is bad CSV.
fn read_error(e: csv_async::Error) -> Error {
    let message = e.to_string();
    match e.into_kind() {
        csv_async::ErrorKind::Io(io) => Error::Io(io),
        _ => Error::Csv(format!("CSV read error: {}", message)),
    }
}

/// Async streaming parser for InfluxDB annotated CSV.
///
/// Reads from any `AsyncRead` and yields one [`FluxRecord`] per call, reusing
/// a single row buffer, so memory use does not grow with the result size.
///
/// # Example
///
/// ```ignore
/// use influxdb_flux::AnnotatedCsvParser;
///
/// let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
/// while let Some(record) = parser.next().await? {
///     println!("{:?}", record);
/// }
/// ```
pub struct AnnotatedCsvParser<R: AsyncRead + Unpin> {
    csv: AsyncReader<R>,
    row: StringRecord,
    tracker: TableTracker,
}

impl<R: AsyncRead + Unpin + Send> AnnotatedCsvParser<R> {
    /// Create a new parser from an async reader.
    pub fn new(reader: R) -> Self {
        let csv = AsyncReaderBuilder::new()
            .has_headers(false)
            .trim(Trim::Fields)
            .flexible(true)
            .create_reader(reader);

        Self {
            csv,
            row: StringRecord::new(),
            tracker: TableTracker::new(),
        }
    }

    /// Parse and return the next record.
    ///
    /// Returns `Ok(None)` at the end of the input.
    pub async fn next(&mut self) -> Result<Option<FluxRecord>> {
        loop {
            let more = self
                .csv
                .read_record(&mut self.row)
                .await
                .map_err(read_error)?;
            if !more {
                return Ok(None);
            }
            if let Some(record) = self.tracker.accept(&self.row)? {
                return Ok(Some(record));
            }
        }
    }

    /// Metadata of the table currently being read.
    pub fn table(&self) -> Option<&FluxTableMetadata> {
        self.tracker.current.as_ref()
    }
}

/// Parse a string value into a Value based on the data type.
fn parse_value(s: &str, data_type: DataType, column: &str) -> Result<Value> {
    if s.is_empty() && data_type != DataType::String {
        return Ok(Value::Null);
    }
    let invalid = |kind: &str, detail: String| Error::Parse {
        message: format!("Invalid {} '{}' for column '{}': {}", kind, s, column, detail),
    };

    match data_type {
        DataType::String => Ok(Value::String(s.to_string())),
        DataType::Double => s
            .parse::<f64>()
            .map(|v| Value::Double(OrderedFloat(v)))
            .map_err(|e| invalid("double", e.to_string())),
        DataType::Bool => {
            if s.eq_ignore_ascii_case("true") {
                Ok(Value::Bool(true))
            } else if s.eq_ignore_ascii_case("false") {
                Ok(Value::Bool(false))
            } else {
                Err(invalid("boolean", "expected true or false".to_string()))
            }
        }
        DataType::Long => s
            .parse::<i64>()
            .map(Value::Long)
            .map_err(|e| invalid("long", e.to_string())),
        DataType::UnsignedLong => s
            .parse::<u64>()
            .map(Value::UnsignedLong)
            .map_err(|e| invalid("unsignedLong", e.to_string())),
        DataType::Duration => parse_duration(s)
            .map(|nanos| Value::Duration(chrono::Duration::nanoseconds(nanos)))
            .map_err(|_| invalid("duration", "not a Go duration".to_string())),
        DataType::Base64Binary => base64::engine::general_purpose::STANDARD
            .decode(s)
            .map(Value::Base64Binary)
            .map_err(|e| invalid("base64", e.to_string())),
        DataType::TimeRFC => DateTime::parse_from_rfc3339(s)
            .map(Value::TimeRFC)
            .map_err(|e| invalid("RFC3339 timestamp", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_TABLES: &str = "\
#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,double,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host
,,0,2023-11-14T00:00:00Z,2023-11-15T00:00:00Z,2023-11-14T22:13:20Z,1.5,usage,cpu,a
,,0,2023-11-14T00:00:00Z,2023-11-15T00:00:00Z,2023-11-14T22:13:21Z,2.5,usage,cpu,a

#datatype,string,long,dateTime:RFC3339,dateTime:RFC3339,dateTime:RFC3339,long,string,string,string
#group,false,false,true,true,false,false,true,true,true
#default,_result,,,,,,,,
,result,table,_start,_stop,_time,_value,_field,_measurement,host
,,1,2023-11-14T00:00:00Z,2023-11-15T00:00:00Z,2023-11-14T22:13:20Z,42,count,mem,b
";

    async fn collect(csv: &str) -> Result<Vec<FluxRecord>> {
        let mut parser = AnnotatedCsvParser::new(csv.as_bytes());
        let mut records = Vec::new();
        while let Some(record) = parser.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    #[tokio::test]
    async fn test_parses_multiple_tables() {
        let records = collect(TWO_TABLES).await.unwrap();
        assert_eq!(records.len(), 3);

        assert_eq!(records[0].table, 0);
        assert_eq!(records[0].result().as_deref(), Some("_result"));
        assert_eq!(records[0].get_double("_value"), Some(1.5));
        assert_eq!(records[0].measurement().as_deref(), Some("cpu"));
        assert!(records[0].time().is_some());

        assert_eq!(records[2].table, 1);
        assert_eq!(records[2].get_long("_value"), Some(42));
        assert_eq!(records[2].get_string("host").as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_group_annotation() {
        let mut parser = AnnotatedCsvParser::new(TWO_TABLES.as_bytes());
        parser.next().await.unwrap().unwrap();
        let table = parser.table().unwrap();
        let group: Vec<_> = table.group_key().map(|c| c.name.as_str()).collect();
        assert_eq!(group, vec!["_start", "_stop", "_field", "_measurement", "host"]);
    }

    struct ResetReader;

    impl AsyncRead for ResetReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )))
        }
    }

    #[tokio::test]
    async fn test_reader_failure_is_io_error() {
        use tokio::io::AsyncReadExt;

        let first_table = TWO_TABLES.split("\n\n").next().unwrap().to_string() + "\n";
        let mut parser = AnnotatedCsvParser::new(first_table.as_bytes().chain(ResetReader));
        let mut records = 0;
        let err = loop {
            match parser.next().await {
                Ok(Some(_)) => records += 1,
                Ok(None) => panic!("input should not end cleanly"),
                Err(e) => break e,
            }
        };
        assert!(records <= 2);
        assert!(
            matches!(&err, Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionReset),
            "got {:?}",
            err
        );
    }

    #[tokio::test]
    async fn test_empty_input() {
        assert!(collect("").await.unwrap().is_empty());
        assert!(collect("\r\n").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_table() {
        let csv = "\
#datatype,string,string
#group,true,true
#default,,
,error,reference
,failed to initialize execute state: could not find bucket \"x\",897
";
        match collect(csv).await {
            Err(Error::QueryError { message, reference }) => {
                assert!(message.contains("could not find bucket"));
                assert_eq!(reference.as_deref(), Some("897"));
            }
            other => panic!("expected query error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_data_without_annotations() {
        let csv = ",result,table,_value\n,,0,1\n";
        assert!(matches!(collect(csv).await, Err(Error::MissingAnnotation(_))));
    }

    #[tokio::test]
    async fn test_header_without_datatype() {
        let csv = "#group,false,false\n,result,_value\n,,1\n";
        assert!(matches!(collect(csv).await, Err(Error::MissingAnnotation(_))));
    }

    #[tokio::test]
    async fn test_column_mismatch() {
        let csv = "#datatype,string,long\n,result,_value\n,,1,extra\n";
        assert!(matches!(
            collect(csv).await,
            Err(Error::ColumnMismatch { expected: 2, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_default_fills_empty_cells() {
        let csv = "#datatype,string,long\n#default,_result,7\n,result,_value\n,,\n";
        let records = collect(csv).await.unwrap();
        assert_eq!(records[0].get_long("_value"), Some(7));
        assert_eq!(records[0].result().as_deref(), Some("_result"));
    }

    #[test]
    fn test_parse_value_types() {
        assert_eq!(
            parse_value("-42", DataType::Long, "v").unwrap(),
            Value::Long(-42)
        );
        assert_eq!(
            parse_value("TRUE", DataType::Bool, "v").unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            parse_value("1h30m", DataType::Duration, "v").unwrap(),
            Value::Duration(chrono::Duration::minutes(90))
        );
        assert_eq!(
            parse_value("AQID", DataType::Base64Binary, "v").unwrap(),
            Value::Base64Binary(vec![1, 2, 3])
        );
        assert_eq!(parse_value("", DataType::Double, "v").unwrap(), Value::Null);
        assert_eq!(
            parse_value("", DataType::String, "v").unwrap(),
            Value::String(String::new())
        );
    }

    #[test]
    fn test_parse_value_errors_name_the_column() {
        let err = parse_value("abc", DataType::Double, "_value").unwrap_err();
        assert!(err.to_string().contains("_value"));
        assert!(parse_value("yes", DataType::Bool, "v").is_err());
        assert!(parse_value("-1", DataType::UnsignedLong, "v").is_err());
        assert!(parse_value("yesterday", DataType::TimeRFC, "v").is_err());
    }
}
