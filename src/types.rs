//! Table and record types for Flux query results.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};

use crate::error::Error;
use crate::value::Value;

/// Columns that are never user tags.
const RESERVED_COLUMNS: [&str; 8] = [
    "result",
    "table",
    "_start",
    "_stop",
    "_time",
    "_value",
    "_field",
    "_measurement",
];

/// Data types supported in InfluxDB annotated CSV.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DataType {
    /// String data type.
    #[default]
    String,
    /// 64-bit floating point.
    Double,
    /// Boolean value.
    Bool,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    UnsignedLong,
    /// Duration (Go-style, e.g., "1h30m").
    Duration,
    /// Base64-encoded binary data.
    Base64Binary,
    /// RFC3339 timestamp (with optional nanosecond precision).
    TimeRFC,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "string" => Ok(Self::String),
            "double" => Ok(Self::Double),
            "boolean" => Ok(Self::Bool),
            "long" => Ok(Self::Long),
            "unsignedLong" => Ok(Self::UnsignedLong),
            "duration" => Ok(Self::Duration),
            "base64Binary" => Ok(Self::Base64Binary),
            "dateTime:RFC3339" | "dateTime:RFC3339Nano" => Ok(Self::TimeRFC),
            _ => Err(Error::UnknownDataType(input.to_string())),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Double => "double",
            DataType::Bool => "boolean",
            DataType::Long => "long",
            DataType::UnsignedLong => "unsignedLong",
            DataType::Duration => "duration",
            DataType::Base64Binary => "base64Binary",
            DataType::TimeRFC => "dateTime:RFC3339",
        };
        write!(f, "{}", s)
    }
}

/// Metadata for a column in a Flux table.
#[derive(Clone, Debug, Default)]
pub struct FluxColumn {
    /// Column name.
    pub name: String,
    /// Data type of the column.
    pub data_type: DataType,
    /// Whether this column is part of the group key.
    pub group: bool,
    /// Default value for missing entries.
    pub default_value: String,
}

/// Metadata for a Flux table (one result set from a query).
#[derive(Clone, Debug)]
pub struct FluxTableMetadata {
    /// Table position/index in the query results.
    pub position: i32,
    /// Column definitions for this table.
    pub columns: Vec<FluxColumn>,
}

impl FluxTableMetadata {
    /// Create table metadata with `column_count` untyped, unnamed columns.
    pub fn new(position: i32, column_count: usize) -> Self {
        Self {
            position,
            columns: vec![FluxColumn::default(); column_count],
        }
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&FluxColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns that make up the group key.
    pub fn group_key(&self) -> impl Iterator<Item = &FluxColumn> {
        self.columns.iter().filter(|c| c.group)
    }
}

/// A single record (row) from a Flux query result.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxRecord {
    /// Table index this record belongs to.
    pub table: i32,
    /// Column name to value mapping.
    pub values: BTreeMap<String, Value>,
}

impl FluxRecord {
    /// Create a new empty FluxRecord.
    pub fn new(table: i32) -> Self {
        Self {
            table,
            values: BTreeMap::new(),
        }
    }

    /// Get a value by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Get value as string.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get(name).and_then(|v| v.string())
    }

    /// Get value as f64.
    pub fn get_double(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(|v| v.as_double())
    }

    /// Get value as i64.
    pub fn get_long(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|v| v.as_long())
    }

    /// Get value as u64.
    pub fn get_unsigned_long(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(|v| v.as_unsigned_long())
    }

    /// Get value as bool.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|v| v.as_bool())
    }

    /// The `_time` column.
    pub fn time(&self) -> Option<&DateTime<FixedOffset>> {
        self.get("_time").and_then(|v| v.as_time())
    }

    /// The `_start` column (inclusive lower bound of the queried range).
    pub fn start(&self) -> Option<&DateTime<FixedOffset>> {
        self.get("_start").and_then(|v| v.as_time())
    }

    /// The `_stop` column (exclusive upper bound of the queried range).
    pub fn stop(&self) -> Option<&DateTime<FixedOffset>> {
        self.get("_stop").and_then(|v| v.as_time())
    }

    /// The `_measurement` column.
    pub fn measurement(&self) -> Option<String> {
        self.get_string("_measurement")
    }

    /// The `_field` column.
    pub fn field(&self) -> Option<String> {
        self.get_string("_field")
    }

    /// The `_value` column.
    pub fn value(&self) -> Option<&Value> {
        self.get("_value")
    }

    /// Name of the result this record belongs to (`result` column).
    pub fn result(&self) -> Option<String> {
        self.get_string("result")
    }

    /// String columns other than the Flux system columns and `_measurement`.
    pub fn tags(&self) -> BTreeMap<&str, &str> {
        self.values
            .iter()
            .filter(|(k, _)| !RESERVED_COLUMNS.contains(&k.as_str()))
            .filter_map(|(k, v)| v.as_string().map(|s| (k.as_str(), s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FluxRecord {
        let mut record = FluxRecord::new(0);
        record
            .values
            .insert("result".to_string(), Value::String("_result".to_string()));
        record
            .values
            .insert("_measurement".to_string(), Value::String("cpu".to_string()));
        record
            .values
            .insert("_field".to_string(), Value::String("usage".to_string()));
        record
            .values
            .insert("host".to_string(), Value::String("server01".to_string()));
        record.values.insert("_value".to_string(), Value::Long(7));
        record
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!("dateTime:RFC3339Nano".parse::<DataType>().unwrap(), DataType::TimeRFC);
        assert_eq!("unsignedLong".parse::<DataType>().unwrap(), DataType::UnsignedLong);
        assert!(matches!(
            "decimal".parse::<DataType>(),
            Err(Error::UnknownDataType(t)) if t == "decimal"
        ));
        assert_eq!(DataType::Bool.to_string(), "boolean");
    }

    #[test]
    fn test_record_accessors() {
        let record = record();
        assert_eq!(record.measurement().as_deref(), Some("cpu"));
        assert_eq!(record.field().as_deref(), Some("usage"));
        assert_eq!(record.result().as_deref(), Some("_result"));
        assert_eq!(record.get_long("_value"), Some(7));
        assert_eq!(record.get_double("_value"), None);
        assert!(record.time().is_none());
    }

    #[test]
    fn test_record_tags() {
        let record = record();
        let tags = record.tags();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags.get("host"), Some(&"server01"));
    }

    #[test]
    fn test_group_key() {
        let mut table = FluxTableMetadata::new(0, 3);
        table.columns[0].name = "_measurement".to_string();
        table.columns[0].group = true;
        table.columns[1].name = "_value".to_string();
        table.columns[2].name = "host".to_string();
        table.columns[2].group = true;
        let names: Vec<_> = table.group_key().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["_measurement", "host"]);
        assert!(table.column("_value").is_some());
    }
}
