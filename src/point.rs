//! Points and their line-protocol serialization.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::config::WritePrecision;
use crate::error::{Error, Result};

/// A field value in a [`Point`].
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// 64-bit float, written without suffix.
    Float(f64),
    /// Signed integer, written with an `i` suffix.
    Integer(i64),
    /// Unsigned integer, written with a `u` suffix.
    UInteger(u64),
    /// String, written quoted.
    String(String),
    /// Boolean.
    Boolean(bool),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Integer(v as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInteger(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// A single time-series point.
///
/// Points are immutable; build them with [`Point::builder`].
///
/// # Example
///
/// ```ignore
/// use influxdb_flux::Point;
///
/// let point = Point::builder("temperature")
///     .tag("host", "server01")
///     .field("value", 21.5)
///     .timestamp_nanos(1_700_000_000_000_000_000)
///     .build()?;
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<i64>,
}

impl Point {
    /// Start building a point for the given measurement.
    pub fn builder(measurement: impl Into<String>) -> PointBuilder {
        PointBuilder {
            measurement: measurement.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
            error: None,
        }
    }

    /// Measurement name.
    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    /// Tags, ordered by key.
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// Fields, ordered by key.
    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Timestamp in nanoseconds since the Unix epoch, if set.
    pub fn timestamp_nanos(&self) -> Option<i64> {
        self.timestamp
    }

    /// Timestamp, if set.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp.map(DateTime::from_timestamp_nanos)
    }

    /// Serialize to a single line of line protocol.
    ///
    /// Without a timestamp the server assigns its own receive time.
    pub fn to_line_protocol(&self, precision: WritePrecision) -> String {
        let mut line = String::with_capacity(64);
        escape_into(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            line.push(',');
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            escape_into(&mut line, value, &[',', '=', ' ']);
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            escape_into(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            write_field_value(&mut line, value);
        }

        if let Some(nanos) = self.timestamp {
            let _ = write!(line, " {}", scale_timestamp(nanos, precision));
        }
        line
    }
}

/// Builder for [`Point`].
///
/// Invalid input is remembered and reported by [`PointBuilder::build`].
#[derive(Clone, Debug)]
pub struct PointBuilder {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: Option<i64>,
    error: Option<String>,
}

impl PointBuilder {
    /// Add a tag. Tags with an empty value are skipped, as the server drops them.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        if key.is_empty() {
            self.error.get_or_insert_with(|| "tag key must not be empty".to_string());
        } else if !value.is_empty() {
            self.tags.insert(key, value);
        }
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let key = key.into();
        let value = value.into();
        let finite = match value {
            FieldValue::Float(f) => f.is_finite(),
            _ => true,
        };
        if key.is_empty() {
            self.error.get_or_insert_with(|| "field key must not be empty".to_string());
        } else if !finite {
            self.error
                .get_or_insert_with(|| format!("field '{}' is not a finite number", key));
        } else {
            self.fields.insert(key, value);
        }
        self
    }

    /// Set the timestamp.
    pub fn time(mut self, time: DateTime<Utc>) -> Self {
        match time.timestamp_nanos_opt() {
            Some(nanos) => self.timestamp = Some(nanos),
            None => {
                self.error
                    .get_or_insert_with(|| format!("timestamp {} is out of range", time));
            }
        }
        self
    }

    /// Set the timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp_nanos(mut self, nanos: i64) -> Self {
        self.timestamp = Some(nanos);
        self
    }

    /// Validate and build the point.
    pub fn build(self) -> Result<Point> {
        if let Some(message) = self.error {
            return Err(Error::InvalidPoint(message));
        }
        if self.measurement.is_empty() {
            return Err(Error::InvalidPoint("measurement must not be empty".to_string()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidPoint(format!(
                "point '{}' has no fields",
                self.measurement
            )));
        }
        Ok(Point {
            measurement: self.measurement,
            tags: self.tags,
            fields: self.fields,
            timestamp: self.timestamp,
        })
    }
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

fn write_field_value(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Float(f) => {
            let _ = write!(out, "{}", f);
        }
        FieldValue::Integer(i) => {
            let _ = write!(out, "{}i", i);
        }
        FieldValue::UInteger(u) => {
            let _ = write!(out, "{}u", u);
        }
        FieldValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        FieldValue::String(s) => {
            out.push('"');
            for c in s.chars() {
                if c == '"' || c == '\\' {
                    out.push('\\');
                }
                out.push(c);
            }
            out.push('"');
        }
    }
}

fn scale_timestamp(nanos: i64, precision: WritePrecision) -> i64 {
    match precision {
        WritePrecision::Nanos => nanos,
        WritePrecision::Micros => nanos.div_euclid(1_000),
        WritePrecision::Millis => nanos.div_euclid(1_000_000),
        WritePrecision::Seconds => nanos.div_euclid(1_000_000_000),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_line() {
        let point = Point::builder("cpu")
            .tag("host", "server01")
            .tag("region", "us-west")
            .field("usage", 0.64)
            .timestamp_nanos(1_434_055_562_000_000_000)
            .build()
            .unwrap();
        assert_eq!(
            point.to_line_protocol(WritePrecision::Nanos),
            "cpu,host=server01,region=us-west usage=0.64 1434055562000000000"
        );
    }

    #[test]
    fn test_field_types() {
        let point = Point::builder("m")
            .field("f", 1.0)
            .field("i", -42i64)
            .field("u", 7u64)
            .field("b", true)
            .field("s", "hello")
            .build()
            .unwrap();
        assert_eq!(
            point.to_line_protocol(WritePrecision::Nanos),
            r#"m b=true,f=1,i=-42i,s="hello",u=7u"#
        );
    }

    #[test]
    fn test_tags_are_sorted() {
        let point = Point::builder("m")
            .tag("z", "1")
            .tag("a", "2")
            .field("v", 1i64)
            .build()
            .unwrap();
        assert_eq!(point.to_line_protocol(WritePrecision::Nanos), "m,a=2,z=1 v=1i");
    }

    #[test]
    fn test_escaping() {
        let point = Point::builder("my measurement,x")
            .tag("tag key", "a=b,c")
            .field("field=key", r#"say "hi" \o/"#)
            .build()
            .unwrap();
        assert_eq!(
            point.to_line_protocol(WritePrecision::Nanos),
            r#"my\ measurement\,x,tag\ key=a\=b\,c field\=key="say \"hi\" \\o/""#
        );
    }

    #[test]
    fn test_newlines_in_keys_are_escaped() {
        let point = Point::builder("m")
            .tag("host", "a\nb")
            .field("v", 1i64)
            .build()
            .unwrap();
        let line = point.to_line_protocol(WritePrecision::Nanos);
        assert!(!line.contains('\n'));
        assert_eq!(line, "m,host=a\\nb v=1i");
    }

    #[test]
    fn test_precision_scaling() {
        let point = Point::builder("m")
            .field("v", 1i64)
            .timestamp_nanos(1_700_000_000_123_456_789)
            .build()
            .unwrap();
        assert!(point.to_line_protocol(WritePrecision::Micros).ends_with(" 1700000000123456"));
        assert!(point.to_line_protocol(WritePrecision::Millis).ends_with(" 1700000000123"));
        assert!(point.to_line_protocol(WritePrecision::Seconds).ends_with(" 1700000000"));
    }

    #[test]
    fn test_time_roundtrip() {
        let t = DateTime::parse_from_rfc3339("2023-11-14T22:13:20Z")
            .unwrap()
            .with_timezone(&Utc);
        let point = Point::builder("m").field("v", 1i64).time(t).build().unwrap();
        assert_eq!(point.timestamp(), Some(t));
        assert_eq!(point.timestamp_nanos(), Some(1_700_000_000_000_000_000));
    }

    #[test]
    fn test_point_requires_a_field() {
        let err = Point::builder("m").tag("host", "a").build().unwrap_err();
        assert!(matches!(err, Error::InvalidPoint(_)));
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        assert!(Point::builder("").field("v", 1i64).build().is_err());
        assert!(Point::builder("m").field("", 1i64).build().is_err());
        assert!(Point::builder("m").tag("", "x").field("v", 1i64).build().is_err());
        assert!(Point::builder("m").field("v", f64::NAN).build().is_err());
        assert!(Point::builder("m").field("v", f64::INFINITY).build().is_err());
    }

    #[test]
    fn test_empty_tag_value_is_skipped() {
        let point = Point::builder("m")
            .tag("host", "")
            .field("v", 1i64)
            .build()
            .unwrap();
        assert!(point.tags().is_empty());
    }
}
