//! Time-series points and line-protocol rendering
//!
//! A [`Point`] is one validated time-series datum: measurement, tag set,
//! field set, and a nanosecond timestamp. Points are rendered to the
//! line-protocol wire format most time-series sinks accept:
//!
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! Tags are sorted by key for a canonical form; special characters in
//! measurement, keys and values are backslash-escaped per the protocol.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Tag storage - inline up to 4 tags, the common case for entity points
pub type Tags = SmallVec<[(String, String); 4]>;

/// Field storage - inline up to 4 fields
pub type Fields = SmallVec<[(String, FieldValue); 4]>;

/// A value that can be stored in a time-series field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    /// 64-bit floating point
    Float(f64),
    /// 64-bit signed integer
    Integer(i64),
    /// UTF-8 string
    String(String),
    /// Boolean value
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for the line protocol
    ///
    /// - Float: written as-is (e.g. `3.14`)
    /// - Integer: suffixed with `i` (e.g. `42i`)
    /// - String: double-quoted, inner quotes and backslashes escaped
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }

    /// Whether the value is representable on the wire
    ///
    /// Only non-finite floats are unrepresentable.
    pub fn is_valid(&self) -> bool {
        match self {
            FieldValue::Float(v) => v.is_finite(),
            _ => true,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
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

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

/// One time-series datum ready for a sink write
///
/// # Example
///
/// ```
/// use virta_core::{FieldValue, Point};
///
/// let point = Point::new("sensor", 1_000_000_000)
///     .tag("entity_id", "sensor.kitchen_temperature")
///     .field("value", 21.5);
///
/// assert_eq!(
///     point.to_line_protocol(),
///     "sensor,entity_id=sensor.kitchen_temperature value=21.5 1000000000"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Measurement name (typically the entity domain)
    pub measurement: String,
    /// Tag key-value pairs (indexed, for filtering)
    pub tags: Tags,
    /// Field key-value pairs (the actual data)
    pub fields: Fields,
    /// Timestamp in nanoseconds since the Unix epoch
    pub timestamp_ns: i64,
}

impl Point {
    /// Create a point with no tags or fields
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            tags: SmallVec::new(),
            fields: SmallVec::new(),
            timestamp_ns,
        }
    }

    /// Add a tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Add a field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Render this point in line-protocol format
    ///
    /// Tags are sorted by key for canonical output. An empty field set
    /// renders without a field section and is rejected by point validation
    /// upstream; rendering itself never fails.
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        let mut sorted_tags: Vec<_> = self.tags.iter().collect();
        sorted_tags.sort_by(|(a, _), (b, _)| a.cmp(b));
        for (key, value) in sorted_tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

/// Escape a measurement name: commas and spaces
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Escape a tag key, tag value, or field key: commas, equals signs, spaces
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_float() {
        assert_eq!(FieldValue::Float(3.15).to_line_protocol(), "3.15");
    }

    #[test]
    fn test_field_value_integer() {
        assert_eq!(FieldValue::Integer(42).to_line_protocol(), "42i");
    }

    #[test]
    fn test_field_value_string_with_quotes() {
        let v = FieldValue::String("say \"hi\"".to_string());
        assert_eq!(v.to_line_protocol(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_field_value_boolean() {
        assert_eq!(FieldValue::Boolean(true).to_line_protocol(), "true");
        assert_eq!(FieldValue::Boolean(false).to_line_protocol(), "false");
    }

    #[test]
    fn test_field_value_validity() {
        assert!(FieldValue::Float(1.0).is_valid());
        assert!(!FieldValue::Float(f64::NAN).is_valid());
        assert!(!FieldValue::Float(f64::INFINITY).is_valid());
        assert!(FieldValue::Integer(i64::MIN).is_valid());
        assert!(FieldValue::String(String::new()).is_valid());
    }

    #[test]
    fn test_simple_point() {
        let point = Point::new("temperature", 1_000_000_000).field("value", 23.5);
        assert_eq!(point.to_line_protocol(), "temperature value=23.5 1000000000");
    }

    #[test]
    fn test_tags_sorted_by_key() {
        let point = Point::new("temperature", 1_000_000_000)
            .tag("sensor", "A1")
            .tag("location", "room1")
            .field("value", 23.5);

        assert_eq!(
            point.to_line_protocol(),
            "temperature,location=room1,sensor=A1 value=23.5 1000000000"
        );
    }

    #[test]
    fn test_multiple_fields_preserve_order() {
        let point = Point::new("weather", 2_000_000_000)
            .tag("station", "north")
            .field("temp", 22.1)
            .field("humidity", 65i64)
            .field("ok", true);

        assert_eq!(
            point.to_line_protocol(),
            "weather,station=north temp=22.1,humidity=65i,ok=true 2000000000"
        );
    }

    #[test]
    fn test_escape_special_chars() {
        let point = Point::new("my measurement", 3_000_000_000)
            .tag("tag key", "tag,value")
            .field("field=key", "hello \"world\"");

        assert_eq!(
            point.to_line_protocol(),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello \\\"world\\\"\" 3000000000"
        );
    }

    #[test]
    fn test_field_value_conversions() {
        let point = Point::new("m", 1)
            .field("f", 1.5)
            .field("i", 2i64)
            .field("s", "text")
            .field("b", false);

        assert_eq!(point.fields[0].1, FieldValue::Float(1.5));
        assert_eq!(point.fields[1].1, FieldValue::Integer(2));
        assert_eq!(point.fields[2].1, FieldValue::String("text".to_string()));
        assert_eq!(point.fields[3].1, FieldValue::Boolean(false));
    }
}
