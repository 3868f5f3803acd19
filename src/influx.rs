// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB v2 Line Protocol rendering for sensor points.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use serde_json::Number;

/// Measurement name for every point this bridge writes.
pub const MEASUREMENT: &str = "sensor";

/// A numeric value stored in an InfluxDB field.
///
/// Sensor records only carry numbers, so strings and booleans are not
/// represented here.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer, written with the `i` suffix.
    Integer(i64),
}

impl FieldValue {
    /// Convert a JSON number, preserving integer-ness.
    ///
    /// Returns `None` for numbers with no 64-bit representation.
    pub fn from_number(n: &Number) -> Option<Self> {
        if let Some(i) = n.as_i64() {
            Some(FieldValue::Integer(i))
        } else {
            n.as_f64().map(FieldValue::Float)
        }
    }

    /// Format this value for Line Protocol.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
        }
    }
}

/// One time-series point for an accepted measurement.
///
/// Tags are `address` and `type`; fields carry the converted sensor
/// readings; the timestamp is capture time, not device time (the input
/// stream has no timestamps).
#[derive(Debug, Clone)]
pub struct SensorPoint {
    pub address: String,
    pub kind: &'static str,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp_ns: u64,
}

impl SensorPoint {
    /// Render the point as one Line Protocol line.
    ///
    /// Tags are written in alphabetical order (`address`, `type`) for
    /// canonical form.
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::from(MEASUREMENT);
        line.push_str(",address=");
        line.push_str(&escape_tag_value(&self.address));
        line.push_str(",type=");
        line.push_str(&escape_tag_value(self.kind));

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(key);
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ns.to_string());
        line
    }
}

/// Escape a tag value per Line Protocol spec.
/// Commas, equals signs, and spaces must be escaped.
fn escape_tag_value(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
