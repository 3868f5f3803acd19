// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Decoded bluewalker measurement records.
//!
//! The scanner writes one JSON object per line to the ingestion socket:
//!
//! ```json
//! {"type":"ruuvi","device":{"address":"AA:BB:CC:DD:EE:FF"},"sensors":{...}}
//! ```

use serde::Deserialize;
use serde_json::Number;
use std::collections::HashMap;
use thiserror::Error;

/// Device kind reported by the scanner.
///
/// Anything other than the two recognized kinds decodes to [`DeviceKind::Unknown`]
/// so the record can be counted and skipped without tearing down the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Ruuvi,
    Mijia,
    #[serde(other)]
    Unknown,
}

impl DeviceKind {
    /// Wire name of the kind, as used in the `type` tag/field of both sinks.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Ruuvi => "ruuvi",
            DeviceKind::Mijia => "mijia",
            DeviceKind::Unknown => "unknown",
        }
    }
}

/// Device identity block of a record.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    /// Bluetooth MAC address, e.g. `AA:BB:CC:DD:EE:FF`.
    pub address: String,
}

/// One measurement record, decoded from a single input line.
#[derive(Debug, Clone, Deserialize)]
pub struct Measurement {
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    pub device: DeviceInfo,
    /// Sensor readings by field name. A non-numeric value anywhere in
    /// this map fails the decode of the whole record.
    pub sensors: HashMap<String, Number>,
}

impl Measurement {
    /// Decode one newline-framed JSON record.
    pub fn from_json_line(line: &str) -> Result<Self, MalformedMeasurement> {
        Ok(serde_json::from_str(line)?)
    }

    /// Device address: the rate-limit key and MQTT topic suffix.
    pub fn address(&self) -> &str {
        &self.device.address
    }
}

/// Malformed-input conditions.
///
/// All variants are recoverable: the record is logged and skipped and the
/// connection stays up.
#[derive(Debug, Error)]
pub enum MalformedMeasurement {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unrecognized device kind")]
    UnknownKind,

    #[error("missing sensor field: {0}")]
    MissingField(&'static str),

    #[error("non-numeric sensor field: {0}")]
    NonNumeric(&'static str),

    #[error("input line exceeds maximum record size")]
    OverlongLine,

    #[error("input line is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ruuvi_record() {
        let line = r#"{"type":"ruuvi","device":{"address":"AA:BB:CC:DD:EE:FF"},
            "sensors":{"humidity":40.25,"temperature":20.5,"voltage":2985,
            "pressure":101325,"accelerationX":12,"accelerationY":-4,
            "accelerationZ":1016,"movementCount":7}}"#;

        let m = Measurement::from_json_line(line).expect("decode");
        assert_eq!(m.kind, DeviceKind::Ruuvi);
        assert_eq!(m.address(), "AA:BB:CC:DD:EE:FF");
        assert_eq!(m.sensors.len(), 8);
        assert_eq!(m.sensors["movementCount"].as_i64(), Some(7));
    }

    #[test]
    fn test_decode_mijia_record() {
        let line = r#"{"type":"mijia","device":{"address":"11:22:33:44:55:66"},
            "sensors":{"humidity":45.67,"temperature":21.34,"voltage":2.987,"level":80}}"#;

        let m = Measurement::from_json_line(line).expect("decode");
        assert_eq!(m.kind, DeviceKind::Mijia);
        assert_eq!(m.sensors["level"].as_i64(), Some(80));
    }

    #[test]
    fn test_unknown_kind_decodes_but_is_flagged() {
        let line = r#"{"type":"xiaomi2","device":{"address":"00:00:00:00:00:01"},"sensors":{}}"#;
        let m = Measurement::from_json_line(line).expect("decode");
        assert_eq!(m.kind, DeviceKind::Unknown);
    }

    #[test]
    fn test_non_numeric_sensor_rejected_at_decode() {
        let line = r#"{"type":"mijia","device":{"address":"X"},"sensors":{"humidity":"wet"}}"#;
        let err = Measurement::from_json_line(line).unwrap_err();
        assert!(matches!(err, MalformedMeasurement::Json(_)));
    }

    #[test]
    fn test_truncated_json_rejected() {
        let err = Measurement::from_json_line(r#"{"type":"ruuvi","devi"#).unwrap_err();
        assert!(matches!(err, MalformedMeasurement::Json(_)));
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(DeviceKind::Ruuvi.as_str(), "ruuvi");
        assert_eq!(DeviceKind::Mijia.as_str(), "mijia");
    }
}
