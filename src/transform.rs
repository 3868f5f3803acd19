// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Kind-specific conversion of measurements into the two sink shapes.
//!
//! Both representations apply the same rules:
//! - humidity and temperature rounded to 1 decimal place;
//! - ruuvi voltage arrives in millivolts: divided by 1000, rounded to
//!   2 decimals;
//! - mijia voltage already arrives in volts: rounded to 2 decimals;
//! - all other recognized fields pass through unchanged, preserving the
//!   JSON number representation (an integer stays an integer).
//!
//! Pure mapping, no I/O.

use crate::influx::{FieldValue, SensorPoint};
use crate::measurement::{DeviceKind, MalformedMeasurement, Measurement};
use serde::Serialize;
use serde_json::Number;
use std::time::{SystemTime, UNIX_EPOCH};

/// Flat JSON object published to the MQTT broker.
///
/// Field order matters only for readability of the wire payload; absent
/// kind-specific fields are omitted entirely.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub address: String,
    pub humidity: f64,
    pub temperature: f64,
    pub voltage: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure: Option<Number>,
    #[serde(rename = "accelerationX", skip_serializing_if = "Option::is_none")]
    pub acceleration_x: Option<Number>,
    #[serde(rename = "accelerationY", skip_serializing_if = "Option::is_none")]
    pub acceleration_y: Option<Number>,
    #[serde(rename = "accelerationZ", skip_serializing_if = "Option::is_none")]
    pub acceleration_z: Option<Number>,
    #[serde(rename = "movementCount", skip_serializing_if = "Option::is_none")]
    pub movement_count: Option<Number>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<Number>,
}

/// Build the broker representation of a measurement.
pub fn to_broker_message(m: &Measurement) -> Result<BrokerMessage, MalformedMeasurement> {
    let common = convert_common(m)?;

    let mut message = BrokerMessage {
        kind: m.kind.as_str(),
        address: m.device.address.clone(),
        humidity: common.humidity,
        temperature: common.temperature,
        voltage: common.voltage,
        pressure: None,
        acceleration_x: None,
        acceleration_y: None,
        acceleration_z: None,
        movement_count: None,
        level: None,
    };

    match m.kind {
        DeviceKind::Ruuvi => {
            message.pressure = Some(require(m, "pressure")?.clone());
            message.acceleration_x = Some(require(m, "accelerationX")?.clone());
            message.acceleration_y = Some(require(m, "accelerationY")?.clone());
            message.acceleration_z = Some(require(m, "accelerationZ")?.clone());
            message.movement_count = Some(require(m, "movementCount")?.clone());
        }
        DeviceKind::Mijia => {
            message.level = Some(require(m, "level")?.clone());
        }
        DeviceKind::Unknown => return Err(MalformedMeasurement::UnknownKind),
    }

    Ok(message)
}

/// Build the time-series representation of a measurement.
///
/// `at` is the capture wall-clock time; the input stream itself carries
/// no timestamps.
pub fn to_point(m: &Measurement, at: SystemTime) -> Result<SensorPoint, MalformedMeasurement> {
    let common = convert_common(m)?;

    let mut fields = vec![
        ("humidity", FieldValue::Float(common.humidity)),
        ("temperature", FieldValue::Float(common.temperature)),
        ("voltage", FieldValue::Float(common.voltage)),
    ];

    match m.kind {
        DeviceKind::Ruuvi => {
            for name in [
                "pressure",
                "accelerationX",
                "accelerationY",
                "accelerationZ",
                "movementCount",
            ] {
                fields.push((name, passthrough(m, name)?));
            }
        }
        DeviceKind::Mijia => {
            fields.push(("level", passthrough(m, "level")?));
        }
        DeviceKind::Unknown => return Err(MalformedMeasurement::UnknownKind),
    }

    let timestamp_ns = at
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    Ok(SensorPoint {
        address: m.device.address.clone(),
        kind: m.kind.as_str(),
        fields,
        timestamp_ns,
    })
}

/// Fields both kinds share, already converted.
struct CommonFields {
    humidity: f64,
    temperature: f64,
    voltage: f64,
}

fn convert_common(m: &Measurement) -> Result<CommonFields, MalformedMeasurement> {
    let voltage = match m.kind {
        // Ruuvi reports millivolts.
        DeviceKind::Ruuvi => round_to(require_f64(m, "voltage")? / 1000.0, 2),
        DeviceKind::Mijia => round_to(require_f64(m, "voltage")?, 2),
        DeviceKind::Unknown => return Err(MalformedMeasurement::UnknownKind),
    };

    Ok(CommonFields {
        humidity: round_to(require_f64(m, "humidity")?, 1),
        temperature: round_to(require_f64(m, "temperature")?, 1),
        voltage,
    })
}

fn require<'a>(m: &'a Measurement, name: &'static str) -> Result<&'a Number, MalformedMeasurement> {
    m.sensors
        .get(name)
        .ok_or(MalformedMeasurement::MissingField(name))
}

fn require_f64(m: &Measurement, name: &'static str) -> Result<f64, MalformedMeasurement> {
    require(m, name)?
        .as_f64()
        .ok_or(MalformedMeasurement::NonNumeric(name))
}

fn passthrough(m: &Measurement, name: &'static str) -> Result<FieldValue, MalformedMeasurement> {
    FieldValue::from_number(require(m, name)?).ok_or(MalformedMeasurement::NonNumeric(name))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
