// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bluesink: bluewalker measurement bridge
//!
//! Receives BLE sensor measurements (ruuvi and mijia records emitted by
//! the bluewalker scanner) over a local Unix stream socket, rate-limits
//! them per device, and fans each accepted record out to an MQTT broker
//! and an InfluxDB v2 bucket.
//!
//! ```text
//! scanner --unix socket--> IngestionServer --+--> MQTT  <topic>/<address>
//!            (JSON lines)    | RateLimiter   |
//!                            | transform     +--> InfluxDB "sensor" points
//! ```
//!
//! Sink failures are logged and dropped; only configuration and
//! listening-socket failures terminate the process.

pub mod config;
pub mod influx;
pub mod limiter;
pub mod measurement;
pub mod server;
pub mod sink;
pub mod transform;

pub use config::{Config, ConfigError};
pub use influx::{FieldValue, SensorPoint};
pub use limiter::RateLimiter;
pub use measurement::{DeviceKind, MalformedMeasurement, Measurement};
pub use server::{IngestionServer, ServerError, ShutdownHandle};
pub use sink::{BrokerError, InfluxError, MeasurementSink, SinkPublisher};
pub use transform::BrokerMessage;
