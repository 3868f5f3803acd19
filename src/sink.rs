// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Delivery to the MQTT broker and the InfluxDB write endpoint.
//!
//! The two sinks are independent: a failure in one never prevents or
//! affects the other. Both are fire-and-forget per record; failed writes
//! are logged by the caller and dropped (no retry queue).

use crate::config::InfluxConfig;
use crate::influx::SensorPoint;
use crate::transform::BrokerMessage;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// MQTT publish failures.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("MQTT publish failed: {0}")]
    Publish(String),

    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// InfluxDB write failures.
#[derive(Debug, Error)]
pub enum InfluxError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("write rejected with status {status}: {body}")]
    Status { status: u16, body: String },
}

/// Seam between the ingestion loop and the concrete sinks.
///
/// The server only needs these two operations, so tests drive it with a
/// recording implementation instead of live brokers.
#[async_trait]
pub trait MeasurementSink: Send + Sync {
    /// Publish one message to `<base_topic>/<address>`.
    async fn publish_broker(&self, message: &BrokerMessage) -> Result<(), BrokerError>;

    /// Write one point to the time-series database.
    async fn write_point(&self, point: &SensorPoint) -> Result<(), InfluxError>;
}

/// Production sink pair: one persistent MQTT session and one HTTP client
/// against the InfluxDB v2 write API.
pub struct SinkPublisher {
    mqtt: AsyncClient,
    base_topic: String,
    http: reqwest::Client,
    write_url: String,
    org: String,
    bucket: String,
    token: String,
}

impl SinkPublisher {
    /// Create the sink pair from an established MQTT client and the
    /// Influx connection settings.
    pub fn new(mqtt: AsyncClient, base_topic: String, influx: &InfluxConfig) -> Self {
        let write_url = format!("{}/api/v2/write", influx.url.trim_end_matches('/'));
        Self {
            mqtt,
            base_topic,
            http: reqwest::Client::new(),
            write_url,
            org: influx.org.clone(),
            bucket: influx.bucket.clone(),
            token: influx.token.clone(),
        }
    }
}

#[async_trait]
impl MeasurementSink for SinkPublisher {
    async fn publish_broker(&self, message: &BrokerMessage) -> Result<(), BrokerError> {
        let topic = device_topic(&self.base_topic, &message.address);
        let payload = serde_json::to_vec(message)?;
        debug!(topic = %topic, "MQTT out");

        self.mqtt
            .publish(topic, QoS::AtMostOnce, false, payload)
            .await
            .map_err(|e| BrokerError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn write_point(&self, point: &SensorPoint) -> Result<(), InfluxError> {
        let line = point.to_line_protocol();
        debug!(line = %line, "influx out");

        let response = self
            .http
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(|e| InfluxError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InfluxError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

/// Establish the persistent MQTT session and spawn its event-loop driver.
///
/// The driver task keeps the session alive for the lifetime of the
/// process: rumqttc reconnects on the next poll after an error, so a lost
/// broker only degrades publishes until the session comes back.
pub fn connect_mqtt(broker: &str, client_id: &str) -> (AsyncClient, tokio::task::JoinHandle<()>) {
    let (host, port) = parse_broker(broker);
    let mut options = MqttOptions::new(client_id, host, port);
    options.set_keep_alive(Duration::from_secs(60));

    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let driver = tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!(code = ?ack.code, "connected to MQTT broker");
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    debug!("MQTT session closed by broker");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("MQTT connection error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    });

    (client, driver)
}

/// Per-device publish topic: the configured base topic with the device
/// address appended as one level.
fn device_topic(base_topic: &str, address: &str) -> String {
    format!("{base_topic}/{address}")
}

/// Split a `host` or `host:port` broker address, defaulting to 1883.
/// A `tcp://` scheme prefix is tolerated.
fn parse_broker(broker: &str) -> (String, u16) {
    let broker = broker.strip_prefix("tcp://").unwrap_or(broker);
    match broker.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (broker.to_string(), 1883),
        },
        None => (broker.to_string(), 1883),
    }
}
