// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! bluesink daemon entry point.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default config file location
//! bluesink
//!
//! # Explicit config and verbose logging
//! bluesink --config /etc/bluesink.toml --log-level debug
//! ```
//!
//! Intended to run under systemd; SIGTERM and SIGINT both trigger the
//! graceful shutdown sequence (MQTT disconnect, socket file removal).

use anyhow::{Context, Result};
use bluesink::config::Config;
use bluesink::server::IngestionServer;
use bluesink::sink::{connect_mqtt, SinkPublisher};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Bridge bluewalker BLE sensor measurements to MQTT and InfluxDB
#[derive(Parser, Debug)]
#[command(name = "bluesink")]
#[command(about = "Bridge bluewalker BLE sensor measurements to MQTT and InfluxDB")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "bluesink.toml")]
    config: PathBuf,

    /// Log level override (trace, debug, info, warn, error, off)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.global.verbosity);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("off"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("bluesink v{}", env!("CARGO_PKG_VERSION"));

    let (mqtt, mqtt_driver) = connect_mqtt(&config.mqtt.broker, "bluesink");
    let sink = SinkPublisher::new(mqtt.clone(), config.mqtt.topic.clone(), &config.influx);

    let mut server = IngestionServer::new(
        config.global.socket_path.clone(),
        config.min_interval(),
        sink,
    );

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("termination signal received, shutting down");
        handle.shutdown();
    });

    server.run().await.context("ingestion server failed")?;

    // The server removed its socket file when the loop exited; finish the
    // shutdown sequence by dropping the broker session.
    let _ = mqtt.disconnect().await;
    mqtt_driver.abort();

    info!("terminated gracefully");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM, whichever arrives first.
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(_) => {
            tokio::signal::ctrl_c().await.ok();
        }
    }
}
