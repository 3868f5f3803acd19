// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Unix-socket ingestion server: the accept/read/fan-out loop.
//!
//! One client is served at a time, sequentially; a new scanner connection
//! is accepted only after the previous one disconnects. Records are
//! newline-delimited JSON: raw stream reads give no guarantee of one
//! object per read, so framing is explicit rather than inherited from
//! write boundaries.
//!
//! Per record: decode, consult the rate limiter, transform, publish to
//! both sinks sequentially. Every recoverable failure is logged and the
//! loop keeps going; only listener-level failures escape.

use crate::limiter::RateLimiter;
use crate::measurement::{MalformedMeasurement, Measurement};
use crate::sink::MeasurementSink;
use crate::transform;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Longest accepted input line. Scanner records are a few hundred bytes;
/// anything past this is discarded while reading, never fully buffered.
const MAX_LINE_BYTES: usize = 64 * 1024;

/// Fatal server failures. Everything else is handled in the loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

/// Requests shutdown of a running [`IngestionServer`].
///
/// Cloneable so the signal watcher can own one while `main` keeps the
/// server itself.
#[derive(Clone)]
pub struct ShutdownHandle {
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    /// Ask the server to stop. Safe to call before or during `run`.
    pub fn shutdown(&self) {
        self.notify.notify_one();
    }
}

/// How a served connection ended.
enum ConnectionEnd {
    PeerClosed,
    Shutdown,
}

/// The ingestion daemon core.
///
/// Owns the listening socket, the per-device rate limiter, and the sink
/// pair behind the [`MeasurementSink`] seam.
pub struct IngestionServer<S: MeasurementSink> {
    socket_path: PathBuf,
    limiter: RateLimiter,
    sink: S,
    shutdown: Arc<Notify>,
    started: Instant,
    round: u64,
    accepted: u64,
    malformed: u64,
}

impl<S: MeasurementSink> IngestionServer<S> {
    /// Create a server bound to nothing yet; `run` binds the socket.
    pub fn new(socket_path: PathBuf, min_interval: Duration, sink: S) -> Self {
        Self {
            socket_path,
            limiter: RateLimiter::new(min_interval),
            sink,
            shutdown: Arc::new(Notify::new()),
            started: Instant::now(),
            round: 0,
            accepted: 0,
            malformed: 0,
        }
    }

    /// Handle for requesting shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            notify: self.shutdown.clone(),
        }
    }

    /// Bind the socket and serve until shutdown is requested.
    ///
    /// On return the socket file has been removed; a bind failure is the
    /// only startup error surfaced to the caller.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        // A previous unclean exit leaves a stale socket file behind.
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        restrict_permissions(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "listening for measurements");

        let mut backoff = AcceptBackoff::new();
        loop {
            let stream = tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        backoff.succeeded();
                        stream
                    }
                    Err(e) => match backoff.failed() {
                        Some(delay) => {
                            error!("accept failed: {e}");
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => {
                            error!("listener unusable, giving up: {e}");
                            let _ = std::fs::remove_file(&self.socket_path);
                            return Err(ServerError::Io(e));
                        }
                    },
                },
                _ = self.shutdown.notified() => break,
            };

            info!("scanner connected");
            match self.serve_connection(stream).await {
                ConnectionEnd::PeerClosed => info!("scanner disconnected"),
                ConnectionEnd::Shutdown => break,
            }
        }

        drop(listener);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            warn!("could not remove socket file: {e}");
        }
        info!(
            rounds = self.round,
            accepted = self.accepted,
            rejected = self.limiter.rejected(),
            malformed = self.malformed,
            "ingestion stopped"
        );
        Ok(())
    }

    /// Read newline-framed records from one connection until the peer
    /// closes or shutdown is requested.
    async fn serve_connection(&mut self, stream: UnixStream) -> ConnectionEnd {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(1024);

        loop {
            let read = tokio::select! {
                result = read_record_line(&mut reader, &mut buf) => result,
                _ = self.shutdown.notified() => return ConnectionEnd::Shutdown,
            };

            match read {
                Ok(LineRead::Eof) => return ConnectionEnd::PeerClosed,
                Ok(LineRead::Line) => {
                    if !buf.iter().all(u8::is_ascii_whitespace) {
                        self.process_record(&buf).await;
                    }
                }
                Ok(LineRead::Overlong) => {
                    self.round += 1;
                    self.malformed += 1;
                    warn!(
                        round = self.round,
                        "record skipped: {}",
                        MalformedMeasurement::OverlongLine
                    );
                }
                Err(e) => {
                    // Not a clean close; give up on this connection only.
                    warn!("read failed: {e}");
                    return ConnectionEnd::PeerClosed;
                }
            }
        }
    }

    /// Drive one record through rate limiting, transformation, and both
    /// sinks. Never fails: malformed input and sink errors are logged.
    async fn process_record(&mut self, raw: &[u8]) {
        self.round += 1;
        let round = self.round;

        let record = match std::str::from_utf8(raw) {
            Ok(text) => text.trim(),
            Err(e) => {
                self.malformed += 1;
                warn!(round, "record skipped: {}", MalformedMeasurement::Utf8(e));
                return;
            }
        };

        let measurement = match Measurement::from_json_line(record) {
            Ok(m) => m,
            Err(e) => {
                self.malformed += 1;
                warn!(round, "record skipped: {e}");
                return;
            }
        };

        let now = self.started.elapsed();
        if !self.limiter.should_accept(measurement.address(), now) {
            debug!(round, address = measurement.address(), "rate limited");
            return;
        }

        let message = match transform::to_broker_message(&measurement) {
            Ok(message) => message,
            Err(e) => {
                self.malformed += 1;
                warn!(round, "record skipped: {e}");
                return;
            }
        };
        let point = match transform::to_point(&measurement, SystemTime::now()) {
            Ok(point) => point,
            Err(e) => {
                self.malformed += 1;
                warn!(round, "record skipped: {e}");
                return;
            }
        };

        self.limiter.record_accepted(measurement.address(), now);
        self.accepted += 1;

        // Sequential, independently fallible fan-out.
        match self.sink.publish_broker(&message).await {
            Ok(()) => debug!(round, address = %message.address, "MQTT publish ok"),
            Err(e) => warn!(round, address = %message.address, "MQTT publish failed: {e}"),
        }
        match self.sink.write_point(&point).await {
            Ok(()) => debug!(round, address = %point.address, "influx write ok"),
            Err(e) => warn!(round, address = %point.address, "influx write failed: {e}"),
        }
    }
}

/// Outcome of one framed read.
enum LineRead {
    /// `buf` holds one line, newline included unless the stream ended
    /// mid-line.
    Line,
    /// The line ran past [`MAX_LINE_BYTES`]; its bytes were discarded up
    /// to and including the next newline.
    Overlong,
    Eof,
}

/// Read one newline-terminated line into `buf`, holding at most
/// `MAX_LINE_BYTES + 1` bytes of it in memory at a time.
///
/// A line that hits the cap before its newline is reported as
/// [`LineRead::Overlong`] and the remainder of the line is drained in
/// capped chunks, so the stream is framed again at the next newline and
/// a hostile or broken writer cannot grow the buffer without bound.
async fn read_record_line(
    reader: &mut BufReader<UnixStream>,
    buf: &mut Vec<u8>,
) -> std::io::Result<LineRead> {
    let limit = MAX_LINE_BYTES as u64 + 1;

    buf.clear();
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n == 0 {
        return Ok(LineRead::Eof);
    }
    if buf.last() == Some(&b'\n') || (n as u64) < limit {
        // Complete line, or the peer closed mid-line; either way the
        // content fits the cap.
        return Ok(LineRead::Line);
    }

    // Cap hit with no newline in sight: drain the rest of the line.
    loop {
        buf.clear();
        let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            buf.clear();
            return Ok(LineRead::Overlong);
        }
    }
}

/// Retry policy for `accept` failures.
///
/// A transient error gets a short pause before the next attempt; once
/// failures are consecutive enough the listener is treated as unusable
/// and the server shuts down with the error.
struct AcceptBackoff {
    consecutive: u32,
}

impl AcceptBackoff {
    const MAX_CONSECUTIVE: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_millis(100);

    fn new() -> Self {
        Self { consecutive: 0 }
    }

    fn succeeded(&mut self) {
        self.consecutive = 0;
    }

    /// The pause before retrying, or `None` once the failure streak
    /// marks the listener as dead.
    fn failed(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        (self.consecutive < Self::MAX_CONSECUTIVE).then_some(Self::RETRY_DELAY)
    }
}

/// Owner/group access only on the socket file.
fn restrict_permissions(path: &std::path::Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_backoff_retries_then_gives_up() {
        let mut backoff = AcceptBackoff::new();
        for _ in 0..AcceptBackoff::MAX_CONSECUTIVE - 1 {
            assert_eq!(backoff.failed(), Some(AcceptBackoff::RETRY_DELAY));
        }
        assert_eq!(backoff.failed(), None);
    }

    #[test]
    fn test_accept_backoff_resets_on_success() {
        let mut backoff = AcceptBackoff::new();
        for _ in 0..AcceptBackoff::MAX_CONSECUTIVE - 1 {
            assert!(backoff.failed().is_some());
        }
        backoff.succeeded();
        // A fresh streak gets the full retry allowance again.
        for _ in 0..AcceptBackoff::MAX_CONSECUTIVE - 1 {
            assert!(backoff.failed().is_some());
        }
        assert!(backoff.failed().is_none());
    }
}
