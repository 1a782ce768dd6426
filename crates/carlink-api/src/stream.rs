//! Push-stream subscription with auto-reconnect.
//!
//! Maintains one persistent WebSocket subscription per account to the
//! vendor's streaming endpoint and forwards decoded telemetry frames
//! through an [`tokio::sync::mpsc`] channel. Reconnects with bounded
//! exponential backoff; missed messages are not replayed -- the next
//! poll cycle reconciles any gap.
//!
//! Credentials arrive through a `watch` channel so that every
//! (re)connection attempt uses the latest rotated token without the
//! stream task having to know about the refresh lifecycle.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::rest::TelemetryReading;

// ── Channel capacity ─────────────────────────────────────────────────

const FRAME_CHANNEL_CAPACITY: usize = 1024;

// ── Frame types ──────────────────────────────────────────────────────

/// A decoded push-stream message: one vehicle, one or more readings.
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub vin: String,
    pub readings: Vec<TelemetryReading>,
}

#[derive(Debug, Deserialize)]
struct FrameWire {
    vin: String,
    #[serde(default)]
    data: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    value: Value,
    #[serde(default)]
    unit: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Credentials for the streaming endpoint.
///
/// The account id is the subscription username; the token is the
/// identity token from the current [`TokenSet`](crate::auth::TokenSet).
#[derive(Debug, Clone)]
pub struct StreamCredentials {
    pub account_id: String,
    pub token: String,
}

// ── ReconnectConfig ──────────────────────────────────────────────────

/// Exponential backoff configuration for stream reconnection.
///
/// Delays are strictly non-decreasing up to `max_delay` and never
/// exceed it; the sequence resets after a successful connection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 5s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 300s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

/// `delay = min(initial * 2^attempt, max)` -- no jitter, single client
/// per account.
fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let base = config
        .initial_delay
        .saturating_mul(2u32.saturating_pow(attempt));
    base.min(config.max_delay)
}

// ── StreamHandle ─────────────────────────────────────────────────────

/// Handle to a running push-stream subscription.
pub struct StreamHandle {
    frame_rx: mpsc::Receiver<TelemetryFrame>,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Spawn the subscription loop and return immediately.
    ///
    /// The first connection attempt happens asynchronously once the
    /// credentials watch carries a value. `credentials` updates trigger
    /// a reconnect so rotated tokens take effect promptly.
    pub fn connect(
        stream_url: Url,
        credentials: watch::Receiver<Option<StreamCredentials>>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            stream_loop(stream_url, credentials, frame_tx, reconnect, task_cancel).await;
        });

        Self { frame_rx, cancel }
    }

    /// Take the receiving end of the frame channel.
    pub fn frames(&mut self) -> &mut mpsc::Receiver<TelemetryFrame> {
        &mut self.frame_rx
    }

    /// Consume the handle, returning the frame receiver. The background
    /// task keeps running until `shutdown` or the token is cancelled.
    pub fn into_frames(self) -> mpsc::Receiver<TelemetryFrame> {
        self.frame_rx
    }

    /// Signal the background task to shut down gracefully.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

// ── Background reconnection loop ─────────────────────────────────────

/// Main loop: wait for credentials → connect → read → on error,
/// backoff → reconnect.
async fn stream_loop(
    stream_url: Url,
    mut credentials: watch::Receiver<Option<StreamCredentials>>,
    frame_tx: mpsc::Sender<TelemetryFrame>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;

    loop {
        // Wait until credentials are available (may block before the
        // first device authorization completes).
        let creds = loop {
            if let Some(creds) = credentials.borrow_and_update().clone() {
                break creds;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = credentials.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            // Token rotation: drop the current connection and redial
            // with the fresh credentials.
            changed = credentials.changed() => {
                if changed.is_err() {
                    break;
                }
                tracing::info!("stream credentials rotated, reconnecting");
                attempt = 0;
            }
            result = connect_and_read(&stream_url, &creds, &frame_tx, &cancel) => {
                match result {
                    // Clean disconnect: reset backoff, reconnect immediately.
                    Ok(()) => {
                        tracing::info!("stream disconnected cleanly, reconnecting");
                        attempt = 0;
                    }
                    Err(e) => {
                        let delay = backoff_delay(attempt, &reconnect);
                        tracing::warn!(
                            error = %e,
                            attempt,
                            delay_secs = delay.as_secs(),
                            "stream error, waiting before reconnect"
                        );

                        tokio::select! {
                            biased;
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }

                        attempt = attempt.saturating_add(1);
                    }
                }
            }
        }
    }

    tracing::debug!("stream loop exiting");
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Establish one subscription, read frames until the connection drops.
async fn connect_and_read(
    url: &Url,
    creds: &StreamCredentials,
    frame_tx: &mpsc::Sender<TelemetryFrame>,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    tracing::info!(url = %url, account = %creds.account_id, "connecting to push stream");

    let uri: tungstenite::http::Uri = url
        .as_str()
        .parse()
        .map_err(|e: tungstenite::http::uri::InvalidUri| Error::StreamConnect(e.to_string()))?;

    let request = ClientRequestBuilder::new(uri)
        .with_header("Authorization", format!("Bearer {}", creds.token))
        .with_header("X-Account-Id", creds.account_id.clone());

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| Error::StreamConnect(e.to_string()))?;

    tracing::info!("push stream connected");

    let (_write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            frame = read.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(decoded) = parse_frame(&text) {
                            // A full channel means the merger is hopelessly
                            // behind; dropping is safe -- the next poll
                            // reconciles.
                            if let Err(e) = frame_tx.try_send(decoded) {
                                tracing::warn!(error = %e, "frame channel full, dropping message");
                            }
                        }
                    }
                    Some(Ok(tungstenite::Message::Ping(_))) => {
                        // tungstenite answers pings automatically
                        tracing::trace!("stream ping");
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        if let Some(ref cf) = frame {
                            tracing::info!(code = %cf.code, reason = %cf.reason, "stream close frame");
                        } else {
                            tracing::info!("stream close frame (no payload)");
                        }
                        return Ok(());
                    }
                    Some(Err(e)) => {
                        return Err(Error::StreamConnect(e.to_string()));
                    }
                    None => {
                        tracing::info!("stream ended");
                        return Ok(());
                    }
                    _ => {
                        // Binary, Pong, Frame -- ignore
                    }
                }
            }
        }
    }
}

// ── Frame parsing ────────────────────────────────────────────────────

/// Parse a stream text frame into a [`TelemetryFrame`].
///
/// Message shape: `{"vin": ..., "data": {key: {value, unit, timestamp}}}`.
/// A malformed frame is logged and dropped; entries with a null value
/// or a non-object payload are skipped individually.
fn parse_frame(text: &str) -> Option<TelemetryFrame> {
    let wire: FrameWire = match serde_json::from_str(text) {
        Ok(wire) => wire,
        Err(e) => {
            tracing::debug!(error = %e, "failed to parse stream frame");
            return None;
        }
    };

    let mut readings = Vec::with_capacity(wire.data.len());
    for (key, raw) in wire.data {
        let entry: FrameEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if entry.value.is_null() {
            continue;
        }
        readings.push(TelemetryReading {
            key,
            value: entry.value,
            unit: entry.unit,
            timestamp: entry.timestamp,
        });
    }

    Some(TelemetryFrame {
        vin: wire.vin,
        readings,
    })
}

// ── Tests ────────────────────────────────────────────────────────────
