use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::config::{
    BACKOFF_BASE_SECS, BACKOFF_MAX_SECS, BACKOFF_RESET_AFTER_SECS, WS_IDLE_TIMEOUT_SECS,
    WS_SUBSCRIBE_CHUNK_SIZE, WS_SUBSCRIBE_GRACE_SECS,
};
use crate::types::Trade;
use crate::ws::messages::parse_frame;

/// How one connection session ended, as seen by the reconnect loop.
enum SessionEnd {
    /// Shutdown signal or all consumers gone — stop for good.
    Shutdown,
    /// Server close, transport error, or idle timeout — reconnect.
    /// `sustained` is true when the session streamed long enough to reset
    /// the backoff attempt counter.
    Reconnect { sustained: bool },
}

/// Maintains the persistent WebSocket subscription to the CLOB trade feed.
///
/// Lifecycle: connect → subscribe → stream, with exponential backoff between
/// sessions. The subscribe frames are built once at construction so every
/// reconnect sends byte-identical subscriptions.
pub struct StreamClient {
    ws_url: String,
    subscribe_frames: Vec<String>,
    asset_count: usize,
    trade_tx: broadcast::Sender<Trade>,
    shutdown_rx: watch::Receiver<bool>,
    /// Total WS frames received since process start (for flow diagnostics).
    frames_received: u64,
    /// Trades routed downstream.
    trades_routed: u64,
}

impl StreamClient {
    pub fn new(
        ws_url: String,
        asset_ids: &[String],
        trade_tx: broadcast::Sender<Trade>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            ws_url,
            subscribe_frames: build_subscribe_frames(asset_ids),
            asset_count: asset_ids.len(),
            trade_tx,
            shutdown_rx,
            frames_received: 0,
            trades_routed: 0,
        }
    }

    pub async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown_rx.borrow() {
                return;
            }

            info!("[WS] connecting to {} (attempt {})", self.ws_url, attempt + 1);
            match self.connect_once().await {
                SessionEnd::Shutdown => {
                    info!("[WS] shutting down");
                    return;
                }
                SessionEnd::Reconnect { sustained } => {
                    if sustained {
                        attempt = 0;
                    }
                }
            }

            let delay = backoff_delay(attempt);
            attempt = attempt.saturating_add(1);
            warn!("[WS] backing off {:.0}s before reconnect", delay.as_secs_f64());

            let mut shutdown = self.shutdown_rx.clone();
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// One connection session: handshake, subscribe, stream until something
    /// ends it. Never returns on a malformed frame — those are counted and
    /// skipped by the parser.
    async fn connect_once(&mut self) -> SessionEnd {
        let (ws_stream, _) = match connect_async(&self.ws_url).await {
            Ok(x) => x,
            Err(e) => {
                error!("[WS] connect failed: {e}");
                return SessionEnd::Reconnect { sustained: false };
            }
        };
        let (mut write, mut read) = ws_stream.split();

        let total_chunks = self.subscribe_frames.len();
        for (i, frame) in self.subscribe_frames.iter().enumerate() {
            if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                error!("[WS] subscribe send failed: {e}");
                return SessionEnd::Reconnect { sustained: false };
            }
            debug!("[WS] subscribe chunk {}/{}", i + 1, total_chunks);
        }
        info!(
            "[WS] subscribed to {} asset ids in {} chunk(s)",
            self.asset_count, total_chunks
        );

        // Streaming begins on the first inbound frame, or after the grace
        // period if the server never acks.
        let mut streaming_since: Option<Instant> = None;
        let grace = sleep(Duration::from_secs(WS_SUBSCRIBE_GRACE_SECS));
        tokio::pin!(grace);
        let idle = sleep(Duration::from_secs(WS_IDLE_TIMEOUT_SECS));
        tokio::pin!(idle);

        let mut shutdown = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                msg = read.next() => {
                    // Any non-empty frame counts as a heartbeat.
                    idle.as_mut().reset(Instant::now() + Duration::from_secs(WS_IDLE_TIMEOUT_SECS));
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if streaming_since.is_none() {
                                streaming_since = Some(Instant::now());
                                info!("[WS] streaming (first frame received)");
                            }
                            if !self.handle_frame(&text) {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                error!("[WS] pong failed: {e}");
                                return SessionEnd::Reconnect {
                                    sustained: sustained(streaming_since),
                                };
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            info!("[WS] connection closed by server");
                            return SessionEnd::Reconnect { sustained: sustained(streaming_since) };
                        }
                        Some(Err(e)) => {
                            error!("[WS] transport error: {e}");
                            return SessionEnd::Reconnect { sustained: sustained(streaming_since) };
                        }
                        Some(Ok(_)) => {}
                    }
                }

                _ = &mut grace, if streaming_since.is_none() => {
                    streaming_since = Some(Instant::now());
                    info!("[WS] streaming (no ack within {WS_SUBSCRIBE_GRACE_SECS}s grace)");
                }

                _ = &mut idle => {
                    warn!("[WS] no frames for {WS_IDLE_TIMEOUT_SECS}s, reconnecting");
                    return SessionEnd::Reconnect { sustained: sustained(streaming_since) };
                }

                _ = shutdown.changed() => {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Returns false when every downstream consumer is gone.
    fn handle_frame(&mut self, text: &str) -> bool {
        self.frames_received += 1;
        if self.frames_received % 500 == 0 {
            info!(
                frames = self.frames_received,
                trades = self.trades_routed,
                parse_failures = crate::ws::messages::parse_failure_count(),
                "[WS] flow: {} frames | {} trades routed",
                self.frames_received,
                self.trades_routed,
            );
        }

        for trade in parse_frame(text) {
            self.trades_routed += 1;
            // A lagging detector drops the oldest buffered trades and observes
            // the loss count; send only fails once all receivers are gone.
            if self.trade_tx.send(trade).is_err() {
                return false;
            }
        }
        true
    }
}

fn sustained(streaming_since: Option<Instant>) -> bool {
    streaming_since
        .map(|t| t.elapsed() >= Duration::from_secs(BACKOFF_RESET_AFTER_SECS))
        .unwrap_or(false)
}

/// min(base * 2^attempt, max) seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = BACKOFF_BASE_SECS
        .checked_shl(attempt)
        .unwrap_or(BACKOFF_MAX_SECS)
        .min(BACKOFF_MAX_SECS);
    Duration::from_secs(secs)
}

/// Build the subscription frames, chunked to respect server-side frame size
/// limits. Pure function of the asset-id list, so reconnects resubscribe with
/// identical bytes.
fn build_subscribe_frames(asset_ids: &[String]) -> Vec<String> {
    asset_ids
        .chunks(WS_SUBSCRIBE_CHUNK_SIZE)
        .map(|chunk| {
            serde_json::json!({
                "type": "subscribe",
                "assets_ids": chunk,
            })
            .to_string()
        })
        .collect()
}
