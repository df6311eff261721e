pub mod discord;
pub mod sink;
pub mod telegram;

pub use discord::DiscordSink;
pub use telegram::TelegramSink;

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ALERT_QUEUE_DEPTH, DEDUP_WINDOW_SECS, DISPATCH_DRAIN_DEADLINE_SECS};
use crate::types::{Alert, Confidence, SignalKind};

type DedupKey = (String, BTreeSet<SignalKind>);

/// Bounded FIFO in front of the webhook sinks, with global leaky-bucket
/// pacing and per-market de-duplication. Owns every alert from enqueue to
/// send-or-drop; the sink workers take over delivery and retries.
pub struct Dispatcher {
    alert_rx: mpsc::Receiver<Alert>,
    discord_tx: mpsc::Sender<Alert>,
    telegram_tx: mpsc::Sender<Alert>,
    queue: VecDeque<Alert>,
    /// (asset_id, signal-kind-set) → last send, for the 30 s suppression.
    recently_sent: HashMap<DedupKey, Instant>,
    period: Duration,
    overflow_drops: u64,
    dedup_suppressed: u64,
    sent: u64,
}

impl Dispatcher {
    pub fn new(
        alert_rate_per_sec: f64,
        alert_rx: mpsc::Receiver<Alert>,
        discord_tx: mpsc::Sender<Alert>,
        telegram_tx: mpsc::Sender<Alert>,
    ) -> Self {
        let rate = if alert_rate_per_sec > 0.0 { alert_rate_per_sec } else { 1.0 };
        Self {
            alert_rx,
            discord_tx,
            telegram_tx,
            queue: VecDeque::new(),
            recently_sent: HashMap::new(),
            period: Duration::from_secs_f64(1.0 / rate),
            overflow_drops: 0,
            dedup_suppressed: 0,
            sent: 0,
        }
    }

    pub async fn run(mut self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe = self.alert_rx.recv() => match maybe {
                    Some(alert) => self.enqueue(alert),
                    None => break,
                },
                _ = ticker.tick(), if !self.queue.is_empty() => {
                    self.dispatch_next();
                }
            }
        }

        // Inbound side is gone: drain what is queued, still paced, up to the
        // shutdown deadline.
        if !self.queue.is_empty() {
            info!(queued = self.queue.len(), "[DISPATCH] draining queue before shutdown");
            let deadline = Instant::now() + Duration::from_secs(DISPATCH_DRAIN_DEADLINE_SECS);
            while !self.queue.is_empty() {
                if Instant::now() >= deadline {
                    warn!(abandoned = self.queue.len(), "[DISPATCH] drain deadline hit");
                    break;
                }
                ticker.tick().await;
                self.dispatch_next();
            }
        }
        info!(
            sent = self.sent,
            overflow_drops = self.overflow_drops,
            suppressed = self.dedup_suppressed,
            "[DISPATCH] stopping"
        );
    }

    /// Depth-bounded enqueue. On overflow the oldest MEDIUM alert yields its
    /// slot; if the queue is all HIGH, the incoming alert is the one dropped.
    fn enqueue(&mut self, alert: Alert) {
        if self.queue.len() >= ALERT_QUEUE_DEPTH {
            self.overflow_drops += 1;
            match self
                .queue
                .iter()
                .position(|a| a.confidence == Confidence::Medium)
            {
                Some(pos) => {
                    self.queue.remove(pos);
                    self.queue.push_back(alert);
                    warn!(
                        drops = self.overflow_drops,
                        "[DISPATCH] queue full, dropped oldest MEDIUM alert"
                    );
                }
                None => {
                    warn!(
                        drops = self.overflow_drops,
                        "[DISPATCH] queue full of HIGH alerts, dropped incoming"
                    );
                }
            }
            return;
        }
        self.queue.push_back(alert);
    }

    /// Pop queued alerts until one passes dedup, then hand it to both sinks.
    /// Suppressed alerts cost nothing against the pacing budget.
    fn dispatch_next(&mut self) {
        while let Some(alert) = self.queue.pop_front() {
            let key = dedup_key(&alert);
            let now = Instant::now();
            if let Some(last) = self.recently_sent.get(&key) {
                if now.duration_since(*last) < Duration::from_secs(DEDUP_WINDOW_SECS) {
                    self.dedup_suppressed += 1;
                    debug!(asset_id = %alert.trade.asset_id, "[DISPATCH] duplicate suppressed");
                    continue;
                }
            }
            self.prune_dedup(now);
            self.recently_sent.insert(key, now);
            self.sent += 1;

            if let Err(e) = self.discord_tx.try_send(alert.clone()) {
                warn!("discord queue full, dropping alert for that sink: {e}");
            }
            if let Err(e) = self.telegram_tx.try_send(alert) {
                warn!("telegram queue full, dropping alert for that sink: {e}");
            }
            return;
        }
    }

    fn prune_dedup(&mut self, now: Instant) {
        if self.recently_sent.len() > 256 {
            let window = Duration::from_secs(DEDUP_WINDOW_SECS);
            self.recently_sent.retain(|_, t| now.duration_since(*t) < window);
        }
    }
}

fn dedup_key(alert: &Alert) -> DedupKey {
    let kinds: BTreeSet<SignalKind> = alert.signals.iter().map(|s| s.kind()).collect();
    (alert.trade.asset_id.clone(), kinds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, Side, Signal, Trade};

    fn alert(asset: &str, confidence: Confidence, signals: Vec<Signal>) -> Alert {
        Alert {
            trade: Trade {
                asset_id: asset.to_string(),
                side: Side::Buy,
                outcome: Outcome::Yes,
                price: 0.5,
                size: 10_000.0,
                wallet: "0xa".to_string(),
                timestamp_ms: 0,
                trade_id: "t".to_string(),
            },
            signals,
            confidence,
            market_title: "Test".to_string(),
            end_time_ms: None,
            midpoint: None,
            wallet_tx_count: None,
        }
    }

    fn whale() -> Vec<Signal> {
        vec![Signal::Whale { multiplier: None }]
    }

    fn dispatcher() -> (Dispatcher, mpsc::Receiver<Alert>, mpsc::Receiver<Alert>) {
        let (_alert_tx, alert_rx) = mpsc::channel(8);
        let (discord_tx, discord_rx) = mpsc::channel(512);
        let (telegram_tx, telegram_rx) = mpsc::channel(512);
        (
            Dispatcher::new(1.0, alert_rx, discord_tx, telegram_tx),
            discord_rx,
            telegram_rx,
        )
    }

    #[tokio::test]
    async fn overflow_drops_oldest_medium_first() {
        let (mut d, _discord, _telegram) = dispatcher();

        d.enqueue(alert("m-high", Confidence::High, whale()));
        d.enqueue(alert("m-medium-old", Confidence::Medium, whale()));
        for i in 2..ALERT_QUEUE_DEPTH {
            d.enqueue(alert(&format!("m{i}"), Confidence::High, whale()));
        }
        assert_eq!(d.queue.len(), ALERT_QUEUE_DEPTH);

        d.enqueue(alert("m-incoming", Confidence::High, whale()));
        assert_eq!(d.queue.len(), ALERT_QUEUE_DEPTH);
        assert_eq!(d.overflow_drops, 1);
        assert!(
            !d.queue.iter().any(|a| a.trade.asset_id == "m-medium-old"),
            "the oldest MEDIUM alert yields its slot"
        );
        assert!(d.queue.iter().any(|a| a.trade.asset_id == "m-incoming"));
    }

    #[tokio::test]
    async fn overflow_drops_incoming_when_all_high() {
        let (mut d, _discord, _telegram) = dispatcher();

        for i in 0..ALERT_QUEUE_DEPTH {
            d.enqueue(alert(&format!("m{i}"), Confidence::High, whale()));
        }
        d.enqueue(alert("m-incoming", Confidence::High, whale()));

        assert_eq!(d.queue.len(), ALERT_QUEUE_DEPTH);
        assert_eq!(d.overflow_drops, 1);
        assert!(!d.queue.iter().any(|a| a.trade.asset_id == "m-incoming"));
    }

    #[tokio::test]
    async fn dispatch_fans_out_to_both_sinks() {
        let (mut d, mut discord, mut telegram) = dispatcher();
        d.enqueue(alert("m1", Confidence::High, whale()));
        d.dispatch_next();

        assert_eq!(discord.try_recv().unwrap().trade.asset_id, "m1");
        assert_eq!(telegram.try_recv().unwrap().trade.asset_id, "m1");
    }

    #[tokio::test]
    async fn duplicate_kind_set_is_suppressed_within_window() {
        let (mut d, mut discord, _telegram) = dispatcher();

        d.enqueue(alert("m1", Confidence::Medium, vec![Signal::Cluster { wallets: 3 }]));
        d.dispatch_next();
        assert!(discord.try_recv().is_ok());

        // Same market, same kind set — suppressed, nothing sent.
        d.enqueue(alert("m1", Confidence::Medium, vec![Signal::Cluster { wallets: 4 }]));
        d.dispatch_next();
        assert!(discord.try_recv().is_err());
        assert_eq!(d.dedup_suppressed, 1);

        // Different kind set on the same market passes.
        d.enqueue(alert("m1", Confidence::Medium, whale()));
        d.dispatch_next();
        assert!(discord.try_recv().is_ok());

        // Different market with the same kind set passes.
        d.enqueue(alert("m2", Confidence::Medium, vec![Signal::Cluster { wallets: 3 }]));
        d.dispatch_next();
        assert!(discord.try_recv().is_ok());
    }

    #[tokio::test]
    async fn suppressed_alert_does_not_consume_the_tick() {
        let (mut d, mut discord, _telegram) = dispatcher();

        d.enqueue(alert("m1", Confidence::Medium, whale()));
        d.dispatch_next();
        discord.try_recv().unwrap();

        // A duplicate sits in front of a fresh alert: one call sends the
        // fresh one.
        d.enqueue(alert("m1", Confidence::Medium, whale()));
        d.enqueue(alert("m2", Confidence::Medium, whale()));
        d.dispatch_next();
        assert_eq!(discord.try_recv().unwrap().trade.asset_id, "m2");
        assert_eq!(d.dedup_suppressed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pacing_bounds_send_rate() {
        let (alert_tx, alert_rx) = mpsc::channel(512);
        let (discord_tx, mut discord_rx) = mpsc::channel(512);
        let (telegram_tx, _telegram_rx) = mpsc::channel(512);
        let d = Dispatcher::new(1.0, alert_rx, discord_tx, telegram_tx);
        let handle = tokio::spawn(d.run());

        // Ten distinct markets burst in at once.
        for i in 0..10 {
            alert_tx
                .send(alert(&format!("m{i}"), Confidence::High, whale()))
                .await
                .unwrap();
        }

        // Let ~3 pacing periods elapse.
        for _ in 0..30 {
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        let mut delivered = 0;
        while discord_rx.try_recv().is_ok() {
            delivered += 1;
        }
        assert!(delivered >= 1, "burst must start draining");
        assert!(delivered <= 4, "at most ~1/s may be delivered, got {delivered}");

        drop(alert_tx);
        handle.await.unwrap();
    }
}
