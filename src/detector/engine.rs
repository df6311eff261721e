use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::detector::signals::{self, SignalParams};
use crate::filter::TradeFilter;
use crate::state::{MarketStats, WalletCache};
use crate::types::{AlertCandidate, Outcome, Side, SignalKind, Trade, WalletUpdate};
use crate::wallet::WalletClient;

#[derive(Debug, Default)]
struct SignalCounters {
    whale: u64,
    fresh_wallet: u64,
    cluster: u64,
    timing: u64,
    odds_move: u64,
    contrarian: u64,
}

impl SignalCounters {
    fn record(&mut self, kind: SignalKind) {
        match kind {
            SignalKind::Whale => self.whale += 1,
            SignalKind::FreshWallet => self.fresh_wallet += 1,
            SignalKind::Cluster => self.cluster += 1,
            SignalKind::Timing => self.timing += 1,
            SignalKind::OddsMove => self.odds_move += 1,
            SignalKind::Contrarian => self.contrarian += 1,
        }
    }
}

/// The detection task: sole owner of every `MarketStats` and sole writer of
/// the wallet cache. Receives trades in arrival order, runs the filter chain
/// and the six signal predicates, and hands surviving candidates to the
/// enricher. Performs no I/O — wallet lookups are spawned off and their
/// results come back through `wallet_rx`.
pub struct DetectionEngine {
    catalog: Arc<Catalog>,
    wallet_cache: Arc<WalletCache>,
    wallet_client: Arc<WalletClient>,
    params: SignalParams,
    cluster_window_secs: u64,
    filter: TradeFilter,
    stats: HashMap<String, MarketStats>,
    trade_rx: broadcast::Receiver<Trade>,
    wallet_tx: mpsc::Sender<WalletUpdate>,
    wallet_rx: mpsc::Receiver<WalletUpdate>,
    candidate_tx: mpsc::Sender<AlertCandidate>,
    /// Wallets with a lookup already in flight.
    pending_lookups: HashSet<String>,
    trades_seen: u64,
    /// Oldest-pending trades lost to detector lag.
    trades_dropped: u64,
    candidates_emitted: u64,
    candidate_drops: u64,
    signal_counts: SignalCounters,
    last_diag_at: Instant,
}

impl DetectionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &Config,
        catalog: Arc<Catalog>,
        wallet_cache: Arc<WalletCache>,
        wallet_client: Arc<WalletClient>,
        trade_rx: broadcast::Receiver<Trade>,
        wallet_tx: mpsc::Sender<WalletUpdate>,
        wallet_rx: mpsc::Receiver<WalletUpdate>,
        candidate_tx: mpsc::Sender<AlertCandidate>,
    ) -> Self {
        Self {
            catalog,
            wallet_cache,
            wallet_client,
            params: SignalParams::from_config(cfg),
            cluster_window_secs: cfg.cluster_window_secs,
            filter: TradeFilter::new(cfg.min_usd_size, cfg.lp_detection_window_ms),
            stats: HashMap::new(),
            trade_rx,
            wallet_tx,
            wallet_rx,
            candidate_tx,
            pending_lookups: HashSet::new(),
            trades_seen: 0,
            trades_dropped: 0,
            candidates_emitted: 0,
            candidate_drops: 0,
            signal_counts: SignalCounters::default(),
            last_diag_at: Instant::now(),
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                res = self.trade_rx.recv() => match res {
                    Ok(trade) => {
                        self.handle_trade(trade);
                        self.maybe_log_diagnostics();
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        self.trades_dropped += n;
                        warn!("[DETECT] lagging, dropped {n} oldest pending trades");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(update) = self.wallet_rx.recv() => {
                    self.apply_wallet_update(update);
                }
            }
        }
        info!("[DETECT] trade stream closed, stopping");
    }

    /// Filter chain, then the six predicates against the pre-update stats,
    /// then the post-evaluation stats update. Synchronous throughout.
    fn handle_trade(&mut self, trade: Trade) {
        self.trades_seen += 1;

        let meta = self.catalog.get(&trade.asset_id);
        if self.filter.gate_catalog(meta.as_ref()).is_err() {
            return;
        }
        let Some(meta) = meta else { return };

        let usd = trade.usd_value();
        if self.filter.gate_size(usd).is_err() {
            return;
        }

        // Wallet activity comes from the cache only; a miss (or expired TTL)
        // schedules a background refresh and the signal sits out this trade.
        let tx_count = self.wallet_cache.fresh_tx_count(&trade.wallet);
        if tx_count.is_none() {
            self.schedule_wallet_fetch(trade.wallet.clone());
        }

        // Aggregates are per market: both outcome tokens of a market feed the
        // same windows, which is what LP pairing and cluster counting need.
        let stats = self.stats.entry(meta.market_id.clone()).or_default();
        if self.filter.gate_lp(&trade, stats).is_err() {
            debug!(
                wallet = %trade.wallet,
                asset_id = %trade.asset_id,
                "[FILTER] LP pair discarded"
            );
            return;
        }

        let mut signals = Vec::new();

        // Pre-update predicates: the trade is judged against the window as it
        // stood before this trade.
        if let Some(s) = signals::whale(&trade, stats, &self.params) {
            signals.push(s);
        }
        if let Some(s) = signals::odds_move(&trade, stats, &self.params) {
            signals.push(s);
        }
        if let Some(s) = signals::contrarian(&trade, stats, &self.params) {
            signals.push(s);
        }
        if let Some(s) = signals::timing(&trade, meta.end_time_ms, &self.params) {
            signals.push(s);
        }

        // The current BUY joins the buyer window before cluster evaluation.
        if trade.side == Side::Buy {
            stats.prune_buyers(trade.timestamp_ms, self.cluster_window_secs);
            stats.record_buyer(&trade.wallet, trade.outcome, trade.timestamp_ms);
        }
        if let Some(s) = signals::cluster(&trade, stats, &self.params) {
            signals.push(s);
        }

        if let Some(s) = signals::fresh_wallet(tx_count, &self.params) {
            signals.push(s);
        }

        // Post-evaluation update.
        stats.push_trade(usd);
        stats.last_price = Some(trade.price);
        stats.consensus_yes = Some(match trade.outcome {
            Outcome::Yes => trade.price,
            Outcome::No => 1.0 - trade.price,
        });

        if signals.is_empty() {
            return;
        }

        for s in &signals {
            self.signal_counts.record(s.kind());
        }
        let confidence = signals::confidence(&signals, usd);
        let kinds: Vec<String> = signals.iter().map(|s| s.kind().to_string()).collect();
        info!(
            asset_id = %trade.asset_id,
            usd = format_args!("{usd:.0}"),
            confidence = %confidence,
            "[DETECT] {} | ${usd:.0} {} {} @ {:.2} | {}",
            kinds.join("+"),
            trade.side,
            trade.outcome,
            trade.price,
            meta.title,
        );

        let candidate = AlertCandidate { trade, signals, confidence };
        match self.candidate_tx.try_send(candidate) {
            Ok(()) => self.candidates_emitted += 1,
            Err(e) => {
                self.candidate_drops += 1;
                warn!("candidate channel full, dropping alert: {e}");
            }
        }
    }

    fn schedule_wallet_fetch(&mut self, wallet: String) {
        if !self.pending_lookups.insert(wallet.clone()) {
            return;
        }
        let client = Arc::clone(&self.wallet_client);
        let tx = self.wallet_tx.clone();
        tokio::spawn(async move {
            let tx_count = match client.transaction_count(&wallet).await {
                Ok(n) => n,
                Err(e) => {
                    debug!(wallet = %wallet, "wallet lookup failed: {e}");
                    u64::MAX
                }
            };
            let _ = tx.send(WalletUpdate { wallet, tx_count }).await;
        });
    }

    fn apply_wallet_update(&mut self, update: WalletUpdate) {
        self.pending_lookups.remove(&update.wallet);
        self.wallet_cache.insert(&update.wallet, update.tx_count);
    }

    fn maybe_log_diagnostics(&mut self) {
        if self.last_diag_at.elapsed() < Duration::from_secs(30) {
            return;
        }
        self.last_diag_at = Instant::now();

        let c = &self.filter.counters;
        info!(
            trades = self.trades_seen,
            dropped = self.trades_dropped,
            candidates = self.candidates_emitted,
            candidate_drops = self.candidate_drops,
            "[DETECT] 30s diag | trades={} dropped={} | rejected: catalog={} excluded={} size={} lp={} | fired: whale={} fresh={} cluster={} timing={} odds={} contrarian={}",
            self.trades_seen,
            self.trades_dropped,
            c.not_in_catalog,
            c.excluded_market,
            c.below_min_size,
            c.lp_pairs,
            self.signal_counts.whale,
            self.signal_counts.fresh_wallet,
            self.signal_counts.cluster,
            self.signal_counts.timing,
            self.signal_counts.odds_move,
            self.signal_counts.contrarian,
        );
    }

    #[cfg(test)]
    fn stats_mut(&mut self, market_id: &str) -> &mut MarketStats {
        self.stats.entry(market_id.to_string()).or_default()
    }

    #[cfg(test)]
    fn stats_get(&self, market_id: &str) -> Option<&MarketStats> {
        self.stats.get(market_id)
    }
}
