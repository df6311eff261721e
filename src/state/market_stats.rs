use std::collections::{HashMap, HashSet, VecDeque};

use crate::config::RECENT_TRADES_CAP;
use crate::types::{Outcome, Side, Trade};

/// Last trade recorded for a wallet, awaiting a possible opposite-side pair.
/// Carries enough of the trade to unwind its statistical footprint if the
/// pair completes: both legs of an LP pair must leave no trace in the
/// aggregates.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub outcome: Outcome,
    pub timestamp_ms: i64,
    usd_value: f64,
    price: f64,
    was_buy: bool,
    /// Aggregate values before this trade's own update, for rollback.
    prev_last_price: Option<f64>,
    prev_consensus_yes: Option<f64>,
}

/// Per-market rolling aggregates. Owned exclusively by the detection task —
/// no locks, all window maintenance is lazy on access.
#[derive(Debug, Default)]
pub struct MarketStats {
    /// usd_value of the last `RECENT_TRADES_CAP` surviving trades, oldest first.
    recent_trades: VecDeque<f64>,
    /// Price of the most recent surviving trade.
    pub last_price: Option<f64>,
    /// Most recent observed YES-outcome price.
    pub consensus_yes: Option<f64>,
    /// (wallet, outcome, timestamp_ms) of recent BUYs, oldest first.
    recent_buyers: VecDeque<(String, Outcome, i64)>,
    /// wallet → last trade seen, for LP/arbitrage pairing.
    pending_opposite: HashMap<String, PendingEntry>,
}

impl MarketStats {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Rolling trade window
    // -----------------------------------------------------------------------

    pub fn recent_len(&self) -> usize {
        self.recent_trades.len()
    }

    /// Mean usd_value over the window; None when empty.
    pub fn recent_mean(&self) -> Option<f64> {
        if self.recent_trades.is_empty() {
            return None;
        }
        Some(self.recent_trades.iter().sum::<f64>() / self.recent_trades.len() as f64)
    }

    pub fn push_trade(&mut self, usd_value: f64) {
        if self.recent_trades.len() >= RECENT_TRADES_CAP {
            self.recent_trades.pop_front();
        }
        self.recent_trades.push_back(usd_value);
    }

    #[cfg(test)]
    pub fn seed_recent(&mut self, values: &[f64]) {
        for &v in values {
            self.push_trade(v);
        }
    }

    // -----------------------------------------------------------------------
    // Recent-buyer window (CLUSTER input)
    // -----------------------------------------------------------------------

    /// Drop buyer entries older than the window, measured against `now_ms`.
    pub fn prune_buyers(&mut self, now_ms: i64, window_secs: u64) {
        let cutoff = now_ms - (window_secs as i64) * 1000;
        while let Some((_, _, ts)) = self.recent_buyers.front() {
            if *ts < cutoff {
                self.recent_buyers.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn record_buyer(&mut self, wallet: &str, outcome: Outcome, timestamp_ms: i64) {
        self.recent_buyers.push_back((wallet.to_string(), outcome, timestamp_ms));
    }

    /// Distinct wallets that bought `outcome` inside the (already pruned) window.
    pub fn distinct_buyers(&self, outcome: Outcome) -> usize {
        let mut wallets: HashSet<&str> = HashSet::new();
        for (wallet, o, _) in &self.recent_buyers {
            if *o == outcome {
                wallets.insert(wallet.as_str());
            }
        }
        wallets.len()
    }

    pub fn buyers_len(&self) -> usize {
        self.recent_buyers.len()
    }

    pub fn oldest_buyer_ts(&self) -> Option<i64> {
        self.recent_buyers.front().map(|(_, _, ts)| *ts)
    }

    // -----------------------------------------------------------------------
    // LP/arbitrage pairing
    // -----------------------------------------------------------------------

    /// Consult the pending-opposite map for the trade's wallet.
    ///
    /// If an unexpired entry with the opposite outcome exists, the pair is
    /// complete: the entry is removed, the first leg's contribution is
    /// unwound from the aggregates, and `true` is returned — the caller
    /// discards the current trade. Otherwise the current trade is recorded,
    /// overwriting any stale entry, and `false` is returned.
    ///
    /// Must be called before the current trade's own stats update, so the
    /// `prev_*` snapshot excludes it.
    pub fn take_opposite_pair(&mut self, trade: &Trade, window_ms: i64) -> bool {
        let paired = self.pending_opposite.get(&trade.wallet).is_some_and(|entry| {
            (trade.timestamp_ms - entry.timestamp_ms).abs() <= window_ms
                && entry.outcome == trade.outcome.opposite()
        });
        if paired {
            if let Some(entry) = self.pending_opposite.remove(&trade.wallet) {
                self.unwind_leg(&trade.wallet, &entry);
            }
            return true;
        }
        self.pending_opposite.insert(
            trade.wallet.clone(),
            PendingEntry {
                outcome: trade.outcome,
                timestamp_ms: trade.timestamp_ms,
                usd_value: trade.usd_value(),
                price: trade.price,
                was_buy: trade.side == Side::Buy,
                prev_last_price: self.last_price,
                prev_consensus_yes: self.consensus_yes,
            },
        );
        // Keep the map bounded under wallet churn; entries past the window
        // can never pair again.
        if self.pending_opposite.len() > 512 {
            let now_ms = trade.timestamp_ms;
            self.pending_opposite
                .retain(|_, e| (now_ms - e.timestamp_ms).abs() <= window_ms);
        }
        false
    }

    /// Erase the statistical footprint of a paired first leg: its window
    /// sample, its buyer entry, and — when still the latest — its price
    /// updates.
    fn unwind_leg(&mut self, wallet: &str, entry: &PendingEntry) {
        if let Some(pos) = self
            .recent_trades
            .iter()
            .rposition(|&usd| usd == entry.usd_value)
        {
            self.recent_trades.remove(pos);
        }

        if entry.was_buy {
            if let Some(pos) = self.recent_buyers.iter().rposition(|(w, o, ts)| {
                w == wallet && *o == entry.outcome && *ts == entry.timestamp_ms
            }) {
                self.recent_buyers.remove(pos);
            }
        }

        if self.last_price == Some(entry.price) {
            self.last_price = entry.prev_last_price;
        }
        let consensus_contribution = match entry.outcome {
            Outcome::Yes => entry.price,
            Outcome::No => 1.0 - entry.price,
        };
        if self.consensus_yes == Some(consensus_contribution) {
            self.consensus_yes = entry.prev_consensus_yes;
        }
    }

    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending_opposite.len()
    }
}
