use crate::config::{Config, HIGH_CONFIDENCE_USD, WHALE_MIN_SAMPLES};
use crate::state::MarketStats;
use crate::types::{Confidence, Outcome, Side, Signal, Trade};

/// Detection thresholds, copied out of `Config` once at startup.
#[derive(Debug, Clone)]
pub struct SignalParams {
    pub whale_threshold_usd: f64,
    pub whale_multiplier: f64,
    pub fresh_wallet_max_txs: u64,
    pub cluster_min_wallets: usize,
    pub timing_hours_threshold: f64,
    pub odds_movement_threshold: f64,
    pub contrarian_consensus_threshold: f64,
    pub contrarian_min_size_usd: f64,
}

impl SignalParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            whale_threshold_usd: cfg.whale_threshold_usd,
            whale_multiplier: cfg.whale_multiplier,
            fresh_wallet_max_txs: cfg.fresh_wallet_max_txs,
            cluster_min_wallets: cfg.cluster_min_wallets,
            timing_hours_threshold: cfg.timing_hours_threshold,
            odds_movement_threshold: cfg.odds_movement_threshold,
            contrarian_consensus_threshold: cfg.contrarian_consensus_threshold,
            contrarian_min_size_usd: cfg.contrarian_min_size_usd,
        }
    }
}

/// Absolute notional, or large relative to the rolling mean. The sample floor
/// keeps cold markets from firing on their first few trades. `stats` is the
/// pre-update window — the trade never compares against its own contribution.
pub fn whale(trade: &Trade, stats: &MarketStats, p: &SignalParams) -> Option<Signal> {
    let usd = trade.usd_value();
    if usd >= p.whale_threshold_usd {
        let multiplier = stats.recent_mean().map(|m| usd / m);
        return Some(Signal::Whale { multiplier });
    }
    if stats.recent_len() >= WHALE_MIN_SAMPLES {
        if let Some(mean) = stats.recent_mean() {
            if usd >= p.whale_multiplier * mean {
                return Some(Signal::Whale { multiplier: Some(usd / mean) });
            }
        }
    }
    None
}

/// `tx_count` is None on a cache miss (lookup in flight) and `u64::MAX` after
/// a failed lookup — neither fires.
pub fn fresh_wallet(tx_count: Option<u64>, p: &SignalParams) -> Option<Signal> {
    match tx_count {
        Some(n) if n < p.fresh_wallet_max_txs => Some(Signal::FreshWallet { tx_count: n }),
        _ => None,
    }
}

/// Distinct wallets buying the same outcome inside the cluster window.
/// The caller has already recorded the current trade into `recent_buyers`
/// and pruned the window, so the count includes this trade.
pub fn cluster(trade: &Trade, stats: &MarketStats, p: &SignalParams) -> Option<Signal> {
    if trade.side != Side::Buy {
        return None;
    }
    let wallets = stats.distinct_buyers(trade.outcome);
    if wallets >= p.cluster_min_wallets {
        Some(Signal::Cluster { wallets })
    } else {
        None
    }
}

pub fn timing(trade: &Trade, end_time_ms: Option<i64>, p: &SignalParams) -> Option<Signal> {
    let end = end_time_ms?;
    let remaining_ms = end - trade.timestamp_ms;
    if remaining_ms <= 0 {
        return None;
    }
    let hours = remaining_ms as f64 / 3_600_000.0;
    if hours <= p.timing_hours_threshold {
        Some(Signal::Timing { hours_to_close: hours })
    } else {
        None
    }
}

/// Price gap vs the previous surviving trade. Never fires on a market's first
/// trade — `last_price` is still unset.
pub fn odds_move(trade: &Trade, stats: &MarketStats, p: &SignalParams) -> Option<Signal> {
    let last = stats.last_price?;
    let delta = trade.price - last;
    if delta.abs() >= p.odds_movement_threshold {
        Some(Signal::OddsMove { delta })
    } else {
        None
    }
}

/// Sizable position increasing exposure to the minority side of a settled
/// consensus. With YES-consensus (p_yes >= threshold) that is BUY NO or
/// SELL YES; symmetric when the consensus is NO.
pub fn contrarian(trade: &Trade, stats: &MarketStats, p: &SignalParams) -> Option<Signal> {
    if trade.usd_value() < p.contrarian_min_size_usd {
        return None;
    }
    let p_yes = stats.consensus_yes?;

    let against = if p_yes >= p.contrarian_consensus_threshold {
        matches!(
            (trade.side, trade.outcome),
            (Side::Buy, Outcome::No) | (Side::Sell, Outcome::Yes)
        )
    } else if p_yes <= 1.0 - p.contrarian_consensus_threshold {
        matches!(
            (trade.side, trade.outcome),
            (Side::Buy, Outcome::Yes) | (Side::Sell, Outcome::No)
        )
    } else {
        false
    };

    if against {
        Some(Signal::Contrarian { consensus_yes: p_yes })
    } else {
        None
    }
}

pub fn confidence(signals: &[Signal], usd_value: f64) -> Confidence {
    if signals.len() >= 2 || usd_value >= HIGH_CONFIDENCE_USD {
        Confidence::High
    } else {
        Confidence::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalKind;

    fn params() -> SignalParams {
        SignalParams {
            whale_threshold_usd: 10_000.0,
            whale_multiplier: 5.0,
            fresh_wallet_max_txs: 10,
            cluster_min_wallets: 3,
            timing_hours_threshold: 24.0,
            odds_movement_threshold: 0.05,
            contrarian_consensus_threshold: 0.70,
            contrarian_min_size_usd: 5000.0,
        }
    }

    fn trade(side: Side, outcome: Outcome, price: f64, size: f64, ts: i64) -> Trade {
        Trade {
            asset_id: "tok1".to_string(),
            side,
            outcome,
            price,
            size,
            wallet: "0xa".to_string(),
            timestamp_ms: ts,
            trade_id: "t-1".to_string(),
        }
    }

    // -------------------------------------------------------------------------
    // WHALE
    // -------------------------------------------------------------------------

    #[test]
    fn whale_absolute_threshold_fires_on_cold_market() {
        let stats = MarketStats::new();
        let t = trade(Side::Buy, Outcome::Yes, 0.60, 20_000.0, 0); // $12k
        let sig = whale(&t, &stats, &params()).unwrap();
        assert_eq!(sig.kind(), SignalKind::Whale);
        assert_eq!(sig, Signal::Whale { multiplier: None });
    }

    #[test]
    fn whale_relative_requires_sample_floor() {
        let p = params();
        let t = trade(Side::Buy, Outcome::Yes, 0.50, 16_000.0, 0); // $8k, below absolute

        // 19 samples of $1k: mean $1k, 8x the mean — but under the floor.
        let mut stats = MarketStats::new();
        stats.seed_recent(&vec![1000.0; 19]);
        assert!(whale(&t, &stats, &p).is_none());

        // 20th sample unlocks the relative test.
        stats.seed_recent(&[1000.0]);
        let sig = whale(&t, &stats, &p).unwrap();
        assert_eq!(sig, Signal::Whale { multiplier: Some(8.0) });
    }

    #[test]
    fn whale_relative_respects_multiplier() {
        let mut stats = MarketStats::new();
        stats.seed_recent(&vec![2500.0; 25]);
        // $9k = 3.6x mean < 5x — no fire.
        let t = trade(Side::Buy, Outcome::Yes, 0.45, 20_000.0, 0);
        assert!(whale(&t, &stats, &params()).is_none());
        // $13k ≥ both gates.
        let t = trade(Side::Buy, Outcome::Yes, 0.65, 20_000.0, 0);
        assert!(whale(&t, &stats, &params()).is_some());
    }

    // -------------------------------------------------------------------------
    // FRESH_WALLET
    // -------------------------------------------------------------------------

    #[test]
    fn fresh_wallet_fires_below_threshold_only() {
        let p = params();
        assert_eq!(fresh_wallet(Some(3), &p), Some(Signal::FreshWallet { tx_count: 3 }));
        assert!(fresh_wallet(Some(10), &p).is_none());
        assert!(fresh_wallet(Some(500), &p).is_none());
    }

    #[test]
    fn fresh_wallet_never_fires_on_miss_or_failure() {
        let p = params();
        assert!(fresh_wallet(None, &p).is_none());
        assert!(fresh_wallet(Some(u64::MAX), &p).is_none());
    }

    // -------------------------------------------------------------------------
    // CLUSTER
    // -------------------------------------------------------------------------

    #[test]
    fn cluster_fires_at_min_distinct_wallets() {
        let mut stats = MarketStats::new();
        stats.record_buyer("0xa", Outcome::Yes, 1000);
        stats.record_buyer("0xb", Outcome::Yes, 2000);
        stats.record_buyer("0xc", Outcome::Yes, 3000);

        let t = trade(Side::Buy, Outcome::Yes, 0.5, 6000.0, 3000);
        assert_eq!(cluster(&t, &stats, &params()), Some(Signal::Cluster { wallets: 3 }));
    }

    #[test]
    fn cluster_ignores_other_outcome_and_sells() {
        let mut stats = MarketStats::new();
        stats.record_buyer("0xa", Outcome::Yes, 1000);
        stats.record_buyer("0xb", Outcome::Yes, 2000);
        stats.record_buyer("0xc", Outcome::No, 3000);

        let t = trade(Side::Buy, Outcome::Yes, 0.5, 6000.0, 3000);
        assert!(cluster(&t, &stats, &params()).is_none());

        // A SELL never clusters, whatever the window holds.
        let t = trade(Side::Sell, Outcome::Yes, 0.5, 6000.0, 3000);
        assert!(cluster(&t, &stats, &params()).is_none());
    }

    // -------------------------------------------------------------------------
    // TIMING
    // -------------------------------------------------------------------------

    #[test]
    fn timing_fires_inside_threshold() {
        let t = trade(Side::Buy, Outcome::Yes, 0.5, 6000.0, 0);
        let end = Some(12 * 3_600_000);
        match timing(&t, end, &params()) {
            Some(Signal::Timing { hours_to_close }) => {
                assert!((hours_to_close - 12.0).abs() < 1e-9);
            }
            other => panic!("expected Timing, got {other:?}"),
        }
    }

    #[test]
    fn timing_ignores_far_or_past_close() {
        let t = trade(Side::Buy, Outcome::Yes, 0.5, 6000.0, 100_000_000);
        // 48h out.
        assert!(timing(&t, Some(100_000_000 + 48 * 3_600_000), &params()).is_none());
        // Already closed.
        assert!(timing(&t, Some(50_000_000), &params()).is_none());
        // Unknown close.
        assert!(timing(&t, None, &params()).is_none());
    }

    // -------------------------------------------------------------------------
    // ODDS_MOVE
    // -------------------------------------------------------------------------

    #[test]
    fn odds_move_requires_prior_price() {
        let stats = MarketStats::new();
        let t = trade(Side::Buy, Outcome::Yes, 0.90, 6000.0, 0);
        assert!(odds_move(&t, &stats, &params()).is_none());
    }

    #[test]
    fn odds_move_fires_on_threshold_delta() {
        let mut stats = MarketStats::new();
        stats.last_price = Some(0.40);

        let t = trade(Side::Buy, Outcome::Yes, 0.44, 6000.0, 0);
        assert!(odds_move(&t, &stats, &params()).is_none());

        let t = trade(Side::Buy, Outcome::Yes, 0.45, 6000.0, 0);
        match odds_move(&t, &stats, &params()) {
            Some(Signal::OddsMove { delta }) => assert!((delta - 0.05).abs() < 1e-9),
            other => panic!("expected OddsMove, got {other:?}"),
        }

        // Downward moves count too.
        let t = trade(Side::Sell, Outcome::Yes, 0.30, 6000.0, 0);
        assert!(odds_move(&t, &stats, &params()).is_some());
    }

    // -------------------------------------------------------------------------
    // CONTRARIAN
    // -------------------------------------------------------------------------

    #[test]
    fn contrarian_fires_against_yes_consensus() {
        let mut stats = MarketStats::new();
        stats.consensus_yes = Some(0.82);

        let t = trade(Side::Buy, Outcome::No, 0.20, 30_000.0, 0); // $6k
        assert_eq!(
            contrarian(&t, &stats, &params()),
            Some(Signal::Contrarian { consensus_yes: 0.82 })
        );

        let t = trade(Side::Sell, Outcome::Yes, 0.82, 8000.0, 0);
        assert!(contrarian(&t, &stats, &params()).is_some());

        // With the crowd — no fire.
        let t = trade(Side::Buy, Outcome::Yes, 0.82, 8000.0, 0);
        assert!(contrarian(&t, &stats, &params()).is_none());
    }

    #[test]
    fn contrarian_symmetric_for_no_consensus() {
        let mut stats = MarketStats::new();
        stats.consensus_yes = Some(0.20);

        let t = trade(Side::Buy, Outcome::Yes, 0.20, 30_000.0, 0);
        assert!(contrarian(&t, &stats, &params()).is_some());
        let t = trade(Side::Sell, Outcome::No, 0.80, 8000.0, 0);
        assert!(contrarian(&t, &stats, &params()).is_some());
        let t = trade(Side::Buy, Outcome::No, 0.80, 8000.0, 0);
        assert!(contrarian(&t, &stats, &params()).is_none());
    }

    #[test]
    fn contrarian_needs_settled_consensus_and_size() {
        let p = params();
        let mut stats = MarketStats::new();

        // No consensus observed yet.
        let t = trade(Side::Buy, Outcome::No, 0.50, 12_000.0, 0);
        assert!(contrarian(&t, &stats, &p).is_none());

        // Consensus not settled (0.60 < 0.70 on both sides).
        stats.consensus_yes = Some(0.60);
        assert!(contrarian(&t, &stats, &p).is_none());

        // Settled consensus but undersized trade.
        stats.consensus_yes = Some(0.82);
        let t = trade(Side::Buy, Outcome::No, 0.20, 10_000.0, 0); // $2k
        assert!(contrarian(&t, &stats, &p).is_none());
    }

    // -------------------------------------------------------------------------
    // Confidence
    // -------------------------------------------------------------------------

    #[test]
    fn confidence_rules() {
        let whale = Signal::Whale { multiplier: None };
        let timing = Signal::Timing { hours_to_close: 1.0 };

        assert_eq!(confidence(&[whale.clone()], 12_000.0), Confidence::Medium);
        assert_eq!(confidence(&[whale.clone(), timing], 12_000.0), Confidence::High);
        assert_eq!(confidence(&[whale], 25_000.0), Confidence::High);
    }
}
