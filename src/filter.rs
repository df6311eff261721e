use crate::catalog::CatalogEntry;
use crate::state::MarketStats;
use crate::types::Trade;

/// Why the filter chain discarded a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotInCatalog,
    ExcludedMarket,
    BelowMinSize,
    /// Opposite-outcome pair from the same wallet inside the LP window;
    /// both trades are discarded.
    LpPair,
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Rejection::NotInCatalog => "not_in_catalog",
            Rejection::ExcludedMarket => "excluded_market",
            Rejection::BelowMinSize => "below_min_size",
            Rejection::LpPair => "lp_pair",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Default)]
pub struct FilterCounters {
    pub not_in_catalog: u64,
    pub excluded_market: u64,
    pub below_min_size: u64,
    pub lp_pairs: u64,
}

/// Three-stage reject chain. The stages run in order and the first rejection
/// stops the chain: catalog/keyword gate, minimum size, LP pairing. A trade
/// rejected here must never reach any per-market aggregate.
pub struct TradeFilter {
    min_usd_size: f64,
    lp_window_ms: i64,
    pub counters: FilterCounters,
}

impl TradeFilter {
    pub fn new(min_usd_size: f64, lp_window_ms: i64) -> Self {
        Self {
            min_usd_size,
            lp_window_ms,
            counters: FilterCounters::default(),
        }
    }

    /// Stage 1: the asset must be in the catalog and its market title must not
    /// match an exclusion keyword (precomputed on the entry).
    pub fn gate_catalog(&mut self, entry: Option<&CatalogEntry>) -> Result<(), Rejection> {
        match entry {
            None => {
                self.counters.not_in_catalog += 1;
                Err(Rejection::NotInCatalog)
            }
            Some(e) if e.excluded => {
                self.counters.excluded_market += 1;
                Err(Rejection::ExcludedMarket)
            }
            Some(_) => Ok(()),
        }
    }

    /// Stage 2: minimum notional.
    pub fn gate_size(&mut self, usd_value: f64) -> Result<(), Rejection> {
        if usd_value < self.min_usd_size {
            self.counters.below_min_size += 1;
            return Err(Rejection::BelowMinSize);
        }
        Ok(())
    }

    /// Stage 3: LP/arbitrage pairing. A wallet taking opposite outcomes on the
    /// same market inside the window is balanced flow, not conviction — both
    /// trades are discarded. The current trade is dropped here; the paired
    /// entry's statistical footprint is unwound by the store.
    pub fn gate_lp(&mut self, trade: &Trade, stats: &mut MarketStats) -> Result<(), Rejection> {
        if stats.take_opposite_pair(trade, self.lp_window_ms) {
            self.counters.lp_pairs += 1;
            return Err(Rejection::LpPair);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Outcome, Side};

    fn entry(excluded: bool) -> CatalogEntry {
        CatalogEntry {
            market_id: "m1".to_string(),
            title: "Election winner?".to_string(),
            end_time_ms: None,
            outcome: Outcome::Yes,
            excluded,
        }
    }

    fn trade(wallet: &str, outcome: Outcome, ts: i64) -> Trade {
        Trade {
            asset_id: "tok1".to_string(),
            side: Side::Buy,
            outcome,
            price: 0.5,
            size: 10_000.0,
            wallet: wallet.to_string(),
            timestamp_ms: ts,
            trade_id: format!("t-{ts}"),
        }
    }

    #[test]
    fn unknown_asset_is_rejected() {
        let mut filter = TradeFilter::new(2000.0, 200);
        assert_eq!(filter.gate_catalog(None), Err(Rejection::NotInCatalog));
        assert_eq!(filter.counters.not_in_catalog, 1);
    }

    #[test]
    fn excluded_market_is_rejected() {
        let mut filter = TradeFilter::new(2000.0, 200);
        assert_eq!(filter.gate_catalog(Some(&entry(true))), Err(Rejection::ExcludedMarket));
        assert!(filter.gate_catalog(Some(&entry(false))).is_ok());
    }

    #[test]
    fn size_gate_uses_strict_threshold() {
        let mut filter = TradeFilter::new(2000.0, 200);
        assert_eq!(filter.gate_size(1999.99), Err(Rejection::BelowMinSize));
        assert!(filter.gate_size(2000.0).is_ok());
    }

    #[test]
    fn lp_pair_rejects_second_leg_and_erases_first() {
        let mut filter = TradeFilter::new(2000.0, 200);
        let mut stats = MarketStats::new();

        assert!(filter.gate_lp(&trade("0xd", Outcome::Yes, 10_000), &mut stats).is_ok());
        assert_eq!(
            filter.gate_lp(&trade("0xd", Outcome::No, 10_150), &mut stats),
            Err(Rejection::LpPair)
        );
        assert_eq!(filter.counters.lp_pairs, 1);

        // The pair was consumed — a third opposite trade starts a new entry.
        assert!(filter.gate_lp(&trade("0xd", Outcome::Yes, 10_200), &mut stats).is_ok());
    }

    #[test]
    fn lp_pair_outside_window_survives() {
        let mut filter = TradeFilter::new(2000.0, 200);
        let mut stats = MarketStats::new();

        assert!(filter.gate_lp(&trade("0xd", Outcome::Yes, 10_000), &mut stats).is_ok());
        assert!(filter.gate_lp(&trade("0xd", Outcome::No, 10_500), &mut stats).is_ok());
        assert_eq!(filter.counters.lp_pairs, 0);
    }
}
