use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Cached on-chain transaction count for one wallet.
/// `tx_count == u64::MAX` records a failed lookup, so the fresh-wallet
/// signal can never fire from a fetch error.
#[derive(Debug, Clone, Copy)]
pub struct WalletInfo {
    pub tx_count: u64,
    pub fetched_at: Instant,
}

/// TTL'd wallet activity cache. Written only by the detection task; the
/// enricher reads without mutation.
pub struct WalletCache {
    entries: DashMap<String, WalletInfo>,
    ttl: Duration,
}

impl WalletCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    /// Unexpired tx count for `wallet`, or None (absent or past TTL).
    /// Expired entries are evicted on read to keep memory bounded.
    pub fn fresh_tx_count(&self, wallet: &str) -> Option<u64> {
        let expired = match self.entries.get(wallet) {
            Some(info) if info.fetched_at.elapsed() < self.ttl => return Some(info.tx_count),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(wallet);
        }
        None
    }

    pub fn insert(&self, wallet: &str, tx_count: u64) {
        self.entries.insert(
            wallet.to_string(),
            WalletInfo { tx_count, fetched_at: Instant::now() },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let cache = WalletCache::new(Duration::from_secs(3600));
        assert!(cache.fresh_tx_count("0xa").is_none());

        cache.insert("0xa", 7);
        assert_eq!(cache.fresh_tx_count("0xa"), Some(7));
    }

    #[test]
    fn expired_entry_is_evicted() {
        let cache = WalletCache::new(Duration::from_secs(0));
        cache.insert("0xa", 7);
        assert!(cache.fresh_tx_count("0xa").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn failed_lookup_sentinel_round_trips() {
        let cache = WalletCache::new(Duration::from_secs(3600));
        cache.insert("0xa", u64::MAX);
        assert_eq!(cache.fresh_tx_count("0xa"), Some(u64::MAX));
    }
}
