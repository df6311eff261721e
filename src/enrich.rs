use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::Catalog;
use crate::config::{Config, MIDPOINT_TIMEOUT_SECS};
use crate::error::Result;
use crate::state::WalletCache;
use crate::types::{Alert, AlertCandidate};

/// Fills in what the alert formatters need: market title and close time from
/// the catalog, a best-effort order-book midpoint, and the cached wallet
/// summary. Every lookup degrades gracefully — a candidate always becomes an
/// alert, with whatever context is available.
pub struct Enricher {
    catalog: Arc<Catalog>,
    wallet_cache: Arc<WalletCache>,
    client: reqwest::Client,
    clob_api_url: String,
    candidate_rx: mpsc::Receiver<AlertCandidate>,
    alert_tx: mpsc::Sender<Alert>,
}

impl Enricher {
    pub fn new(
        cfg: &Config,
        catalog: Arc<Catalog>,
        wallet_cache: Arc<WalletCache>,
        candidate_rx: mpsc::Receiver<AlertCandidate>,
        alert_tx: mpsc::Sender<Alert>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(MIDPOINT_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            catalog,
            wallet_cache,
            client,
            clob_api_url: cfg.clob_api_url.clone(),
            candidate_rx,
            alert_tx,
        })
    }

    pub async fn run(mut self) {
        while let Some(candidate) = self.candidate_rx.recv().await {
            let alert = self.enrich(candidate).await;
            if let Err(e) = self.alert_tx.try_send(alert) {
                warn!("alert channel full, dropping alert: {e}");
            }
        }
        info!("[ENRICH] input closed, stopping");
    }

    async fn enrich(&self, candidate: AlertCandidate) -> Alert {
        let AlertCandidate { trade, signals, confidence } = candidate;

        // Catalog reads never block on network.
        let (market_title, end_time_ms) = match self.catalog.get(&trade.asset_id) {
            Some(meta) => (meta.title, meta.end_time_ms),
            None => (short_id(&trade.asset_id), None),
        };

        let midpoint = self.fetch_midpoint(&trade.asset_id).await;

        // Cache read only; the failed-lookup sentinel is not worth showing.
        let wallet_tx_count = self
            .wallet_cache
            .fresh_tx_count(&trade.wallet)
            .filter(|&n| n != u64::MAX);

        Alert {
            trade,
            signals,
            confidence,
            market_title,
            end_time_ms,
            midpoint,
            wallet_tx_count,
        }
    }

    /// Best-effort book midpoint with a short timeout; None on any failure.
    async fn fetch_midpoint(&self, token_id: &str) -> Option<f64> {
        let url = format!("{}/book?token_id={}", self.clob_api_url, token_id);
        let resp: serde_json::Value = self.client.get(&url).send().await.ok()?.json().await.ok()?;

        let best_ask = best_level_price(&resp, "asks")?;
        let best_bid = best_level_price(&resp, "bids")?;
        if best_ask > 0.0 && best_bid > 0.0 {
            Some((best_ask + best_bid) / 2.0)
        } else {
            None
        }
    }
}

fn best_level_price(book: &serde_json::Value, side: &str) -> Option<f64> {
    book.get(side)
        .and_then(|a| a.as_array())
        .and_then(|a| a.first())
        .and_then(|level| level.get("price"))
        .and_then(|p| p.as_str())
        .and_then(|s| s.parse::<f64>().ok())
}

fn short_id(asset_id: &str) -> String {
    if asset_id.len() > 12 {
        format!("{}…", &asset_id[..12])
    } else {
        asset_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FetchedMarket;
    use crate::types::{Confidence, Outcome, Side, Signal, Trade};

    fn candidate(asset: &str, wallet: &str) -> AlertCandidate {
        AlertCandidate {
            trade: Trade {
                asset_id: asset.to_string(),
                side: Side::Buy,
                outcome: Outcome::Yes,
                price: 0.6,
                size: 20_000.0,
                wallet: wallet.to_string(),
                timestamp_ms: 1_000,
                trade_id: "t-1".to_string(),
            },
            signals: vec![Signal::Whale { multiplier: None }],
            confidence: Confidence::Medium,
        }
    }

    fn enricher() -> (Enricher, mpsc::Sender<AlertCandidate>, mpsc::Receiver<Alert>) {
        let catalog = Arc::new(Catalog::build(
            vec![FetchedMarket {
                market_id: "m1".to_string(),
                question: "Election winner?".to_string(),
                end_time_ms: Some(42_000),
                volume_24h: 0.0,
                yes_token_id: "m1-yes".to_string(),
                no_token_id: "m1-no".to_string(),
            }],
            &[],
        ));
        let wallet_cache = Arc::new(WalletCache::new(Duration::from_secs(3600)));
        wallet_cache.insert("0xa", 7);
        wallet_cache.insert("0xbad", u64::MAX);

        let (candidate_tx, candidate_rx) = mpsc::channel(8);
        let (alert_tx, alert_rx) = mpsc::channel(8);

        let cfg_client = reqwest::Client::builder().build().unwrap();
        let enricher = Enricher {
            catalog,
            wallet_cache,
            client: cfg_client,
            // Nothing listens here: the midpoint fetch degrades to None.
            clob_api_url: "http://127.0.0.1:1".to_string(),
            candidate_rx,
            alert_tx,
        };
        (enricher, candidate_tx, alert_rx)
    }

    #[tokio::test]
    async fn enrich_resolves_catalog_and_wallet_fields() {
        let (enricher, _tx, _rx) = enricher();
        let alert = enricher.enrich(candidate("m1-yes", "0xa")).await;

        assert_eq!(alert.market_title, "Election winner?");
        assert_eq!(alert.end_time_ms, Some(42_000));
        assert_eq!(alert.wallet_tx_count, Some(7));
        assert_eq!(alert.midpoint, None, "unreachable book endpoint degrades to None");
        assert_eq!(alert.signals.len(), 1);
    }

    #[tokio::test]
    async fn enrich_degrades_on_catalog_miss_and_failed_wallet() {
        let (enricher, _tx, _rx) = enricher();
        let alert = enricher
            .enrich(candidate("unknown-token-somewhere", "0xbad"))
            .await;

        assert!(alert.market_title.starts_with("unknown-toke"));
        assert!(alert.market_title.ends_with('…'));
        assert_eq!(alert.end_time_ms, None);
        assert_eq!(alert.wallet_tx_count, None, "failed-lookup sentinel is hidden");
    }

    #[test]
    fn best_level_price_walks_book_json() {
        let book = serde_json::json!({
            "asks": [{"price": "0.62", "size": "100"}],
            "bids": [{"price": "0.58", "size": "50"}],
        });
        assert_eq!(best_level_price(&book, "asks"), Some(0.62));
        assert_eq!(best_level_price(&book, "bids"), Some(0.58));
        assert_eq!(best_level_price(&book, "nope"), None);
    }
}
