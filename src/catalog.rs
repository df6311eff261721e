use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::{Config, CATALOG_ATTEMPTS, CATALOG_RETRY_DELAY_SECS, CATALOG_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::types::Outcome;

/// One tradeable token the scanner subscribes to, with the metadata the
/// filter, detector, and enricher read. Built once at startup; read-only after.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub market_id: String,
    pub title: String,
    /// Millisecond UTC epoch of market close, when the API supplied one.
    pub end_time_ms: Option<i64>,
    /// Which side of the market this token represents.
    pub outcome: Outcome,
    /// Title matched an EXCLUDE_MARKET_KEYWORDS entry; precomputed at load.
    pub excluded: bool,
}

/// Shared, effectively-immutable market metadata map keyed by asset id.
pub struct Catalog {
    entries: DashMap<String, CatalogEntry>,
    /// Subscription set in volume-rank order — the subscribe frame must be
    /// byte-identical across reconnects, so this order is fixed at build time.
    asset_ids: Vec<String>,
}

impl Catalog {
    pub fn build(markets: Vec<FetchedMarket>, exclude_keywords: &[String]) -> Self {
        let keywords: Vec<String> = exclude_keywords.iter().map(|k| k.to_lowercase()).collect();
        let entries = DashMap::new();
        let mut asset_ids = Vec::with_capacity(markets.len() * 2);

        for market in markets {
            let title_lower = market.question.to_lowercase();
            let excluded = keywords.iter().any(|k| title_lower.contains(k));

            for (token_id, outcome) in [
                (market.yes_token_id.clone(), Outcome::Yes),
                (market.no_token_id.clone(), Outcome::No),
            ] {
                entries.insert(
                    token_id.clone(),
                    CatalogEntry {
                        market_id: market.market_id.clone(),
                        title: market.question.clone(),
                        end_time_ms: market.end_time_ms,
                        outcome,
                        excluded,
                    },
                );
                asset_ids.push(token_id);
            }
        }

        Self { entries, asset_ids }
    }

    pub fn get(&self, asset_id: &str) -> Option<CatalogEntry> {
        self.entries.get(asset_id).map(|e| e.clone())
    }

    pub fn contains(&self, asset_id: &str) -> bool {
        self.entries.contains_key(asset_id)
    }

    pub fn asset_ids(&self) -> &[String] {
        &self.asset_ids
    }

    pub fn market_count(&self) -> usize {
        self.asset_ids.len() / 2
    }
}

// ---------------------------------------------------------------------------
// Bootstrap fetch
// ---------------------------------------------------------------------------

/// One market as returned by the catalog API, before token expansion.
#[derive(Debug, Clone)]
pub struct FetchedMarket {
    pub market_id: String,
    pub question: String,
    pub end_time_ms: Option<i64>,
    pub volume_24h: f64,
    pub yes_token_id: String,
    pub no_token_id: String,
}

#[derive(Debug, Default)]
pub struct CatalogStats {
    pub api_total: usize,
    pub rejected_no_tokens: usize,
    pub rejected_no_outcomes: usize,
    pub accepted: usize,
}

/// Fetch the top `market_limit` active markets ranked by 24h volume, retrying
/// a bounded number of times. Exhausting the retries is a fatal startup error.
pub async fn load_catalog(cfg: &Config) -> Result<(Vec<FetchedMarket>, CatalogStats)> {
    let mut last_err = None;
    for attempt in 1..=CATALOG_ATTEMPTS {
        match fetch_markets(cfg).await {
            Ok((mut markets, stats)) => {
                // The API is asked for volume order, but the ranking contract
                // is ours: sort and truncate client-side.
                markets.sort_by(|a, b| {
                    b.volume_24h
                        .partial_cmp(&a.volume_24h)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                markets.truncate(cfg.market_limit);
                return Ok((markets, stats));
            }
            Err(e) => {
                warn!("catalog fetch attempt {attempt}/{CATALOG_ATTEMPTS} failed: {e}");
                last_err = Some(e);
                if attempt < CATALOG_ATTEMPTS {
                    tokio::time::sleep(Duration::from_secs(CATALOG_RETRY_DELAY_SECS)).await;
                }
            }
        }
    }
    Err(AppError::Bootstrap(format!(
        "catalog unavailable after {CATALOG_ATTEMPTS} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default(),
    )))
}

/// Single pass over the paginated catalog endpoint. Markets arrive pre-sorted
/// by volume24hr descending; we stop once `market_limit` usable markets are
/// collected.
async fn fetch_markets(cfg: &Config) -> Result<(Vec<FetchedMarket>, CatalogStats)> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(CATALOG_TIMEOUT_SECS))
        .build()?;

    let mut markets = Vec::new();
    let mut stats = CatalogStats::default();
    let mut offset = 0usize;
    let page_size = 500usize;

    'outer: loop {
        let url = format!(
            "{}/markets?active=true&closed=false&limit={}&offset={}&order=volume24hr&ascending=false",
            cfg.gamma_api_url, page_size, offset
        );

        let resp: serde_json::Value = client.get(&url).send().await?.json().await?;

        let items = match resp.as_array() {
            Some(a) => a.clone(),
            None => {
                return Err(AppError::Bootstrap(
                    "catalog /markets response was not an array".to_string(),
                ))
            }
        };

        if items.is_empty() {
            break;
        }

        stats.api_total += items.len();

        for item in &items {
            match parse_catalog_market(item) {
                Ok(market) => {
                    markets.push(market);
                    if markets.len() >= cfg.market_limit {
                        break 'outer;
                    }
                }
                Err(Rejection::NoTokens) => stats.rejected_no_tokens += 1,
                Err(Rejection::NoOutcomes) => stats.rejected_no_outcomes += 1,
            }
        }

        if items.len() < page_size {
            break;
        }
        offset += page_size;
    }

    stats.accepted = markets.len();
    Ok((markets, stats))
}

enum Rejection {
    NoTokens,
    NoOutcomes,
}

fn parse_catalog_market(v: &serde_json::Value) -> std::result::Result<FetchedMarket, Rejection> {
    // clobTokenIds and outcomes are JSON-encoded string arrays inside strings.
    let token_ids: Vec<String> = v
        .get("clobTokenIds")
        .and_then(|s| s.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();
    if token_ids.len() < 2 {
        return Err(Rejection::NoTokens);
    }

    let outcomes: Vec<String> = v
        .get("outcomes")
        .and_then(|s| s.as_str())
        .and_then(|s| serde_json::from_str(s).ok())
        .unwrap_or_default();

    let yes_idx = outcomes.iter().position(|o| Outcome::parse(o) == Some(Outcome::Yes));
    let no_idx = outcomes.iter().position(|o| Outcome::parse(o) == Some(Outcome::No));
    let (yes_idx, no_idx) = match (yes_idx, no_idx) {
        (Some(y), Some(n)) => (y, n),
        _ if outcomes.len() == 2 => (0, 1),
        _ => return Err(Rejection::NoOutcomes),
    };
    let yes_token_id = token_ids[yes_idx].clone();
    let no_token_id = token_ids[no_idx].clone();

    let market_id = v
        .get("conditionId")
        .and_then(|s| s.as_str())
        .unwrap_or("")
        .to_string();
    if market_id.is_empty() {
        return Err(Rejection::NoTokens);
    }

    let question = v
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or("")
        .to_string();

    let end_time_ms = v
        .get("endDateIso")
        .and_then(|e| e.as_str())
        .and_then(parse_iso_to_unix_secs)
        .map(|secs| (secs * 1000.0) as i64);

    let volume_24h = v
        .get("volume24hr")
        .and_then(|x| x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse().ok())))
        .unwrap_or(0.0);

    Ok(FetchedMarket {
        market_id,
        question,
        end_time_ms,
        volume_24h,
        yes_token_id,
        no_token_id,
    })
}

pub fn log_catalog_report(stats: &CatalogStats, catalog: &Catalog) {
    info!(
        markets = catalog.market_count(),
        asset_ids = catalog.asset_ids().len(),
        api_total = stats.api_total,
        "[CATALOG] bootstrap complete: {} markets ({} asset ids) from {} API results",
        catalog.market_count(),
        catalog.asset_ids().len(),
        stats.api_total,
    );
    info!(
        "[CATALOG] rejected: no_tokens={} no_outcomes={}",
        stats.rejected_no_tokens, stats.rejected_no_outcomes,
    );
}

/// Parse an RFC 3339 / ISO 8601 UTC timestamp string to Unix seconds.
pub fn parse_iso_to_unix_secs(s: &str) -> Option<f64> {
    let s = s.trim();
    let s = s.strip_suffix('Z').unwrap_or(s);
    let s = if let Some(dot) = s.find('.') { &s[..dot] } else { s };
    let s = if s.len() > 19 {
        let b = s.as_bytes()[19];
        if b == b'+' || b == b'-' { &s[..19] } else { s }
    } else {
        s
    };
    let (year, month, day, hour, minute, second): (i64, i64, i64, i64, i64, i64) =
        if s.len() == 10 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?, 0, 0, 0)
        } else if s.len() >= 19 {
            (s[0..4].parse().ok()?, s[5..7].parse().ok()?, s[8..10].parse().ok()?,
             s[11..13].parse().ok()?, s[14..16].parse().ok()?, s[17..19].parse().ok()?)
        } else {
            return None;
        };

    let a = (14 - month) / 12;
    let y = year + 4800 - a;
    let m = month + 12 * a - 3;
    let jdn = day + (153 * m + 2) / 5 + 365 * y + y / 4 - y / 100 + y / 400 - 32045;
    let unix_days = jdn - 2_440_588;
    Some((unix_days * 86400 + hour * 3600 + minute * 60 + second) as f64)
}
