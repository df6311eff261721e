use crate::error::{AppError, Result};

pub const WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";
pub const DEFAULT_RPC_URL: &str = "https://polygon-rpc.com";

/// Channel capacity for internal message routing.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Maximum asset IDs per WS subscribe frame to avoid server-side size limits.
pub const WS_SUBSCRIBE_CHUNK_SIZE: usize = 500;

/// No inbound frame for this long on an open connection → reconnect.
pub const WS_IDLE_TIMEOUT_SECS: u64 = 30;

/// Time allowed between the subscribe frame and the first inbound frame
/// before the connection is considered streaming anyway.
pub const WS_SUBSCRIBE_GRACE_SECS: u64 = 5;

/// Reconnect backoff: min(base * 2^attempt, max) seconds.
pub const BACKOFF_BASE_SECS: u64 = 1;
pub const BACKOFF_MAX_SECS: u64 = 60;

/// A streaming session that survives this long resets the backoff attempt counter.
pub const BACKOFF_RESET_AFTER_SECS: u64 = 60;

/// Catalog bootstrap: attempts and per-request timeout. Exhausting the
/// attempts is fatal — the scanner does not run without a subscription set.
pub const CATALOG_ATTEMPTS: u32 = 3;
pub const CATALOG_RETRY_DELAY_SECS: u64 = 2;
pub const CATALOG_TIMEOUT_SECS: u64 = 10;

pub const WALLET_TIMEOUT_SECS: u64 = 5;
pub const MIDPOINT_TIMEOUT_SECS: u64 = 2;
pub const SINK_TIMEOUT_SECS: u64 = 10;

/// Alert dispatcher queue depth; overflow drops the oldest MEDIUM alert.
pub const ALERT_QUEUE_DEPTH: usize = 256;

/// Suppress repeat alerts for the same (market, signal-set) inside this window.
pub const DEDUP_WINDOW_SECS: u64 = 30;

/// How long the dispatcher keeps draining its queue after shutdown begins.
pub const DISPATCH_DRAIN_DEADLINE_SECS: u64 = 10;

/// Sink retry backoff schedule (seconds) for 5xx / transport errors.
pub const SINK_RETRY_BACKOFF_SECS: &[u64] = &[1, 2, 4];

/// 429 without a Retry-After header waits this long.
pub const RETRY_AFTER_DEFAULT_SECS: u64 = 5;

/// Rolling per-market trade window length.
pub const RECENT_TRADES_CAP: usize = 100;

/// Minimum samples in the rolling window before the relative whale test applies.
pub const WHALE_MIN_SAMPLES: usize = 20;

/// Trades at or above this USD value are HIGH confidence on their own.
pub const HIGH_CONFIDENCE_USD: f64 = 25_000.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub ws_url: String,
    pub gamma_api_url: String,
    pub clob_api_url: String,
    pub log_level: String,
    /// Polygon JSON-RPC endpoint for wallet transaction counts (RPC_URL).
    pub rpc_url: String,
    pub discord_webhook_url: String,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    /// Trades below this USD value are discarded (MIN_USD_SIZE).
    pub min_usd_size: f64,
    /// Absolute whale threshold in USD (WHALE_THRESHOLD_USD).
    pub whale_threshold_usd: f64,
    /// Relative whale: usd_value >= multiplier * rolling mean (WHALE_MULTIPLIER).
    pub whale_multiplier: f64,
    /// Wallets with fewer on-chain txs than this are "fresh" (FRESH_WALLET_MAX_TXS).
    pub fresh_wallet_max_txs: u64,
    /// Cluster lookback window (CLUSTER_WINDOW_SECONDS).
    pub cluster_window_secs: u64,
    /// Distinct same-outcome buyers needed for a cluster (CLUSTER_MIN_WALLETS).
    pub cluster_min_wallets: usize,
    /// Opposite-outcome pair window for LP rejection (LP_DETECTION_WINDOW_MS).
    pub lp_detection_window_ms: i64,
    /// Markets closing within this many hours trip TIMING (TIMING_HOURS_THRESHOLD).
    pub timing_hours_threshold: f64,
    /// Price delta vs the previous surviving trade (ODDS_MOVEMENT_THRESHOLD).
    pub odds_movement_threshold: f64,
    /// Consensus cutoff on either side (CONTRARIAN_CONSENSUS_THRESHOLD).
    pub contrarian_consensus_threshold: f64,
    /// Minimum USD value for a contrarian trade (CONTRARIAN_MIN_SIZE_USD).
    pub contrarian_min_size_usd: f64,
    /// JSON array of title substrings to exclude; empty = accept all
    /// (EXCLUDE_MARKET_KEYWORDS).
    pub exclude_market_keywords: Vec<String>,
    /// Top-N markets by 24h volume to subscribe (MARKET_LIMIT).
    pub market_limit: usize,
    /// Global alert pacing (ALERT_RATE_PER_SEC).
    pub alert_rate_per_sec: f64,
    /// Wallet tx-count cache TTL (WALLET_CACHE_TTL_SECS).
    pub wallet_cache_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let discord_webhook_url = std::env::var("DISCORD_WEBHOOK_URL")
            .map_err(|_| AppError::Config("DISCORD_WEBHOOK_URL must be set".to_string()))?;
        let telegram_bot_token = std::env::var("TELEGRAM_BOT_TOKEN")
            .map_err(|_| AppError::Config("TELEGRAM_BOT_TOKEN must be set".to_string()))?;
        let telegram_chat_id = std::env::var("TELEGRAM_CHAT_ID")
            .map_err(|_| AppError::Config("TELEGRAM_CHAT_ID must be set".to_string()))?;

        let exclude_market_keywords = match std::env::var("EXCLUDE_MARKET_KEYWORDS") {
            Ok(raw) if !raw.trim().is_empty() => serde_json::from_str::<Vec<String>>(&raw)
                .map_err(|e| {
                    AppError::Config(format!("EXCLUDE_MARKET_KEYWORDS must be a JSON array: {e}"))
                })?,
            _ => Vec::new(),
        };

        Ok(Self {
            ws_url: std::env::var("WS_URL").unwrap_or_else(|_| WS_URL.to_string()),
            gamma_api_url: std::env::var("GAMMA_API_URL")
                .unwrap_or_else(|_| GAMMA_API_URL.to_string()),
            clob_api_url: std::env::var("CLOB_API_URL")
                .unwrap_or_else(|_| CLOB_API_URL.to_string()),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            rpc_url: std::env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            discord_webhook_url,
            telegram_bot_token,
            telegram_chat_id,
            min_usd_size: env_f64("MIN_USD_SIZE", 2000.0),
            whale_threshold_usd: env_f64("WHALE_THRESHOLD_USD", 10_000.0),
            whale_multiplier: env_f64("WHALE_MULTIPLIER", 5.0),
            fresh_wallet_max_txs: env_u64("FRESH_WALLET_MAX_TXS", 10),
            cluster_window_secs: env_u64("CLUSTER_WINDOW_SECONDS", 60),
            cluster_min_wallets: env_u64("CLUSTER_MIN_WALLETS", 3) as usize,
            lp_detection_window_ms: env_u64("LP_DETECTION_WINDOW_MS", 200) as i64,
            timing_hours_threshold: env_f64("TIMING_HOURS_THRESHOLD", 24.0),
            odds_movement_threshold: env_f64("ODDS_MOVEMENT_THRESHOLD", 0.05),
            contrarian_consensus_threshold: env_f64("CONTRARIAN_CONSENSUS_THRESHOLD", 0.70),
            contrarian_min_size_usd: env_f64("CONTRARIAN_MIN_SIZE_USD", 5000.0),
            exclude_market_keywords,
            market_limit: env_u64("MARKET_LIMIT", 100) as usize,
            alert_rate_per_sec: env_f64("ALERT_RATE_PER_SEC", 1.0),
            wallet_cache_ttl_secs: env_u64("WALLET_CACHE_TTL_SECS", 3600),
        })
    }
}

fn env_f64(name: &str, default: f64) -> f64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}
