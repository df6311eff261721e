use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Side::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("up") {
            Some(Outcome::Yes)
        } else if s.eq_ignore_ascii_case("no") || s.eq_ignore_ascii_case("down") {
            Some(Outcome::No)
        } else {
            None
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Yes => write!(f, "YES"),
            Outcome::No => write!(f, "NO"),
        }
    }
}

/// A single fill from the CLOB trade feed, normalized on receipt.
#[derive(Debug, Clone)]
pub struct Trade {
    pub asset_id: String,
    pub side: Side,
    pub outcome: Outcome,
    /// Implied probability in [0, 1].
    pub price: f64,
    /// Shares, non-negative.
    pub size: f64,
    /// Taker address, lowercased on ingest.
    pub wallet: String,
    /// Millisecond UTC epoch.
    pub timestamp_ms: i64,
    pub trade_id: String,
}

impl Trade {
    pub fn usd_value(&self) -> f64 {
        self.price * self.size
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Whale,
    FreshWallet,
    Cluster,
    Timing,
    OddsMove,
    Contrarian,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SignalKind::Whale => "WHALE",
            SignalKind::FreshWallet => "FRESH_WALLET",
            SignalKind::Cluster => "CLUSTER",
            SignalKind::Timing => "TIMING",
            SignalKind::OddsMove => "ODDS_MOVE",
            SignalKind::Contrarian => "CONTRARIAN",
        };
        write!(f, "{s}")
    }
}

/// One firing signal with its kind-specific evidence.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// `multiplier` is usd_value / rolling mean when the window is populated.
    Whale { multiplier: Option<f64> },
    FreshWallet { tx_count: u64 },
    /// Distinct same-outcome buyers inside the cluster window, current trade included.
    Cluster { wallets: usize },
    Timing { hours_to_close: f64 },
    OddsMove { delta: f64 },
    /// Consensus YES-price the trade bet against.
    Contrarian { consensus_yes: f64 },
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Whale { .. } => SignalKind::Whale,
            Signal::FreshWallet { .. } => SignalKind::FreshWallet,
            Signal::Cluster { .. } => SignalKind::Cluster,
            Signal::Timing { .. } => SignalKind::Timing,
            Signal::OddsMove { .. } => SignalKind::OddsMove,
            Signal::Contrarian { .. } => SignalKind::Contrarian,
        }
    }

    /// Human-readable evidence line for sink formatting.
    pub fn describe(&self) -> String {
        match self {
            Signal::Whale { multiplier: Some(m) } => format!("{:.1}x the recent average", m),
            Signal::Whale { multiplier: None } => "above absolute threshold".to_string(),
            Signal::FreshWallet { tx_count } => format!("{tx_count} lifetime transactions"),
            Signal::Cluster { wallets } => format!("{wallets} wallets on the same side"),
            Signal::Timing { hours_to_close } => format!("{hours_to_close:.1}h to close"),
            Signal::OddsMove { delta } => format!("{:+.0}¢ vs last trade", delta * 100.0),
            Signal::Contrarian { consensus_yes } => {
                format!("against {:.0}% consensus", consensus_yes.max(1.0 - consensus_yes) * 100.0)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline messages — sent over mpsc channels between tasks
// ---------------------------------------------------------------------------

/// Detection output, before enrichment.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub trade: Trade,
    /// Non-empty by construction.
    pub signals: Vec<Signal>,
    pub confidence: Confidence,
}

/// Fully enriched alert, owned by the dispatcher until send-or-drop.
#[derive(Debug, Clone)]
pub struct Alert {
    pub trade: Trade,
    pub signals: Vec<Signal>,
    pub confidence: Confidence,
    pub market_title: String,
    pub end_time_ms: Option<i64>,
    /// Current book midpoint, when the best-effort fetch succeeded.
    pub midpoint: Option<f64>,
    pub wallet_tx_count: Option<u64>,
}

/// Result of an async wallet lookup, routed back into the detection task.
/// `tx_count == u64::MAX` records a failed lookup.
#[derive(Debug, Clone)]
pub struct WalletUpdate {
    pub wallet: String,
    pub tx_count: u64,
}
