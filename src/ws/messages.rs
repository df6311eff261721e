use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use tracing::warn;

use crate::types::{Outcome, Side, Trade};

static PARSE_FAILURES: AtomicU64 = AtomicU64::new(0);

/// Raw deserializable shape covering all market-channel WS messages.
/// Fields are optional because different event types carry different subsets,
/// and the CLOB serializes numerics as strings or numbers interchangeably.
#[derive(Debug, Deserialize)]
struct RawMsg {
    event_type: Option<String>,
    asset_id: Option<String>,
    side: Option<String>,
    outcome: Option<String>,
    price: Option<serde_json::Value>,
    size: Option<serde_json::Value>,
    taker_address: Option<String>,
    timestamp: Option<serde_json::Value>,
    id: Option<String>,
}

/// Parse a raw WebSocket text frame into zero or more trades.
///
/// Messages arrive as either a single JSON object or an array of objects.
/// Only `event_type == "trade"` produces output; `book`, `price_change`,
/// `tick_size_change`, `last_trade_price`, and subscription acks are consumed
/// silently. Anything unparseable is counted and skip-logged — a bad frame
/// never tears down the connection.
pub fn parse_frame(raw: &str) -> Vec<Trade> {
    let msgs: Vec<RawMsg> = if raw.trim_start().starts_with('[') {
        match serde_json::from_str(raw) {
            Ok(m) => m,
            Err(_) => {
                note_parse_failure(raw);
                return vec![];
            }
        }
    } else {
        match serde_json::from_str::<RawMsg>(raw) {
            Ok(m) => vec![m],
            Err(_) => {
                note_parse_failure(raw);
                return vec![];
            }
        }
    };

    let mut trades = Vec::new();
    for msg in msgs {
        let is_trade = msg.event_type.as_deref() == Some("trade");
        if !is_trade {
            continue;
        }
        match trade_from_raw(msg) {
            Some(trade) => trades.push(trade),
            None => note_parse_failure(raw),
        }
    }
    trades
}

pub fn parse_failure_count() -> u64 {
    PARSE_FAILURES.load(Ordering::Relaxed)
}

fn note_parse_failure(raw: &str) {
    let count = PARSE_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
    if count <= 10 || count % 1000 == 0 {
        let sample = &raw[..500.min(raw.len())];
        warn!(count, "[WS PARSE] unrecognized frame: {sample}");
    }
}

fn trade_from_raw(msg: RawMsg) -> Option<Trade> {
    let asset_id = msg.asset_id?;
    let side = Side::parse(msg.side.as_deref()?)?;
    let outcome = Outcome::parse(msg.outcome.as_deref()?)?;
    let price = value_to_f64(msg.price.as_ref()?)?;
    let size = value_to_f64(msg.size.as_ref()?)?;
    let wallet = msg.taker_address?.to_lowercase();
    let timestamp_ms = value_to_i64(msg.timestamp.as_ref()?)?;
    let trade_id = msg.id?;

    if !(0.0..=1.0).contains(&price) || size < 0.0 {
        return None;
    }

    Some(Trade {
        asset_id,
        side,
        outcome,
        price,
        size,
        wallet,
        timestamp_ms,
        trade_id,
    })
}

fn value_to_f64(v: &serde_json::Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

fn value_to_i64(v: &serde_json::Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}
