use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::{Config, SINK_TIMEOUT_SECS};
use crate::dispatch::sink::{post_with_retry, short_wallet};
use crate::error::Result;
use crate::types::{Alert, Confidence};

/// Embed accent colors: red for HIGH, orange for MEDIUM.
const COLOR_HIGH: u32 = 15_158_332;
const COLOR_MEDIUM: u32 = 15_105_570;

/// Delivers alerts to a Discord webhook as a single embed per alert.
pub struct DiscordSink {
    client: reqwest::Client,
    webhook_url: String,
    rx: mpsc::Receiver<Alert>,
}

impl DiscordSink {
    pub fn new(cfg: &Config, rx: mpsc::Receiver<Alert>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SINK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            webhook_url: cfg.discord_webhook_url.clone(),
            rx,
        })
    }

    pub async fn run(mut self) {
        while let Some(alert) = self.rx.recv().await {
            let body = build_embed(&alert);
            post_with_retry(&self.client, "discord", &self.webhook_url, &body).await;
        }
        info!("[discord] queue closed, stopping");
    }
}

pub(crate) fn build_embed(alert: &Alert) -> serde_json::Value {
    let color = match alert.confidence {
        Confidence::High => COLOR_HIGH,
        Confidence::Medium => COLOR_MEDIUM,
    };

    let trade = &alert.trade;
    let description = format!(
        "**{} {}** — ${:.0} at {:.0}¢ ({} confidence)",
        trade.side,
        trade.outcome,
        trade.usd_value(),
        trade.price * 100.0,
        alert.confidence,
    );

    let signal_lines: Vec<String> = alert
        .signals
        .iter()
        .map(|s| format!("**{}** — {}", s.kind(), s.describe()))
        .collect();

    let wallet_value = match alert.wallet_tx_count {
        Some(n) => format!(
            "[{}](https://polygonscan.com/address/{}) · {n} txs",
            short_wallet(&trade.wallet),
            trade.wallet,
        ),
        None => format!(
            "[{}](https://polygonscan.com/address/{})",
            short_wallet(&trade.wallet),
            trade.wallet,
        ),
    };

    let mut fields = vec![
        serde_json::json!({
            "name": "Signals",
            "value": signal_lines.join("\n"),
            "inline": false,
        }),
        serde_json::json!({
            "name": "Wallet",
            "value": wallet_value,
            "inline": true,
        }),
    ];

    if let Some(mid) = alert.midpoint {
        fields.push(serde_json::json!({
            "name": "Odds now",
            "value": format!("{:.0}%", mid * 100.0),
            "inline": true,
        }));
    }
    if let Some(end) = alert.end_time_ms {
        let hours = (end - trade.timestamp_ms) as f64 / 3_600_000.0;
        if hours > 0.0 {
            fields.push(serde_json::json!({
                "name": "Closes",
                "value": format!("in {hours:.1}h"),
                "inline": true,
            }));
        }
    }

    serde_json::json!({
        "embeds": [{
            "title": truncate(&alert.market_title, 240),
            "description": description,
            "color": color,
            "fields": fields,
        }]
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}
