use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::{Config, SINK_TIMEOUT_SECS};
use crate::dispatch::sink::{post_with_retry, short_wallet};
use crate::error::Result;
use crate::types::Alert;

/// Delivers alerts through the Telegram Bot API as HTML-formatted messages.
pub struct TelegramSink {
    client: reqwest::Client,
    send_url: String,
    chat_id: String,
    rx: mpsc::Receiver<Alert>,
}

impl TelegramSink {
    pub fn new(cfg: &Config, rx: mpsc::Receiver<Alert>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SINK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            send_url: format!(
                "https://api.telegram.org/bot{}/sendMessage",
                cfg.telegram_bot_token
            ),
            chat_id: cfg.telegram_chat_id.clone(),
            rx,
        })
    }

    pub async fn run(mut self) {
        while let Some(alert) = self.rx.recv().await {
            let body = serde_json::json!({
                "chat_id": self.chat_id,
                "text": build_message(&alert),
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            });
            post_with_retry(&self.client, "telegram", &self.send_url, &body).await;
        }
        info!("[telegram] queue closed, stopping");
    }
}

pub(crate) fn build_message(alert: &Alert) -> String {
    let trade = &alert.trade;
    let mut text = format!(
        "🚨 <b>{}</b>\n{} {} ${:.0} at {:.0}¢ — {} confidence\n",
        escape_html(&alert.market_title),
        trade.side,
        trade.outcome,
        trade.usd_value(),
        trade.price * 100.0,
        alert.confidence,
    );

    text.push_str("\nSignals:\n");
    for s in &alert.signals {
        text.push_str(&format!("• <b>{}</b> — {}\n", s.kind(), escape_html(&s.describe())));
    }

    text.push_str(&format!(
        "\nWallet: <a href=\"https://polygonscan.com/address/{}\">{}</a>",
        trade.wallet,
        escape_html(&short_wallet(&trade.wallet)),
    ));
    if let Some(n) = alert.wallet_tx_count {
        text.push_str(&format!(" ({n} txs)"));
    }

    if let Some(mid) = alert.midpoint {
        text.push_str(&format!("\nOdds now: {:.0}%", mid * 100.0));
    }
    if let Some(end) = alert.end_time_ms {
        let hours = (end - trade.timestamp_ms) as f64 / 3_600_000.0;
        if hours > 0.0 {
            text.push_str(&format!("\nCloses in {hours:.1}h"));
        }
    }

    text
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
