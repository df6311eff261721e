use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{RETRY_AFTER_DEFAULT_SECS, SINK_RETRY_BACKOFF_SECS};

/// What to do with a sink response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Delivered,
    /// Retry after the standard backoff step.
    Transient,
    /// 429 — retry after the given delay.
    RateLimited(u64),
    /// Non-429 4xx — drop immediately.
    Permanent,
}

fn classify(status: u16, retry_after: Option<u64>) -> Disposition {
    match status {
        200..=299 => Disposition::Delivered,
        429 => Disposition::RateLimited(retry_after.unwrap_or(RETRY_AFTER_DEFAULT_SECS)),
        500..=599 => Disposition::Transient,
        _ => Disposition::Permanent,
    }
}

/// POST `body` to `url`, retrying transient failures on the 1s/2s/4s schedule
/// and honoring Retry-After on 429. Returns true when the sink accepted the
/// payload; a false return has already been logged.
pub async fn post_with_retry(
    client: &reqwest::Client,
    sink: &str,
    url: &str,
    body: &serde_json::Value,
) -> bool {
    let mut attempt = 0usize;

    loop {
        let disposition = match client.post(url).json(body).send().await {
            Ok(resp) => {
                let retry_after = resp
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.trim().parse::<u64>().ok());
                let status = resp.status().as_u16();
                let d = classify(status, retry_after);
                if d == Disposition::Permanent {
                    warn!("[{sink}] permanent failure (HTTP {status}), dropping alert");
                }
                d
            }
            Err(e) => {
                debug!("[{sink}] send error: {e}");
                Disposition::Transient
            }
        };

        match disposition {
            Disposition::Delivered => return true,
            Disposition::Permanent => return false,
            Disposition::RateLimited(_) | Disposition::Transient => {}
        }

        if attempt >= SINK_RETRY_BACKOFF_SECS.len() {
            warn!("[{sink}] retries exhausted, dropping alert");
            return false;
        }
        let delay_secs = match disposition {
            Disposition::RateLimited(secs) => secs,
            _ => SINK_RETRY_BACKOFF_SECS[attempt],
        };
        debug!("[{sink}] retrying in {delay_secs}s (attempt {})", attempt + 1);
        tokio::time::sleep(Duration::from_secs(delay_secs)).await;
        attempt += 1;
    }
}

/// Abbreviated wallet address for display: `0xdead…beef`.
pub(crate) fn short_wallet(wallet: &str) -> String {
    if wallet.len() > 10 {
        format!("{}…{}", &wallet[..6], &wallet[wallet.len() - 4..])
    } else {
        wallet.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortens_long_wallets_only() {
        assert_eq!(short_wallet("0xdeadbeefdeadbeef"), "0xdead…beef");
        assert_eq!(short_wallet("0xabc"), "0xabc");
    }

    #[test]
    fn success_statuses_deliver() {
        assert_eq!(classify(200, None), Disposition::Delivered);
        assert_eq!(classify(204, None), Disposition::Delivered);
    }

    #[test]
    fn server_errors_are_transient() {
        assert_eq!(classify(500, None), Disposition::Transient);
        assert_eq!(classify(503, None), Disposition::Transient);
    }

    #[test]
    fn rate_limit_honors_retry_after() {
        assert_eq!(classify(429, Some(17)), Disposition::RateLimited(17));
        assert_eq!(
            classify(429, None),
            Disposition::RateLimited(RETRY_AFTER_DEFAULT_SECS)
        );
    }

    #[test]
    fn other_client_errors_are_permanent() {
        assert_eq!(classify(400, None), Disposition::Permanent);
        assert_eq!(classify(404, None), Disposition::Permanent);
        assert_eq!(classify(401, None), Disposition::Permanent);
    }
}
