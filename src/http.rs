// ConsentKeeper — HTTP backoff helpers
//
// Escalating reconnect delay for the gateway bridge and Retry-After parsing
// for the REST client.

use std::time::Duration;

use rand::Rng;

/// Initial delay in milliseconds (doubles each attempt).
const INITIAL_RETRY_DELAY_MS: u64 = 1_000;

/// Maximum bridge reconnect delay cap in milliseconds (5 minutes).
const MAX_RECONNECT_DELAY_MS: u64 = 300_000;

/// Ceiling on a server-requested rate-limit wait.
const MAX_RETRY_AFTER_SECS: f64 = 60.0;

/// Compute exponential backoff for bridge reconnection without sleeping.
/// `attempt` is 0-based.
pub fn reconnect_backoff(attempt: u32) -> Duration {
    let base_ms = INITIAL_RETRY_DELAY_MS * 2u64.pow(attempt.min(12));
    let capped_ms = base_ms.min(MAX_RECONNECT_DELAY_MS);
    Duration::from_millis(apply_jitter(capped_ms))
}

/// Sleep for the reconnect backoff and return the delay for logging.
pub async fn reconnect_delay(attempt: u32) -> Duration {
    let delay = reconnect_backoff(attempt);
    tokio::time::sleep(delay).await;
    delay
}

/// Wait requested by a Discord 429 body (`retry_after`, fractional seconds).
/// Falls back to one second and never exceeds a minute.
pub fn rate_limit_wait(body: &str) -> Duration {
    let secs = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["retry_after"].as_f64())
        .filter(|s| s.is_finite() && *s >= 0.0)
        .unwrap_or(1.0)
        .min(MAX_RETRY_AFTER_SECS);
    Duration::from_secs_f64(secs + 0.1)
}

/// Apply ±25% jitter to prevent thundering-herd reconnects.
/// The offset is drawn uniformly over the whole `[-range, range]` window.
fn apply_jitter(base_ms: u64) -> u64 {
    let jitter_range = (base_ms / 4) as i64;
    if jitter_range == 0 {
        return base_ms.max(100);
    }
    let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
    (base_ms as i64 + offset).max(100) as u64
}
