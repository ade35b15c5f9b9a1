//! Bounded exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::LlmError;

/// Delay cap so a misconfigured attempt count can't stall a cycle.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Run `call` up to `max_attempts` times, backing off exponentially with
/// jitter between attempts. Only transient errors are retried; parse-level
/// failures surface immediately (they get a strict re-ask instead, owned by
/// the classification engine).
pub(crate) async fn with_backoff<T, F, Fut>(
    max_attempts: u32,
    base_delay: Duration,
    mut call: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt + 1 < attempts => {
                let delay = backoff_delay(base_delay, attempt);
                warn!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %err, "Provider call failed, retrying");
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }

    // Unreachable with attempts >= 1, but keep the compiler honest.
    Err(last_err.unwrap_or(LlmError::RequestFailed {
        provider: "unknown".into(),
        reason: "no attempts made".into(),
    }))
}

/// Exponential delay with up to 50% random jitter, capped at `MAX_DELAY`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(attempt));
    let capped = exp.min(MAX_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=capped.as_millis() as u64 / 2);
    (capped + Duration::from_millis(jitter_ms)).min(MAX_DELAY)
}
