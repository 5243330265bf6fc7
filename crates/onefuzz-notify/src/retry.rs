//! Capped exponential backoff for notification delivery, jittered the way
//! a webhook resender staggers retries against a flaky endpoint. Every
//! outbound call gets a bounded attempt budget.

use std::time::Duration;

use rand::Rng;

const BASE: Duration = Duration::from_secs(1);
const CAP: Duration = Duration::from_secs(60);
/// Maximum fractional deviation applied to each computed delay.
const JITTER_FRACTION: f64 = 0.2;

/// Delay before attempt `attempt` (0-indexed): `min(BASE * 2^attempt, CAP)`,
/// jittered by up to [`JITTER_FRACTION`] in either direction.
pub fn backoff(attempt: u32) -> Duration {
    let exp = BASE.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let delay = exp.min(CAP);

    let jitter = rand::thread_rng().gen_range(-JITTER_FRACTION..=JITTER_FRACTION);
    let factor = (1.0 + jitter).max(0.0);
    delay.mul_f64(factor)
}

/// Retry `op` up to `max_attempts` times, sleeping [`backoff`] between
/// attempts. Returns the last error if every attempt fails.
pub async fn retry<T, E, Fut>(
    max_attempts: u32,
    mut op: impl FnMut(u32) -> Fut,
) -> Result<T, E>
where
    Fut: std::future::Future<Output = Result<T, E>>,
{
    let attempts = max_attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(backoff(attempt)).await;
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt runs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_then_caps() {
        assert!(backoff(0) <= Duration::from_millis(1200));
        assert!(backoff(10) <= Duration::from_millis(72_000));
        assert!(backoff(10) >= Duration::from_secs(48));
    }

    #[tokio::test]
    async fn retry_gives_up_after_the_attempt_budget() {
        let mut calls = 0;
        let result: Result<(), &str> = retry(3, |_attempt| {
            calls += 1;
            async { Err("boom") }
        })
        .await;

        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn retry_stops_as_soon_as_an_attempt_succeeds() {
        let mut calls = 0;
        let result: Result<i32, &str> = retry(5, |attempt| {
            calls += 1;
            async move {
                if attempt < 2 {
                    Err("not yet")
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls, 3);
    }
}
